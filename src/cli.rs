use std::path::PathBuf;

/// Race winner and token holder dashboard.
#[derive(Debug, clap::Parser)]
#[command(name = "derbyscan", version, about)]
pub struct Cli {
    /// Path to the config file (default: app data directory).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,
    /// Refresh once and exit instead of polling.
    #[arg(long)]
    pub once: bool,
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Commands.
#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Look up a wallet in the race history and the holders list.
    Wallet {
        /// Wallet address (case-insensitive).
        address: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_parse_dashboard_flags() {
        let cli = Cli::try_parse_from(["derbyscan", "--once", "-c", "/tmp/c.json"]).unwrap();
        assert!(cli.once);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.json")));
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_parse_wallet_command() {
        let cli = Cli::try_parse_from(["derbyscan", "wallet", "ABC"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Wallet { ref address }) if address == "ABC"));
    }

    #[test]
    fn test_wallet_requires_address() {
        assert!(Cli::try_parse_from(["derbyscan", "wallet"]).is_err());
    }
}
