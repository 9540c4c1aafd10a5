pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod render;
pub mod snapshot;
pub mod stats;
pub mod store;
pub mod sync;

use std::sync::{Arc, Once};

use chrono::Utc;

use cli::{Cli, Command};
use config::Config;
use store::FileStore;
use sync::{scheduler, SyncManager};

/// Install ring as the process-wide rustls crypto provider. Must run before
/// the first HTTP client is built; later calls are no-ops.
pub fn ensure_tls_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            tracing::debug!("A TLS crypto provider was already installed");
        }
    });
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("derbyscan=info")),
        )
        .init();
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    init_tracing();
    tracing::info!("Starting DerbyScan v{}", env!("CARGO_PKG_VERSION"));

    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let config = Config::load(&config_path).with_env_overrides()?;
    tracing::info!(
        "Config loaded: {} endpoints against {}",
        config.endpoints.len(),
        config.api_base_url
    );

    let cache_dir = config.cache_dir();
    tracing::info!("Snapshot cache: {}", cache_dir.display());
    let store = Arc::new(FileStore::new(cache_dir));

    if let Some(Command::Wallet { address }) = cli.command {
        let manager = SyncManager::new(&config, store)?;
        manager.load_cached();
        manager.refresh().await;
        let report = manager.lookup_wallet(&address).await;
        print!("{}", render::render_wallet_report(&report, Utc::now()));
        return Ok(());
    }

    let manager = Arc::new(SyncManager::new(&config, store)?.with_render(|snapshot| {
        println!("{}", render::render_dashboard(snapshot, Utc::now()));
    }));
    manager.load_cached();
    manager.render_current();

    if cli.once {
        manager.refresh().await;
        return Ok(());
    }

    let ticker = scheduler::spawn_refresh_loop(manager.clone(), config.update_interval());
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    ticker.abort();
    Ok(())
}
