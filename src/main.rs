use clap::Parser;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    derbyscan_lib::run(derbyscan_lib::cli::Cli::parse()).await
}
