use anyhow::Result;
use apel_publisher::cli::{run, Cli};
use apel_publisher::load_config::load_config;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = load_config(cli.command.config_path())?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();
    tracing::info!("CLI application startup: tracing initialised, environment loaded");

    let result = run(cli.command, config).await;
    match &result {
        Ok(_) => tracing::info!("apel-publisher finished"),
        Err(e) => tracing::error!(error = %e, "apel-publisher stopped with error"),
    }
    result
}
