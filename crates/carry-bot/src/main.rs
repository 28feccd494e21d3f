//! Delta-neutral funding-rate carry bot - Entry Point
//!
//! Long leveraged LST on a lending venue, offsetting perp short on the
//! derivatives venue, collecting negative funding while delta-neutral.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Delta-neutral funding-rate carry bot
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via CARRY_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    carry_telemetry::init_logging()?;

    info!("Starting carry bot v{}", env!("CARGO_PKG_VERSION"));

    // Determine config path: CLI arg > CARRY_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("CARRY_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");

    let config = carry_bot::AppConfig::from_file(&config_path)?;
    info!(
        ?config.mode,
        assets = config.watchlist.len(),
        "Configuration loaded"
    );

    // Create and run the application
    let app = carry_bot::Application::new(config)?;
    app.run().await?;

    Ok(())
}
