//! Market movers detection and tracking service - Entry Point

use anyhow::Result;
use clap::Parser;
use movers_bot::{AppConfig, Application};
use rust_decimal::Decimal;
use tracing::info;

/// Market movers detection and tracking service
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via MOVERS_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the qualification threshold in percent
    #[arg(short, long)]
    threshold: Option<Decimal>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before any WS connection
    movers_ws::init_crypto();

    let args = Args::parse();

    // CLI arg > MOVERS_CONFIG env var > default path
    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::load()?,
    };
    if let Some(threshold) = args.threshold {
        config.scanner.threshold_pct = threshold;
        config.validate()?;
    }

    if args.print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    movers_telemetry::init_logging_with(&config.telemetry.log_level)?;

    info!("Starting movers-bot v{}", env!("CARGO_PKG_VERSION"));
    info!(
        segments = ?config.segments,
        threshold_pct = %config.scanner.threshold_pct,
        interval_min = config.scanner.kline_interval_min,
        "Configuration loaded"
    );

    let app = Application::new(config)?;
    app.run().await?;

    Ok(())
}
