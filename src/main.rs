use anyhow::{Context, Result};
use clap::Parser;
use meterlink::Config;
use meterlink::logging::init_logging;
use meterlink::runtime::{SourceSpec, run};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "meterlink", version = env!("APP_VERSION"), about = "P1 smart meter reader and surplus load switcher")]
struct Cli {
    /// Configuration file (default: probe the usual locations)
    #[arg(short, long, env = "METERLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Replay a captured byte stream instead of opening the serial port
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Bytes per read when replaying
    #[arg(long, default_value_t = 64)]
    replay_chunk: usize,

    /// Pause between replay reads in milliseconds
    #[arg(long, default_value_t = 0)]
    replay_interval_ms: u64,

    /// Validate the configuration, print the effective settings as JSON and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::load().context("Failed to load configuration")?,
    };

    config.validate().context("Invalid configuration")?;

    if cli.check_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        eprintln!("Configuration is valid");
        return Ok(());
    }

    init_logging(&config.logging).context("Failed to initialize logging")?;
    info!("meterlink {} starting up", env!("APP_VERSION"));

    let source = match cli.replay {
        Some(path) => SourceSpec::Replay {
            path,
            chunk: cli.replay_chunk,
            interval: (cli.replay_interval_ms > 0)
                .then(|| Duration::from_millis(cli.replay_interval_ms)),
        },
        None => SourceSpec::Serial(config.serial.clone()),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", e);
            // Keep the channel open; the run then ends with the stream
            std::future::pending::<()>().await;
        }
        info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    match run(&config, source, shutdown_rx).await {
        Ok(_) => {
            info!("Shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("meterlink stopped: {}", e);
            Err(anyhow::anyhow!("meterlink error: {}", e))
        }
    }
}
