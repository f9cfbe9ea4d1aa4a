use anyhow::Result;
use clap::Parser;
use connection_monitor::{AppConfig, ConnectionEvent, ManualConnectivity, Monitor, MonitorOptions};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "connection-monitor", about = "Report online/offline transitions for a heartbeat URL")]
struct Cli {
    /// TOML config file; embedded defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Heartbeat URL; enables active monitoring
    #[arg(short, long)]
    url: Option<String>,

    /// Milliseconds between heartbeats
    #[arg(short, long)]
    interval_ms: Option<u64>,

    /// Print each transition as a JSON line on stdout
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct TransitionLine {
    event: ConnectionEvent,
    timestamp_unix_ms: u128,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load_default()?,
    };
    if let Some(url) = cli.url {
        config.monitor.active_monitoring = true;
        config.monitor.heartbeat_url = Some(url);
    }
    if let Some(ms) = cli.interval_ms {
        config.monitor.heartbeat_interval_ms = ms;
    }
    info!("Starting connection monitor: {:?}", config.monitor);

    let source = Arc::new(ManualConnectivity::new());
    let monitor = Monitor::with_source(MonitorOptions::from(&config.monitor), source)?;

    let json = cli.json;
    monitor.on(move |event| {
        if !json {
            return;
        }
        let line = TransitionLine {
            event,
            timestamp_unix_ms: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis(),
        };
        match serde_json::to_string(&line) {
            Ok(s) => println!("{}", s),
            Err(e) => tracing::error!("failed to encode transition: {}", e),
        }
    });

    monitor.start()?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down (last status: {})", if monitor.status() { "online" } else { "offline" });
    monitor.stop();

    Ok(())
}
