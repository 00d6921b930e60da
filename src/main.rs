//! # GNSS Tracker
//!
//! Location telemetry agent: decodes the GNSS receiver, keeps the configured
//! WiFi or LTE link up and uploads the latest fix on a fixed interval.
//!
//! # Control Flow
//!
//! 1. **Startup**
//!    - Load configuration (first CLI argument, default `config/default.toml`)
//!    - Set up logging, optionally with a daily log file
//!    - Build the connectivity provider; failing to derive a device identity
//!      here is the only fatal runtime error
//!    - Attempt the first connection (failure is retried by the loop)
//!
//! 2. **Main Loop**
//!    - Poll GNSS, send when due, escalate on repeated failures
//!    - Runs until Ctrl+C
//!
//! # Examples
//!
//! ```bash
//! gnss-tracker /etc/gnss-tracker/config.toml
//! ```
//!
//! Expected output:
//! ```text
//! INFO gnss_tracker: GNSS Tracker v0.1.0 starting...
//! INFO gnss_tracker::connectivity: Using cellular transport on /dev/ttyUSB2
//! INFO gnss_tracker::connectivity::cellular: Device identity: 3f1c...
//! INFO gnss_tracker::gnss: GNSS receiver port opened
//! ```

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gnss_tracker::config::{Config, LoggingConfig};
use gnss_tracker::connectivity::{self, ConnectivityProvider};
use gnss_tracker::gnss::GnssReader;
use gnss_tracker::indicator;
use gnss_tracker::scheduler::Tracker;
use gnss_tracker::serial;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

const LOG_FILE_PREFIX: &str = "gnss-tracker.log";

fn env_filter() -> EnvFilter {
    EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
}

/// Console logging, plus a daily-rolling file when `log_dir` is set
///
/// The returned guard flushes the file writer and must live as long as the process.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(env_filter())
                .with(fmt::layer())
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(env_filter()).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;

    let _log_guard = init_logging(&config.logging);
    info!("GNSS Tracker v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from {}", config_path);

    let mut indicator = indicator::from_config(&config.indicator);

    let mut provider = connectivity::build_provider(&config, &mut indicator)
        .await
        .context("cannot start without a device identity")?;

    if !provider.connect(&mut indicator).await.is_connected() {
        warn!("Initial connection failed, the tracker will keep retrying");
    }
    match provider.cell_info().await {
        Ok(Some(cell)) => info!("Serving cell: {:?}", cell),
        Ok(None) => {}
        Err(e) => warn!("Could not get cell information: {}", e),
    }

    let gnss_ports: Vec<String> = config.gnss.candidate_ports().into_iter().map(String::from).collect();
    let gnss_baud = config.gnss.baud_rate;
    let gnss = GnssReader::new(Box::new(move || {
        let paths: Vec<&str> = gnss_ports.iter().map(String::as_str).collect();
        serial::open_with_paths(&paths, gnss_baud)
    }));

    let mut tracker = Tracker::from_config(gnss, provider, indicator, &config);

    info!("Press Ctrl+C to exit");
    tokio::select! {
        _ = tracker.run() => {
            error!("Tracking loop exited unexpectedly");
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Received Ctrl+C, shutting down...");
        }
    }

    info!("GNSS Tracker stopped");
    Ok(())
}
