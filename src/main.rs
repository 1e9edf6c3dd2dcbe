use anyhow::Result;
use chrono::Utc;
use log::{error, info, warn};
use std::env;
use std::sync::Arc;
use tokio::time::{Duration, interval};

use signal_scanner::config::ScannerConfig;
use signal_scanner::market_data::{Bar, MarketDataProvider};
use signal_scanner::notify::LogNotifier;
use signal_scanner::scanner::Scanner;

/// Placeholder provider wired in until a real feed adapter is configured.
/// Returns no bars, so every instrument is skipped with a DataUnavailable.
struct NullMarketDataProvider;

#[async_trait::async_trait]
impl MarketDataProvider for NullMarketDataProvider {
    async fn get_bars(
        &self,
        _symbol: &str,
        _period_minutes: u32,
        _start: chrono::DateTime<Utc>,
        _end: chrono::DateTime<Utc>,
    ) -> Result<Vec<Bar>> {
        Ok(Vec::new())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger with default info level if RUST_LOG not set
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }
    env_logger::init();
    info!("Starting signal scanner");

    // Get config file from command line argument or use default
    let args: Vec<String> = env::args().collect();
    let config_file = if args.len() > 1 {
        &args[1]
    } else {
        "scanner_config.json"
    };

    info!("Loading configuration from: {}", config_file);
    let config = ScannerConfig::load_from_file(config_file)?;
    info!(
        "Scanning {} instruments every {} minutes, breakout checks every {} minutes",
        config.instruments.len(),
        config.scan_config.scan_interval_minutes,
        config.scan_config.breakout_interval_minutes
    );

    let provider = Arc::new(NullMarketDataProvider);
    let notifier = Arc::new(LogNotifier);

    let scan_interval_secs = config.scan_config.scan_interval_minutes * 60;
    let breakout_interval_secs = config.scan_config.breakout_interval_minutes * 60;

    let mut scanner = Scanner::new(config, provider, notifier);

    let mut scan_interval = interval(Duration::from_secs(scan_interval_secs));
    let mut breakout_interval = interval(Duration::from_secs(breakout_interval_secs));

    loop {
        tokio::select! {
            _ = scan_interval.tick() => {
                let summary = scanner.run_cycle(Utc::now()).await;
                if summary.failed > 0 {
                    warn!("{} instruments failed this cycle and will retry next pass", summary.failed);
                }
            }
            _ = breakout_interval.tick() => {
                let dispatched = scanner.run_breakout_checks(Utc::now()).await;
                if dispatched > 0 {
                    info!("Dispatched {} breakout notifications", dispatched);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down signal scanner...");
                break;
            }
        }
    }

    // The in-flight pass has finished by the time select! returns; persist
    // both stores so the next run resumes where this one left off.
    if let Err(e) = scanner.flush_state() {
        error!("Failed to persist state on shutdown: {}", e);
    }
    info!(
        "Scanner stopped with {} pending breakout watches",
        scanner.pending_breakout_count()
    );
    Ok(())
}
