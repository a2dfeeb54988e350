pub mod classifier;
pub mod history;
pub mod models;
pub mod monitor;
pub mod settings;
pub mod tail;
pub mod trend;
pub mod utils;
pub mod watcher;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use tokio::sync::broadcast;

pub use classifier::{aggregate, aggregate_lines, classify, classify_all};
pub use history::{HistorySummary, StatsHistory};
pub use models::{EntryType, HealthLevel, LogEntry, Statistics, TrendAnalysisResult, TrendData};
pub use monitor::{MonitorConfig, MonitorController, MonitorError, MonitorStatus, TriggerSource};
pub use settings::{AppSettings, SettingsStore};
pub use tail::{TailBatch, TailReader, TextEncoding};
pub use trend::{analyze, calculate_trend, DEFAULT_MOVING_AVERAGE_PERIOD};
pub use watcher::{ChangeKind, ChangeNotifier, FileChange};

const DEFAULT_SETTINGS_FILE: &str = "stackwatch.json";

/// Follow a script log and report dump statistics as they change.
#[derive(Debug, Clone, Parser)]
#[command(name = "stackwatch", version, about)]
pub struct Cli {
    /// Settings file (created on first change)
    #[arg(long, value_name = "PATH", default_value = DEFAULT_SETTINGS_FILE)]
    pub settings: PathBuf,

    /// Log file to monitor; overrides the settings file
    #[arg(long, value_name = "PATH")]
    pub log: Option<PathBuf>,

    /// Polling interval in milliseconds
    #[arg(long, value_name = "MS")]
    pub poll_ms: Option<u64>,

    /// Poll instead of using file system notifications
    #[arg(long)]
    pub no_watch: bool,

    /// Moving average period for the trend report
    #[arg(long, value_name = "N")]
    pub trend_period: Option<usize>,

    /// Parse the file once, print the statistics and exit
    #[arg(long)]
    pub once: bool,
}

impl Cli {
    fn apply_overrides(&self, mut config: MonitorConfig) -> MonitorConfig {
        if let Some(log) = &self.log {
            config.log_file_path = log.clone();
        }
        if let Some(poll_ms) = self.poll_ms {
            config.poll_interval_ms = poll_ms;
        }
        if self.no_watch {
            config.use_change_notifier = false;
        }
        config
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("stackwatch starting up...");

    let store = SettingsStore::new(cli.settings.clone())?;
    let settings = store.settings();
    let config = cli.apply_overrides(settings.monitor.clone());
    let trend_period = cli.trend_period.unwrap_or(settings.trend_period);

    let controller = MonitorController::new(config.clone());
    let history = StatsHistory::new(config.max_retained_entries);
    let recorder = history.spawn_recorder(controller.subscribe_statistics());
    let reporter = tokio::spawn(report_statistics(
        controller.subscribe_statistics(),
        config.warning_ratio_threshold,
        config.error_ratio_threshold,
    ));

    if cli.once {
        let snapshot = controller.force_update().await?;
        shutdown(controller, recorder, reporter).await;

        match snapshot {
            Some(stats) => println!("{}", serde_json::to_string_pretty(&stats)?),
            None => warn!("no statistics could be read from {}", config.log_file_path.display()),
        }
        return Ok(());
    }

    if settings.auto_start || cli.log.is_some() {
        controller.start().await?;
    } else {
        warn!("auto start is disabled; pass --log to start monitoring");
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    shutdown(controller, recorder, reporter).await;

    let summary = history.summary().await;
    let trends = history.analyze(trend_period).await;
    info!(
        "recorded {} snapshots; dumps slope {:.4}/s, ratio slope {:.4}/s (R² {:.3})",
        summary.snapshot_count,
        trends.dumps.summary.slope,
        trends.ratio.summary.slope,
        trends.ratio.summary.r_squared
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

/// Dispose the monitor and let the subscribers drain what was already published.
async fn shutdown(
    controller: MonitorController,
    recorder: tokio::task::JoinHandle<()>,
    reporter: tokio::task::JoinHandle<()>,
) {
    controller.dispose().await;
    // Last handle: dropping it closes the statistics channel.
    drop(controller);
    let _ = recorder.await;
    let _ = reporter.await;
}

async fn report_statistics(
    mut stats: broadcast::Receiver<Statistics>,
    warning_threshold: f64,
    error_threshold: f64,
) {
    loop {
        match stats.recv().await {
            Ok(snapshot) => info!(
                "dumps={} stacks={} warnings={} errors={} ratio={:.3} [{}]",
                snapshot.dumps,
                snapshot.stacks,
                snapshot.warnings,
                snapshot.errors,
                snapshot.ratio,
                snapshot.health(warning_threshold, error_threshold).as_str()
            ),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("skipped {} statistics updates", missed)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
