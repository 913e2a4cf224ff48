//! Headless host bridge for the quest progress tracker.
//!
//! Reads `HostEvent` messages as newline-delimited JSON from stdin and
//! writes `TrackerEvent` messages to stdout.
//!
//! All tracing output goes to stderr (and optionally a daily log file) so
//! that stdout remains a clean JSON protocol channel.

use anyhow::Context;
use quest_tracker::client::HttpTaskClient;
use quest_tracker::config::{LoggingConfig, SchedulerConfig};
use quest_tracker::host::stdio::run_stdio_bridge;
use quest_tracker::scheduler::Scheduler;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn env_filter(logging: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter))
}

/// The returned guard must live until `main` returns to flush the file writer.
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let Some(dir) = &logging.dir else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(env_filter(logging))
            .init();
        return Ok(None);
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("cannot create log dir {}", dir.display()))?;
    let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix("quest-tracker")
        .filename_suffix("log")
        .build(dir)
        .context("failed to create log appender")?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(env_filter(logging))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var_os("QUEST_TRACKER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(SchedulerConfig::default_config_path);
    let config = SchedulerConfig::load_or_default(&config_path)
        .with_context(|| format!("cannot load config from {}", config_path.display()))?;

    let _guard = init_tracing(&config.logging)?;
    tracing::info!(config = %config_path.display(), "quest-tracker-host starting");

    let client = HttpTaskClient::from_config(&config.remote)?;
    let scheduler = Scheduler::from_config(&config, Arc::new(client))?;

    run_stdio_bridge(scheduler).await.map_err(|e| {
        tracing::error!(error = %e, "quest-tracker-host exited with error");
        anyhow::anyhow!("quest-tracker-host failed: {e}")
    })?;

    tracing::info!("quest-tracker-host shut down cleanly");
    Ok(())
}
