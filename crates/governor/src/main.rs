//! Pipeline governor - host resource governor daemon
//!
//! Samples memory and CPU for this host, keeps thread-count telemetry, and
//! exposes health, status and metrics endpoints for dashboards.

use anyhow::Result;
use governor_lib::ResourceManager;
use pipeline_governor::{api, config::DaemonConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting pipeline-governor");

    let config = DaemonConfig::load()?;
    info!(
        api_port = config.api_port,
        max_threads = config.governor.max_threads,
        sampling_interval_secs = config.governor.sampling_interval_secs,
        "Governor configured"
    );

    let manager = Arc::new(ResourceManager::new(config.governor.clone())?);
    manager.start()?;

    let app_state = Arc::new(api::AppState::new(manager.clone()));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));
    let status_handle = tokio::spawn(log_status(manager.clone(), config.status_log_interval()));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    manager.stop().await;
    status_handle.abort();
    api_handle.abort();

    Ok(())
}

/// Periodically log a one-line status summary
async fn log_status(manager: Arc<ResourceManager>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let status = manager.status();

        if status.pressure.worst_level() >= governor_lib::PressureLevel::High {
            warn!(
                event = "status",
                rss_mb = status.memory.rss_mb,
                cpu_percent = status.cpu.percent,
                memory_pressure = %status.pressure.memory_pressure,
                cpu_pressure = %status.pressure.cpu_pressure,
                recommended_action = %status.pressure.recommended_action,
                estimated_threads = status.estimated_threads,
                leak_suspected = status.memory_leak.is_some(),
                "Governor status"
            );
        } else {
            info!(
                event = "status",
                rss_mb = status.memory.rss_mb,
                cpu_percent = status.cpu.percent,
                memory_pressure = %status.pressure.memory_pressure,
                cpu_pressure = %status.pressure.cpu_pressure,
                estimated_threads = status.estimated_threads,
                leak_suspected = status.memory_leak.is_some(),
                "Governor status"
            );
        }
    }
}
