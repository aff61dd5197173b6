//! DynamicTp Server
//!
//! Runs the executors declared in the configuration file and keeps them in
//! line with that file while they run:
//! - Executors are built from `[[dtp.executors]]` and registered at startup
//! - The startup binder seeds notify items and alarm limiters
//! - The alarm monitor checks liveness, capacity and rejections
//! - The config watcher re-reads the file and refreshes executors on change

mod file_source;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use dtp_config::{AppConfig, ConfigLoader};
use dtp_core::{
    spawn_alarm_monitor, spawn_config_watch_task, AlarmConfig, AlarmLimiter, AlarmMonitor,
    ConfigWatchService, DynamicExecutor, ExecutorRegistry, NotificationDispatcher, Refresher,
    StartupBinder,
};

use crate::file_source::FileConfigSource;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    dtp_common::logging::init_logging("dtp-server");

    info!("Starting DynamicTp server");

    let loader = ConfigLoader::new();
    let config = loader.load()?;
    let config_path = loader.resolve_path();

    if !config.dtp.enabled {
        warn!("DynamicTp disabled in configuration (dtp.enabled = false), exiting");
        return Ok(());
    }

    let registry = Arc::new(ExecutorRegistry::new());
    let limiter = Arc::new(AlarmLimiter::new());
    let dispatcher = Arc::new(NotificationDispatcher::from_platforms(
        &config.dtp.platforms,
        config.dispatcher.backlog_capacity,
    ));

    register_executors(&registry, &config);

    StartupBinder::new(registry.clone(), limiter.clone()).bind(&config.dtp);

    let refresher = Arc::new(Refresher::new(registry.clone(), limiter.clone(), dispatcher.clone()));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut tasks = Vec::new();

    if config.alarm.enabled {
        let monitor = Arc::new(AlarmMonitor::new(
            AlarmConfig {
                enabled: true,
                check_interval: Duration::from_secs(config.alarm.check_interval_seconds),
            },
            registry.clone(),
            limiter.clone(),
            dispatcher.clone(),
        ));
        tasks.push(spawn_alarm_monitor(monitor, shutdown_tx.clone()));
    }

    match (config.watch.enabled, config_path) {
        (true, Some(path)) => {
            info!(path = %path.display(), "Watching configuration file");
            let watch = Arc::new(ConfigWatchService::new(
                Arc::new(FileConfigSource::new(path)),
                refresher.clone(),
                Duration::from_secs(config.watch.poll_interval_seconds),
            ));
            if let Err(e) = watch.mark_applied(&config.dtp) {
                warn!(error = %e, "Could not record startup configuration, first poll will refresh");
            }
            tasks.push(spawn_config_watch_task(watch, shutdown_tx.clone()));
        }
        (true, None) => warn!("No configuration file found, config watch disabled"),
        (false, _) => info!("Config watch disabled"),
    }

    info!(
        executors = registry.len(),
        names = ?registry.list_names(),
        "DynamicTp server started. Press Ctrl+C to shutdown."
    );

    shutdown_signal().await;
    info!("Shutdown signal received...");

    let _ = shutdown_tx.send(());
    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "Background task failed");
        }
    }

    registry.shutdown_all().await;
    dispatcher.shutdown().await;

    info!("DynamicTp server shutdown complete");
    Ok(())
}

/// Build and register one executor per configured record. Records that do
/// not describe a valid executor are logged and skipped.
fn register_executors(registry: &ExecutorRegistry, config: &AppConfig) {
    for props in &config.dtp.executors {
        if props.thread_pool_name.trim().is_empty() {
            warn!("Executor record without thread_pool_name skipped");
            continue;
        }
        match DynamicExecutor::from_properties(props) {
            Ok(executor) => registry.register(executor, "config file"),
            Err(e) => error!(
                executor = %props.thread_pool_name,
                error = %e,
                "Failed to create executor"
            ),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
