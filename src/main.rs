//! Rentproxy Server - Entry Point
//!
//! Starts the API server and, when an interval is configured, the bump scheduler,
//! with graceful shutdown support.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rentproxy::api::{ApiServer, AppState};
use rentproxy::clock::SystemClock;
use rentproxy::config::{Config, LogConfig};
use rentproxy::proxy::{FetcherConfig, HttpFetcher};
use rentproxy::repository::HttpTenantStore;
use rentproxy::services::{BumpScheduler, BumpSchedulerConfig, BumpSchedulerHandle};

#[tokio::main]
async fn main() -> rentproxy::Result<()> {
    // Load configuration
    let config = Config::from_env()?;
    init_tracing(&config.log);

    info!("Starting Rentproxy");

    let store = Arc::new(HttpTenantStore::new(config.store.clone())?);
    let fetcher = Arc::new(HttpFetcher::new(FetcherConfig::from(&config.proxy)));
    let bump_interval = config.bump.interval;

    let state = AppState::new(config, store, fetcher, Arc::new(SystemClock));
    info!(
        entry = %state.config.proxy.entry_path,
        site = %state.config.site.origin,
        "Configuration loaded"
    );

    // Start bump scheduler
    let (scheduler_handle, scheduler_shutdown) = BumpSchedulerHandle::new();
    let scheduler_task = if bump_interval.is_zero() {
        info!("Bump scheduler disabled; runs only via /bump");
        None
    } else {
        let scheduler = BumpScheduler::new(
            state.engine.clone(),
            BumpSchedulerConfig {
                interval: bump_interval,
            },
        );
        Some(tokio::spawn(async move {
            scheduler.run(scheduler_shutdown).await;
        }))
    };

    // Start API server
    let (shutdown_tx, api_shutdown) = watch::channel(false);
    let api_server = ApiServer::new(state);
    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(api_shutdown).await {
            error!("API server error: {}", e);
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    scheduler_handle.shutdown();

    let _ = api_task.await;
    if let Some(task) = scheduler_task {
        let _ = task.await;
    }

    info!("Rentproxy stopped");
    Ok(())
}

/// RUST_LOG wins over the configured level
fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "rentproxy={level},tower_http={level}",
            level = log.level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if log.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
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
