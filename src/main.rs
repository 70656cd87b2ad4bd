//! # Metering Gateway
//!
//! Subscription metering and budget enforcement gateway for AI chat
//! workloads.
//!
//! ## Features
//!
//! - Signed subscription webhook ingestion with constant-time verification
//! - Per-user daily quota and budget-ceiling enforcement, atomic under
//!   concurrency
//! - Tier-bounded model selection and fixed-point cost accounting
//! - Idempotent daily usage snapshots with trend and rollup queries
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults (in-memory store)
//! metering-gateway
//!
//! # Start with a config file
//! METERING_CONFIG=/path/to/metering.yaml metering-gateway
//!
//! # Environment overrides
//! METERING_PORT=9000 METERING_DATABASE_URL=postgres://... metering-gateway
//! ```

use metering_config::load_config;
use metering_server::{
    init_logging, serve, shutdown_signal, AppState, LoggingConfig, ShutdownCoordinator,
};
use metering_store::{MemoryStore, MeteringStore, PostgresStore};
use std::sync::Arc;
use tracing::{error, info};

/// Application entry point
#[tokio::main]
async fn main() {
    // Initialize logging first
    if let Err(e) = init_logging(&LoggingConfig::new().with_level("info")) {
        eprintln!("Failed to initialize logging: {e}");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting metering gateway"
    );

    if let Err(e) = run().await {
        error!(error = %e, "Application failed");
        std::process::exit(1);
    }
}

/// Main application logic
async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config().await?;

    info!(
        host = %config.server.host,
        port = config.server.port,
        "Configuration loaded"
    );

    let store = create_store(&config).await?;
    let catalog = config.tier_catalog()?;
    let prices = config.price_table();

    let state = AppState::builder()
        .config(config.clone())
        .store(store)
        .catalog(catalog)
        .prices(prices)
        .build()?;

    let coordinator = ShutdownCoordinator::new();

    // Daily snapshot scheduler
    let scheduler = if config.snapshots.enabled {
        Some(tokio::spawn(metering_snapshots::run_daily(
            state.snapshots.clone(),
            coordinator.subscribe(),
        )))
    } else {
        info!("Snapshot scheduler disabled by configuration");
        None
    };

    let host = config.server.host.clone();
    let port = config.server.port;
    let server_shutdown = coordinator.subscribe();
    let mut server_task =
        tokio::spawn(async move { serve(state, &host, port, server_shutdown).await });

    tokio::select! {
        result = &mut server_task => result??,
        () = shutdown_signal() => {
            // Trigger the coordinator and let in-flight requests drain.
            coordinator.trigger("signal");
            server_task.await??;
        }
    }

    coordinator.trigger("server stopped");
    if let Some(handle) = scheduler {
        let _ = handle.await;
    }

    info!("Metering gateway stopped");
    Ok(())
}

/// Select the storage backend from configuration.
async fn create_store(
    config: &metering_config::MeteringConfig,
) -> Result<Arc<dyn MeteringStore>, Box<dyn std::error::Error>> {
    match &config.database.url {
        Some(url) => {
            let store = PostgresStore::connect(url, config.database.max_connections).await?;
            Ok(Arc::new(store))
        }
        None => {
            info!("No database configured, using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
