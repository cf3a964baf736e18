//! gallery-guard server.
//!
//! Serves the gallery application behind the layered security pipeline.
//!
//! ```text
//!   client ──▶ identity ─▶ transport ─▶ headers ─▶ admission ─▶ session
//!                                                                 │
//!   client ◀── error boundary ◀─ handler ◀─ sanitize ◀─ csrf ◀───┘
//!
//!   background: maintenance timer (prune), signal handler (shutdown)
//! ```
//!
//! Configuration comes from the TOML file named by `GUARD_CONFIG`, layered
//! over the preset for `GUARD_ENV` (default `development`).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use gallery_guard::config::{config_from_env, load_config};
use gallery_guard::http::{gallery_router, GuardServer};
use gallery_guard::lifecycle::{signals, spawn_maintenance, Shutdown};
use gallery_guard::observability::{logging, metrics};
use gallery_guard::security::SecurityPipeline;

const CONFIG_VAR: &str = "GUARD_CONFIG";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::var_os(CONFIG_VAR) {
        Some(path) => load_config(&PathBuf::from(path))?,
        None => config_from_env()?,
    };

    logging::init(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = config.environment.as_str(),
        "gallery-guard starting"
    );

    tracing::info!(
        bind_address = %config.listener.bind_address,
        tls = config.listener.tls.is_some(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let maintenance_interval = Duration::from_secs(config.maintenance.interval_secs);

    let pipeline = Arc::new(SecurityPipeline::new(config));
    let shutdown = Shutdown::new();
    let maintenance = spawn_maintenance(pipeline.clone(), maintenance_interval, shutdown.clone());
    tokio::spawn(signals::wait_for_signal(shutdown.clone()));

    let server = GuardServer::new(pipeline, gallery_router());
    server.run(listener, shutdown).await?;

    if let Err(e) = maintenance.await {
        tracing::error!(error = %e, "Maintenance task failed");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
