//! verso-worker - background version cleanup binary.
//!
//! Configuration comes from the file named by `VERSO_CONFIG` when set,
//! otherwise from `VERSO_*` environment variables. `VERSO_PROVIDERS` may name
//! a JSON provider catalog used to protect connection secrets.
//!
//! Pass `--once` to run a single cleanup and exit.

use std::sync::Arc;

use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use verso_core::{CleanupRuntime, VersioningConfig};
use verso_entities::{register_all, PlaintextProtector, ProviderCatalog};

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
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

fn load_config() -> Result<VersioningConfig, Box<dyn std::error::Error>> {
    match std::env::var("VERSO_CONFIG") {
        Ok(path) => {
            info!(path = %path, "Loading configuration file");
            Ok(VersioningConfig::from_file(path)?)
        }
        Err(_) => Ok(VersioningConfig::from_env()?),
    }
}

fn load_catalog() -> Result<ProviderCatalog, Box<dyn std::error::Error>> {
    match std::env::var("VERSO_PROVIDERS") {
        Ok(path) => Ok(ProviderCatalog::from_json_file(path)?),
        Err(_) => {
            warn!("VERSO_PROVIDERS not set, connection settings will not be treated as secrets");
            Ok(ProviderCatalog::new())
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive(Level::INFO.into())
                .add_directive("verso_worker=debug".parse()?),
        )
        .init();

    let run_once = std::env::args().skip(1).any(|arg| arg == "--once");

    let config = load_config()?;
    let mut runtime = CleanupRuntime::new(config).await?;

    let catalog = Arc::new(load_catalog()?);
    let versions = runtime.service();
    let _services = register_all(&versions, catalog, Arc::new(PlaintextProtector), runtime.json_diff());
    info!(
        entity_types = ?runtime.registry().supported_entity_types(),
        "Registered versioned entity types"
    );

    if run_once {
        match runtime.scheduler().run_now().await? {
            Some(result) => info!(
                deleted = result.total_deleted(),
                remaining = result.remaining_versions,
                skipped = result.was_skipped,
                "Cleanup finished"
            ),
            None => info!("Cleanup did not run"),
        }
        return Ok(());
    }

    runtime.start().await?;
    info!("Version cleanup worker running");

    shutdown_signal().await;
    info!("Shutdown signal received, stopping scheduler...");

    runtime.shutdown().await?;
    info!("Worker stopped cleanly");
    Ok(())
}
