//! Sol daemon: keeps checkpoint, solar event, and solstice caches current
//! for every configured location.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `sol-config.yaml` (or `SOL_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Open the configured store
//! 4. Create the cache manager and start the wake dispatcher
//! 5. Register every configured location
//! 6. Log cache notifications from the bus
//! 7. Run until Ctrl-C, then cancel timers and stop the dispatcher

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use sol_core::clock::SystemClock;
use sol_core::config::{LoggingConfig, SolConfig};
use sol_core::oracle::NoaaOracle;
use sol_engine::CacheManager;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration.
    let (config, config_path) = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!(
        config = %config_path.display(),
        locations = config.locations.len(),
        backend = ?config.storage.backend,
        "sol-daemon starting"
    );

    // 3. Open the store.
    let store = sol_engine::open_store(&config.storage)
        .await
        .context("failed to open checkpoint store")?;

    // 4. Create the manager and start the dispatcher.
    let manager = CacheManager::new(NoaaOracle::new(), store, Arc::new(SystemClock), &config);
    let dispatcher = manager.start()?;

    // 5. Register configured locations. One bad location does not stop the rest.
    for location in &config.locations {
        let id = location.id;
        match manager.add_location(location.clone()).await {
            Ok(outcome) => info!(location = %id, outcome = ?outcome, "Location ready"),
            Err(e) => warn!(location = %id, error = %e, "Location not ready, retry armed"),
        }
    }

    // 6. Log cache notifications.
    let mut events = manager.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(payload) => {
                        tracing::debug!(location = %event.location(), %payload, "Cache event");
                    }
                    Err(e) => warn!(error = %e, "Failed to serialize cache event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger lagged, skipping ahead");
                }
                Err(RecvError::Closed) => return,
            }
        }
    });

    // 7. Run until interrupted.
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    manager.shutdown();
    dispatcher.await.context("wake dispatcher panicked")?;

    info!("sol-daemon shutdown complete");
    Ok(())
}

/// Load configuration from `SOL_CONFIG`, falling back to `sol-config.yaml`
/// in the working directory. A missing file yields the defaults.
fn load_config() -> anyhow::Result<(SolConfig, PathBuf)> {
    let path = std::env::var("SOL_CONFIG").map_or_else(|_| PathBuf::from("sol-config.yaml"), PathBuf::from);
    if !path.exists() {
        let mut config = SolConfig::default();
        config.apply_env_overrides();
        return Ok((config, path));
    }
    let config = SolConfig::from_file(&path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    Ok((config, path))
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
