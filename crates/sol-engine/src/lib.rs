//! Cache manager service for the Sol engine.
//!
//! Wraps the synchronous algorithms in `sol-core` with persistence,
//! cancellable maintenance timers, and a broadcast bus of
//! [`CacheEvent`](sol_types::CacheEvent) notifications.
//!
//! # Modules
//!
//! - [`manager`] -- [`CacheManager`]: location lifecycle, maintenance
//!   passes, and consumer reads.
//! - [`timers`] -- Per-(location, purpose) wake-up timers and the
//!   [`Wake`] message.
//! - [`error`] -- [`EngineError`].

pub mod error;
pub mod manager;
pub mod timers;

use sol_core::config::{StorageBackendKind, StorageConfig};
use sol_store::{DragonflyStore, FileStore, MemoryStore, StoreBackend};

pub use error::EngineError;
pub use manager::{CacheManager, PassOutcome};
pub use timers::{TimerPurpose, Wake};

/// Open the store selected by `config`.
///
/// # Errors
///
/// Returns [`EngineError::Store`] if the `Dragonfly` connection fails.
pub async fn open_store(config: &StorageConfig) -> Result<StoreBackend, EngineError> {
    let store = match config.backend {
        StorageBackendKind::Memory => StoreBackend::Memory(MemoryStore::new()),
        StorageBackendKind::File => StoreBackend::File(FileStore::new(config.path.clone())),
        StorageBackendKind::Dragonfly => {
            StoreBackend::Dragonfly(DragonflyStore::connect(&config.dragonfly_url).await?)
        }
    };
    tracing::info!(backend = ?config.backend, "Store opened");
    Ok(store)
}
