//! Error types for the persistence layer.
//!
//! All adapters report failures through [`StoreError`], which wraps the
//! underlying I/O, [`fred`], and JSON errors.

/// Errors that can occur while loading, saving, or removing a cache blob.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A `Dragonfly`/Redis operation failed.
    #[error("Dragonfly error: {0}")]
    Dragonfly(#[from] fred::error::Error),

    /// A blob could not be encoded or decoded as JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store was configured incorrectly.
    #[error("Configuration error: {0}")]
    Config(String),
}
