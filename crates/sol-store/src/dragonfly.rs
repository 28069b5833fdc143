//! `Dragonfly` (Redis-compatible) store.
//!
//! # Key Patterns
//!
//! | Pattern | Type | Description |
//! |---------|------|-------------|
//! | `sol:checkpoints:{id}` | JSON | Serialized checkpoint cache record |

use fred::prelude::*;
use serde_json::Value;
use sol_types::LocationId;

use crate::{CacheStore, StoreError};

/// Connection handle to a `Dragonfly` instance.
///
/// Wraps a [`fred::prelude::Client`]; clones share the connection.
#[derive(Clone)]
pub struct DragonflyStore {
    client: Client,
}

impl DragonflyStore {
    /// Connect to `Dragonfly` at the given URL.
    ///
    /// The URL follows the Redis URL scheme: `redis://host:port` or
    /// `redis://host:port/db`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the URL cannot be parsed.
    /// Returns [`StoreError::Dragonfly`] if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let config = Config::from_url(url)
            .map_err(|e| StoreError::Config(format!("Invalid Dragonfly URL: {e}")))?;

        let client = Builder::from_config(config).build()?;
        client.init().await?;

        tracing::info!("Connected to Dragonfly");
        Ok(Self { client })
    }

    /// Key holding the blob for `id`.
    pub fn key_for(id: LocationId) -> String {
        format!("sol:checkpoints:{id}")
    }
}

impl CacheStore for DragonflyStore {
    async fn load(&self, id: LocationId) -> Result<Option<Value>, StoreError> {
        let value: Option<String> = self.client.get(Self::key_for(id)).await?;
        match value {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, id: LocationId, blob: &Value) -> Result<(), StoreError> {
        let json = serde_json::to_string(blob)?;
        let _: () = self
            .client
            .set(Self::key_for(id), json.as_str(), None, None, false)
            .await?;
        Ok(())
    }

    async fn remove(&self, id: LocationId) -> Result<(), StoreError> {
        let _: u32 = self.client.del(Self::key_for(id)).await?;
        Ok(())
    }
}
