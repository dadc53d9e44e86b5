//! In-process signal store.
//!
//! Used when no Redis URL is configured; the operator API and the session
//! loop then share this map directly.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{SignalKey, SignalStore};
use crate::error::SignalError;

/// Signal store backed by a map behind an async lock.
#[derive(Debug, Default)]
pub struct MemorySignalStore {
    values: RwLock<HashMap<SignalKey, String>>,
}

impl MemorySignalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignalStore for MemorySignalStore {
    async fn get(&self, key: SignalKey) -> Result<Option<String>, SignalError> {
        Ok(self.values.read().await.get(&key).cloned())
    }

    async fn set(&self, key: SignalKey, value: &str) -> Result<(), SignalError> {
        self.values.write().await.insert(key, value.to_string());
        Ok(())
    }

    async fn delete(&self, key: SignalKey) -> Result<(), SignalError> {
        self.values.write().await.remove(&key);
        Ok(())
    }
}
