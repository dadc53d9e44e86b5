//! Redis-backed signal store.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::info;

use super::{SignalKey, SignalStore};
use crate::error::SignalError;

/// Signal store on a Redis server, shared with operator tooling.
pub struct RedisSignalStore {
    manager: ConnectionManager,
}

impl RedisSignalStore {
    /// Connect to Redis. The connection manager reconnects on its own after drops.
    pub async fn connect(redis_url: &str) -> Result<Self, SignalError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| SignalError::Connection(format!("invalid redis url {redis_url}: {e}")))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| SignalError::Connection(format!("failed to connect to redis: {e}")))?;
        info!(url = %redis_url, "Connected to Redis signal store");
        Ok(Self { manager })
    }

    fn command_error(command: &str, key: SignalKey, e: redis::RedisError) -> SignalError {
        SignalError::Command {
            command: command.to_string(),
            key: key.as_str().to_string(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl SignalStore for RedisSignalStore {
    async fn get(&self, key: SignalKey) -> Result<Option<String>, SignalError> {
        let mut conn = self.manager.clone();
        conn.get::<_, Option<String>>(key.as_str())
            .await
            .map_err(|e| Self::command_error("GET", key, e))
    }

    async fn set(&self, key: SignalKey, value: &str) -> Result<(), SignalError> {
        let mut conn = self.manager.clone();
        conn.set::<_, _, ()>(key.as_str(), value)
            .await
            .map_err(|e| Self::command_error("SET", key, e))
    }

    async fn delete(&self, key: SignalKey) -> Result<(), SignalError> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key.as_str())
            .await
            .map_err(|e| Self::command_error("DEL", key, e))
    }
}
