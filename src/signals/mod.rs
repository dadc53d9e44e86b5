//! Signal store: the key/value mailbox between the operator and the session loop.
//!
//! Keys are bit-exact with what operator tooling writes. Trigger keys are
//! deleted by the session loop branch that consumes them.

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;

use crate::error::SignalError;

pub use memory::MemorySignalStore;
pub use redis_store::RedisSignalStore;

/// Named keys in the signal store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKey {
    /// Operator requests a verification code.
    SendKey,
    /// Phone number to sign in with.
    Phone,
    /// Code hash returned by the provider for the last code request.
    CodeHash,
    /// Operator-submitted verification code.
    SendedCode,
    /// Operator requests sign-out.
    Logout,
    /// Session is authenticated.
    Authed,
    /// Client fully initialized.
    ReadyToConnect,
}

impl SignalKey {
    /// The key name as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendKey => "send_key",
            Self::Phone => "phone",
            Self::CodeHash => "code_hash",
            Self::SendedCode => "sended_code",
            Self::Logout => "logout",
            Self::Authed => "authed",
            Self::ReadyToConnect => "ready_to_connect",
        }
    }
}

impl std::fmt::Display for SignalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key/value store polled by the session loop.
#[async_trait]
pub trait SignalStore: Send + Sync {
    /// Read a key. `None` if absent.
    async fn get(&self, key: SignalKey) -> Result<Option<String>, SignalError>;

    /// Write a key.
    async fn set(&self, key: SignalKey, value: &str) -> Result<(), SignalError>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn delete(&self, key: SignalKey) -> Result<(), SignalError>;

    /// Read a key, treating an empty value as absent.
    async fn raised(&self, key: SignalKey) -> Result<Option<String>, SignalError> {
        Ok(self.get(key).await?.filter(|v| !v.is_empty()))
    }

    /// Whether a key holds a non-empty value.
    async fn is_raised(&self, key: SignalKey) -> Result<bool, SignalError> {
        Ok(self.raised(key).await?.is_some())
    }

    /// Read a key that must be present.
    async fn require(&self, key: SignalKey) -> Result<String, SignalError> {
        self.raised(key)
            .await?
            .ok_or_else(|| SignalError::Missing(key.as_str().to_string()))
    }
}
