//! Error types for autoreply.

use uuid::Uuid;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Signal store error: {0}")]
    Signal(#[from] SignalError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Keyword error: {0}")]
    Match(#[from] MatchError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Chat client (transport) errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Channel {name} is not connected")]
    NotConnected { name: String },

    #[error("Failed to send message on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Phone number is invalid: {phone}")]
    PhoneNumberInvalid { phone: String },

    #[error("Authentication failed for channel {name}: {reason}")]
    AuthFailed { name: String, reason: String },

    #[error("Channel {name} does not support {operation}")]
    Unsupported { name: String, operation: String },

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Signal store errors.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("Signal store connection failed: {0}")]
    Connection(String),

    #[error("Signal store command {command} failed for key {key}: {reason}")]
    Command {
        command: String,
        key: String,
        reason: String,
    },

    #[error("Required signal {0} is missing")]
    Missing(String),
}

/// Deferred-reply scheduler errors.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Maximum pending replies ({max}) exceeded")]
    MaxJobsExceeded { max: usize },

    #[error("Scheduler is shut down, cannot register job {id}")]
    ShutDown { id: Uuid },
}

/// Keyword compilation errors.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("Keyword {keyword:?} did not compile: {source}")]
    InvalidPattern {
        keyword: String,
        #[source]
        source: regex::Error,
    },
}
