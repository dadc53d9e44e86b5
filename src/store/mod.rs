//! Persistence layer: libSQL-backed storage for chats and keyword rules.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Chat, ChatUpsert, Database, Keyword};
