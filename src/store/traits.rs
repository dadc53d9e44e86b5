//! `Database` trait: async interface for chat and keyword persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;

/// A chat the responder watches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub title: Option<String>,
    /// Replies are only sent while this is set.
    pub is_active: bool,
    /// Deactivate the chat after its first keyword match.
    pub one_time_answer: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields accepted when creating or updating a chat.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatUpsert {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub one_time_answer: Option<bool>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// A keyword rule: comma-separated triggers mapped to one answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyword {
    pub id: i64,
    pub chat_id: i64,
    /// Comma-separated raw keyword strings, in evaluation order.
    pub keyword: String,
    pub answer: String,
    /// Delay before answering; 0 answers immediately.
    pub answer_in_seconds: u32,
}

impl Keyword {
    /// Split the rule into its sub-keywords, in listed order.
    pub fn sub_keywords(&self) -> impl Iterator<Item = &str> {
        self.keyword.split(',')
    }
}

/// Backend-agnostic database trait.
#[async_trait]
pub trait Database: Send + Sync {
    /// Create tables and apply pending migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Chats ───────────────────────────────────────────────────────

    /// Get a chat by id.
    async fn get_chat(&self, chat_id: i64) -> Result<Option<Chat>, DatabaseError>;

    /// Read only the `is_active` flag. `None` if the chat does not exist.
    async fn chat_is_active(&self, chat_id: i64) -> Result<Option<bool>, DatabaseError>;

    /// Persist the `is_active` flag for a chat.
    async fn set_chat_active(&self, chat_id: i64, is_active: bool) -> Result<(), DatabaseError>;

    /// Insert a chat, or update the provided fields of an existing one.
    async fn upsert_chat(&self, chat: &ChatUpsert) -> Result<Chat, DatabaseError>;

    /// List all chats ordered by id.
    async fn list_chats(&self) -> Result<Vec<Chat>, DatabaseError>;

    // ── Keywords ────────────────────────────────────────────────────

    /// All keyword rules for a chat, in retrieval (insertion) order.
    async fn keywords_for_chat(&self, chat_id: i64) -> Result<Vec<Keyword>, DatabaseError>;

    /// Add a keyword rule. Returns the stored row.
    async fn add_keyword(
        &self,
        chat_id: i64,
        keyword: &str,
        answer: &str,
        answer_in_seconds: u32,
    ) -> Result<Keyword, DatabaseError>;

    /// Delete a keyword rule. Returns whether a row was removed.
    async fn delete_keyword(&self, id: i64) -> Result<bool, DatabaseError>;
}
