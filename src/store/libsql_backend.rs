//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{Chat, ChatUpsert, Database, Keyword};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Convert `Option<bool>` to a nullable INTEGER flag.
fn opt_flag(b: Option<bool>) -> libsql::Value {
    match b {
        Some(b) => libsql::Value::Integer(i64::from(b)),
        None => libsql::Value::Null,
    }
}

/// Map a libsql Row to a Chat.
///
/// Column order matches CHAT_COLUMNS.
fn row_to_chat(row: &libsql::Row) -> Result<Chat, libsql::Error> {
    let created_str: String = row.get(4)?;
    Ok(Chat {
        id: row.get(0)?,
        title: row.get::<String>(1).ok(),
        is_active: row.get::<i64>(2)? != 0,
        one_time_answer: row.get::<i64>(3)? != 0,
        created_at: parse_datetime(&created_str),
    })
}

/// Map a libsql Row to a Keyword.
///
/// Column order matches KEYWORD_COLUMNS.
fn row_to_keyword(row: &libsql::Row) -> Result<Keyword, libsql::Error> {
    let delay: i64 = row.get(4)?;
    Ok(Keyword {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        keyword: row.get(2)?,
        answer: row.get(3)?,
        answer_in_seconds: u32::try_from(delay.max(0)).unwrap_or(u32::MAX),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const CHAT_COLUMNS: &str = "id, title, is_active, one_time_answer, created_at";

const KEYWORD_COLUMNS: &str = "id, chat_id, keyword, answer, answer_in_seconds";

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Chats ───────────────────────────────────────────────────────

    async fn get_chat(&self, chat_id: i64) -> Result<Option<Chat>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1"),
                params![chat_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_chat: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let chat = row_to_chat(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_chat row parse: {e}")))?;
                Ok(Some(chat))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_chat: {e}"))),
        }
    }

    async fn chat_is_active(&self, chat_id: i64) -> Result<Option<bool>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT is_active FROM chats WHERE id = ?1",
                params![chat_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("chat_is_active: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let flag: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("chat_is_active row parse: {e}")))?;
                Ok(Some(flag != 0))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("chat_is_active: {e}"))),
        }
    }

    async fn set_chat_active(&self, chat_id: i64, is_active: bool) -> Result<(), DatabaseError> {
        // Single statement in autocommit mode: the update is its own committed transaction.
        self.conn()
            .execute(
                "UPDATE chats SET is_active = ?1 WHERE id = ?2",
                params![i64::from(is_active), chat_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_chat_active: {e}")))?;

        debug!(chat_id, is_active, "Chat active flag updated");
        Ok(())
    }

    async fn upsert_chat(&self, chat: &ChatUpsert) -> Result<Chat, DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO chats (id, title, is_active, one_time_answer)
                 VALUES (?1, ?2, COALESCE(?3, 1), COALESCE(?4, 0))
                 ON CONFLICT (id) DO UPDATE SET
                    title = COALESCE(?2, title),
                    is_active = COALESCE(?3, is_active),
                    one_time_answer = COALESCE(?4, one_time_answer)",
                params![
                    chat.id,
                    opt_text(chat.title.as_deref()),
                    opt_flag(chat.is_active),
                    opt_flag(chat.one_time_answer),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_chat: {e}")))?;

        debug!(chat_id = chat.id, "Chat upserted");
        self.get_chat(chat.id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "chat".into(),
                id: chat.id.to_string(),
            })
    }

    async fn list_chats(&self) -> Result<Vec<Chat>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(&format!("SELECT {CHAT_COLUMNS} FROM chats ORDER BY id ASC"), ())
            .await
            .map_err(|e| DatabaseError::Query(format!("list_chats: {e}")))?;

        let mut chats = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_chat(&row) {
                Ok(chat) => chats.push(chat),
                Err(e) => tracing::warn!("Skipping chat row: {e}"),
            }
        }
        Ok(chats)
    }

    // ── Keywords ────────────────────────────────────────────────────

    async fn keywords_for_chat(&self, chat_id: i64) -> Result<Vec<Keyword>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {KEYWORD_COLUMNS} FROM keywords WHERE chat_id = ?1 ORDER BY id ASC"
                ),
                params![chat_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("keywords_for_chat: {e}")))?;

        let mut keywords = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => match row_to_keyword(&row) {
                    Ok(kw) => keywords.push(kw),
                    Err(e) => tracing::warn!(chat_id, "Skipping keyword row: {e}"),
                },
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("keywords_for_chat: {e}"))),
            }
        }
        Ok(keywords)
    }

    async fn add_keyword(
        &self,
        chat_id: i64,
        keyword: &str,
        answer: &str,
        answer_in_seconds: u32,
    ) -> Result<Keyword, DatabaseError> {
        if self.get_chat(chat_id).await?.is_none() {
            return Err(DatabaseError::NotFound {
                entity: "chat".into(),
                id: chat_id.to_string(),
            });
        }

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "INSERT INTO keywords (chat_id, keyword, answer, answer_in_seconds)
                     VALUES (?1, ?2, ?3, ?4) RETURNING {KEYWORD_COLUMNS}"
                ),
                params![chat_id, keyword, answer, i64::from(answer_in_seconds)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("add_keyword: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("add_keyword: {e}")))?
            .ok_or_else(|| DatabaseError::Query("add_keyword: no row returned".into()))?;
        let stored = row_to_keyword(&row)
            .map_err(|e| DatabaseError::Query(format!("add_keyword row parse: {e}")))?;

        debug!(chat_id, keyword_id = stored.id, "Keyword inserted into DB");
        Ok(stored)
    }

    async fn delete_keyword(&self, id: i64) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute("DELETE FROM keywords WHERE id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_keyword: {e}")))?;
        Ok(count > 0)
    }
}
