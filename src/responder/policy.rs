//! Reply policy: turns a keyword match into a reply decision.

use std::sync::Arc;

use crate::error::DatabaseError;
use crate::store::{Chat, Database, Keyword};

/// What to do about a matched keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyDecision {
    /// The chat is inactive; do not answer.
    Suppressed,
    /// Answer right away.
    ReplyNow { text: String },
    /// Answer after `delay_secs` seconds.
    ReplyLater { text: String, delay_secs: u32 },
}

impl ReplyDecision {
    pub fn is_suppressed(&self) -> bool {
        matches!(self, Self::Suppressed)
    }
}

/// Decides whether and when a matched keyword is answered.
///
/// The active flag is re-read at decision time. A one-time-answer chat is
/// deactivated on its first match, before the answer is decided, so the
/// match that deactivates it is still answered if the chat was active.
pub struct ReplyPolicy {
    store: Arc<dyn Database>,
}

impl ReplyPolicy {
    pub fn new(store: Arc<dyn Database>) -> Self {
        Self { store }
    }

    pub async fn decide(
        &self,
        chat: &Chat,
        keyword: &Keyword,
    ) -> Result<ReplyDecision, DatabaseError> {
        let Some(is_active) = self.store.chat_is_active(chat.id).await? else {
            tracing::warn!(chat_id = chat.id, "Chat disappeared before reply decision");
            return Ok(ReplyDecision::Suppressed);
        };

        if chat.one_time_answer {
            self.store.set_chat_active(chat.id, false).await?;
            tracing::info!(
                chat_id = chat.id,
                keyword_id = keyword.id,
                "One-time-answer chat deactivated"
            );
        }

        if !is_active {
            return Ok(ReplyDecision::Suppressed);
        }

        let text = keyword.answer.clone();
        Ok(match keyword.answer_in_seconds {
            0 => ReplyDecision::ReplyNow { text },
            delay_secs => ReplyDecision::ReplyLater { text, delay_secs },
        })
    }
}
