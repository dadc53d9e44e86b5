//! Response dispatcher: executes reply decisions against the chat client.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::channels::ChatClient;
use crate::error::ChannelError;
use crate::worker::{DeferredReply, DeferredScheduler};

/// Sends replies now or hands them to the deferred scheduler.
pub struct ResponseDispatcher {
    client: Arc<dyn ChatClient>,
    scheduler: Arc<dyn DeferredScheduler>,
}

impl ResponseDispatcher {
    pub fn new(client: Arc<dyn ChatClient>, scheduler: Arc<dyn DeferredScheduler>) -> Self {
        Self { client, scheduler }
    }

    /// Send `text` to the chat immediately.
    pub async fn send_now(&self, chat_id: i64, text: &str) -> Result<(), ChannelError> {
        self.client.send_message(chat_id, text, None).await?;
        tracing::info!(chat_id, "Reply sent");
        Ok(())
    }

    /// Register a reply to `message_id` that goes out at or after `at`.
    ///
    /// Registration failures are logged; the message counts as handled either way.
    pub async fn schedule_at(&self, at: DateTime<Utc>, chat_id: i64, message_id: i64, text: &str) {
        match self
            .scheduler
            .schedule(DeferredReply::new(chat_id, message_id, text, at))
            .await
        {
            Ok(job_id) => {
                tracing::info!(chat_id, message_id, job_id = %job_id, run_at = %at, "Reply scheduled");
            }
            Err(e) => {
                tracing::error!(chat_id, message_id, "Failed to schedule reply: {e}");
            }
        }
    }
}
