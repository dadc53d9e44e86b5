//! Deferred-reply scheduler.
//!
//! Each deferred reply is a one-shot tokio task that sleeps until its run time,
//! sends once as a reply to the originating message, and removes itself from
//! the tracking map.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::channels::ChatClient;
use crate::error::SchedulerError;

/// A reply waiting for its send time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredReply {
    pub id: Uuid,
    pub chat_id: i64,
    /// Message the reply quotes.
    pub message_id: i64,
    pub text: String,
    pub run_at: DateTime<Utc>,
}

impl DeferredReply {
    pub fn new(chat_id: i64, message_id: i64, text: impl Into<String>, run_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            chat_id,
            message_id,
            text: text.into(),
            run_at,
        }
    }
}

/// Registers one-shot deferred sends.
#[async_trait]
pub trait DeferredScheduler: Send + Sync {
    /// Register a reply. Returns its job id.
    async fn schedule(&self, reply: DeferredReply) -> Result<Uuid, SchedulerError>;
}

/// Tokio-task scheduler for deferred replies.
pub struct ReplyScheduler {
    client: Arc<dyn ChatClient>,
    max_pending: usize,
    jobs: Arc<RwLock<HashMap<Uuid, JoinHandle<()>>>>,
    shut_down: AtomicBool,
}

impl ReplyScheduler {
    pub fn new(client: Arc<dyn ChatClient>, max_pending: usize) -> Self {
        Self {
            client,
            max_pending,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Number of replies not yet sent.
    pub async fn pending_count(&self) -> usize {
        self.jobs
            .read()
            .await
            .values()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Abort every pending reply and refuse new ones.
    pub async fn stop_all(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        let mut jobs = self.jobs.write().await;
        let count = jobs.len();
        for (_, handle) in jobs.drain() {
            handle.abort();
        }
        if count > 0 {
            tracing::info!(count, "Aborted pending replies");
        }
    }
}

#[async_trait]
impl DeferredScheduler for ReplyScheduler {
    async fn schedule(&self, reply: DeferredReply) -> Result<Uuid, SchedulerError> {
        let id = reply.id;
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShutDown { id });
        }

        // Held across spawn + insert so the task's self-removal cannot run first.
        let mut jobs = self.jobs.write().await;
        jobs.retain(|_, h| !h.is_finished());
        if jobs.len() >= self.max_pending {
            return Err(SchedulerError::MaxJobsExceeded {
                max: self.max_pending,
            });
        }

        let run_at = reply.run_at;
        let client = Arc::clone(&self.client);
        let tracker = Arc::clone(&self.jobs);
        let handle = tokio::spawn(async move {
            let wait = (reply.run_at - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            if let Err(e) = client
                .send_message(reply.chat_id, &reply.text, Some(reply.message_id))
                .await
            {
                tracing::warn!(
                    job_id = %id,
                    chat_id = reply.chat_id,
                    message_id = reply.message_id,
                    "Deferred reply failed: {e}"
                );
            } else {
                tracing::debug!(job_id = %id, chat_id = reply.chat_id, "Deferred reply sent");
            }

            tracker.write().await.remove(&id);
        });
        jobs.insert(id, handle);

        tracing::debug!(job_id = %id, %run_at, pending = jobs.len(), "Scheduled reply");
        Ok(id)
    }
}
