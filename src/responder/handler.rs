//! Message handler: scans a chat's keyword rules and answers the first match.

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::channels::{ChatClient, IncomingMessage};
use crate::error::{ChannelError, Error};
use crate::responder::dispatcher::ResponseDispatcher;
use crate::responder::matcher;
use crate::responder::policy::{ReplyDecision, ReplyPolicy};
use crate::store::{Chat, Database, Keyword};

/// How a scan over one message ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Outgoing message, or a chat the store does not know.
    Filtered,
    /// No sub-keyword matched.
    Exhausted,
    /// A sub-keyword matched and scanning stopped.
    Matched {
        keyword_id: i64,
        sub_keyword: String,
        decision: ReplyDecision,
    },
}

/// Orchestrates matcher, policy and dispatcher for each incoming message.
pub struct MessageHandler {
    store: Arc<dyn Database>,
    policy: ReplyPolicy,
    dispatcher: ResponseDispatcher,
    subscription: Mutex<Option<JoinHandle<()>>>,
}

impl MessageHandler {
    pub fn new(store: Arc<dyn Database>, dispatcher: ResponseDispatcher) -> Self {
        Self {
            policy: ReplyPolicy::new(Arc::clone(&store)),
            store,
            dispatcher,
            subscription: Mutex::new(None),
        }
    }

    /// Subscribe to the client's messages, replacing any earlier subscription.
    ///
    /// Each message is handled on its own task.
    pub async fn register(self: &Arc<Self>, client: &dyn ChatClient) -> Result<(), ChannelError> {
        let mut stream = client.updates().await?;
        let handler = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    handler.handle(&msg).await;
                });
            }
            tracing::debug!("Message subscription ended");
        });

        if let Some(previous) = self.subscription.lock().await.replace(task) {
            previous.abort();
            tracing::debug!("Replaced previous message subscription");
        }
        tracing::info!(client = client.name(), "Message handler registered");
        Ok(())
    }

    /// Scan one message against its chat's keyword rules.
    pub async fn handle(&self, msg: &IncomingMessage) -> ScanOutcome {
        if msg.outgoing {
            return ScanOutcome::Filtered;
        }

        let chat = match self.store.get_chat(msg.chat_id).await {
            Ok(Some(chat)) => chat,
            Ok(None) => return ScanOutcome::Filtered,
            Err(e) => {
                tracing::error!(chat_id = msg.chat_id, "Failed to load chat: {e}");
                return ScanOutcome::Filtered;
            }
        };

        let keywords = match self.store.keywords_for_chat(chat.id).await {
            Ok(k) => k,
            Err(e) => {
                tracing::error!(chat_id = chat.id, "Failed to load keywords: {e}");
                return ScanOutcome::Exhausted;
            }
        };

        for keyword in &keywords {
            for raw in keyword.sub_keywords() {
                match self.evaluate(&chat, keyword, raw, msg).await {
                    Ok(Some(decision)) => {
                        tracing::info!(
                            chat_id = chat.id,
                            message_id = msg.message_id,
                            keyword_id = keyword.id,
                            sub_keyword = raw.trim(),
                            ?decision,
                            "Keyword matched"
                        );
                        return ScanOutcome::Matched {
                            keyword_id: keyword.id,
                            sub_keyword: raw.trim().to_string(),
                            decision,
                        };
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(
                            chat_id = chat.id,
                            keyword_id = keyword.id,
                            sub_keyword = raw.trim(),
                            "Keyword evaluation failed: {e}"
                        );
                    }
                }
            }
        }

        ScanOutcome::Exhausted
    }

    /// Match one sub-keyword; on a match, decide and dispatch the reply.
    async fn evaluate(
        &self,
        chat: &Chat,
        keyword: &Keyword,
        raw: &str,
        msg: &IncomingMessage,
    ) -> Result<Option<ReplyDecision>, Error> {
        let Some(pattern) = matcher::compile(raw)? else {
            return Ok(None);
        };
        if !pattern.is_match(msg.text.as_deref()) {
            return Ok(None);
        }

        let decision = self.policy.decide(chat, keyword).await?;
        match &decision {
            ReplyDecision::Suppressed => {}
            ReplyDecision::ReplyNow { text } => {
                self.dispatcher.send_now(chat.id, text).await?;
            }
            ReplyDecision::ReplyLater { text, delay_secs } => {
                let at = Utc::now() + chrono::Duration::seconds(i64::from(*delay_secs));
                self.dispatcher
                    .schedule_at(at, chat.id, msg.message_id, text)
                    .await;
            }
        }
        Ok(Some(decision))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::store::{ChatUpsert, LibSqlBackend};
    use crate::testing::{RecordingClient, RecordingScheduler, SentMessage};

    struct Fixture {
        handler: Arc<MessageHandler>,
        store: Arc<dyn Database>,
        client: Arc<RecordingClient>,
        scheduler: Arc<RecordingScheduler>,
    }

    async fn fixture() -> Fixture {
        let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let client = Arc::new(RecordingClient::new());
        let scheduler = Arc::new(RecordingScheduler::default());
        let dispatcher = ResponseDispatcher::new(client.clone(), scheduler.clone());
        let handler = Arc::new(MessageHandler::new(Arc::clone(&store), dispatcher));
        Fixture {
            handler,
            store,
            client,
            scheduler,
        }
    }

    impl Fixture {
        async fn chat(&self, id: i64, one_time_answer: bool) {
            self.store
                .upsert_chat(&ChatUpsert {
                    id,
                    one_time_answer: Some(one_time_answer),
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        async fn rule(&self, chat_id: i64, keyword: &str, answer: &str, delay: u32) -> i64 {
            self.store
                .add_keyword(chat_id, keyword, answer, delay)
                .await
                .unwrap()
                .id
        }
    }

    #[tokio::test]
    async fn first_match_wins_within_row() {
        let f = fixture().await;
        f.chat(1, false).await;
        let id = f.rule(1, "cat,dog", "pets!", 0).await;

        let outcome = f.handler.handle(&IncomingMessage::new(1, 10, "cat dog")).await;
        assert_eq!(
            outcome,
            ScanOutcome::Matched {
                keyword_id: id,
                sub_keyword: "cat".into(),
                decision: ReplyDecision::ReplyNow {
                    text: "pets!".into()
                },
            }
        );
        assert_eq!(f.client.sent().len(), 1);
    }

    #[tokio::test]
    async fn first_match_wins_across_rows() {
        let f = fixture().await;
        f.chat(1, false).await;
        let cat = f.rule(1, "cat", "meow", 0).await;
        f.rule(1, "dog", "woof", 0).await;

        let outcome = f.handler.handle(&IncomingMessage::new(1, 10, "dog and cat")).await;
        assert!(matches!(outcome, ScanOutcome::Matched { keyword_id, .. } if keyword_id == cat));
        assert_eq!(
            f.client.sent(),
            vec![SentMessage {
                chat_id: 1,
                text: "meow".into(),
                reply_to: None
            }]
        );
    }

    #[tokio::test]
    async fn no_match_is_exhausted() {
        let f = fixture().await;
        f.chat(1, false).await;
        f.rule(1, "sale", "yes", 0).await;

        let outcome = f.handler.handle(&IncomingMessage::new(1, 10, "wholesale")).await;
        assert_eq!(outcome, ScanOutcome::Exhausted);
        assert!(f.client.sent().is_empty());
    }

    #[tokio::test]
    async fn empty_sub_keywords_skipped() {
        let f = fixture().await;
        f.chat(1, false).await;
        f.rule(1, " , ,price", "10 USD", 0).await;

        let outcome = f.handler.handle(&IncomingMessage::new(1, 10, "what price?")).await;
        assert!(matches!(outcome, ScanOutcome::Matched { ref sub_keyword, .. } if sub_keyword == "price"));
    }

    #[tokio::test]
    async fn one_time_answer_replies_once() {
        let f = fixture().await;
        f.chat(1, true).await;
        f.rule(1, "hello", "hi there", 0).await;

        f.handler.handle(&IncomingMessage::new(1, 10, "hello")).await;
        let second = f.handler.handle(&IncomingMessage::new(1, 11, "hello again")).await;

        assert!(matches!(
            second,
            ScanOutcome::Matched {
                decision: ReplyDecision::Suppressed,
                ..
            }
        ));
        assert_eq!(f.client.sent().len(), 1);
        assert_eq!(f.store.chat_is_active(1).await.unwrap(), Some(false));
    }

    #[tokio::test]
    async fn suppressed_match_still_stops_scan() {
        let f = fixture().await;
        f.chat(1, false).await;
        f.store.set_chat_active(1, false).await.unwrap();
        let first = f.rule(1, "cat", "meow", 0).await;
        f.rule(1, "cat", "second rule", 0).await;

        let outcome = f.handler.handle(&IncomingMessage::new(1, 10, "cat")).await;
        assert!(matches!(outcome, ScanOutcome::Matched { keyword_id, .. } if keyword_id == first));
        assert!(f.client.sent().is_empty());
    }

    #[tokio::test]
    async fn delayed_reply_is_scheduled_not_sent() {
        let f = fixture().await;
        f.chat(1, false).await;
        f.rule(1, "later", "see you", 5).await;

        let before = Utc::now();
        f.handler.handle(&IncomingMessage::new(1, 42, "later")).await;

        assert!(f.client.sent().is_empty());
        let jobs = f.scheduler.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].message_id, 42);
        assert_eq!(jobs[0].text, "see you");
        assert!(jobs[0].run_at >= before + chrono::Duration::seconds(5));
        assert!(jobs[0].run_at <= Utc::now() + chrono::Duration::seconds(5));
    }

    #[tokio::test]
    async fn send_failure_continues_scanning() {
        let f = fixture().await;
        f.chat(1, false).await;
        f.rule(1, "cat", "meow", 0).await;
        let later = f.rule(1, "cat", "backup", 5).await;
        f.client.fail_send.store(true, Ordering::SeqCst);

        let outcome = f.handler.handle(&IncomingMessage::new(1, 10, "cat")).await;
        assert!(matches!(outcome, ScanOutcome::Matched { keyword_id, .. } if keyword_id == later));
        assert_eq!(f.scheduler.jobs().len(), 1);
    }

    #[tokio::test]
    async fn spaced_sub_keyword_matches_whole_word() {
        let f = fixture().await;
        f.chat(1, false).await;
        let id = f.rule(1, "cat, dog", "pets!", 0).await;

        let outcome = f.handler.handle(&IncomingMessage::new(1, 10, "Dog?")).await;
        assert_eq!(
            outcome,
            ScanOutcome::Matched {
                keyword_id: id,
                sub_keyword: "dog".into(),
                decision: ReplyDecision::ReplyNow {
                    text: "pets!".into()
                },
            }
        );
    }

    #[tokio::test]
    async fn outgoing_and_unknown_chats_filtered() {
        let f = fixture().await;
        f.chat(1, false).await;
        f.rule(1, "cat", "meow", 0).await;

        let outgoing = IncomingMessage::new(1, 10, "cat").outgoing();
        assert_eq!(f.handler.handle(&outgoing).await, ScanOutcome::Filtered);
        assert_eq!(
            f.handler.handle(&IncomingMessage::new(2, 10, "cat")).await,
            ScanOutcome::Filtered
        );
        assert!(f.client.sent().is_empty());
    }

    #[tokio::test]
    async fn media_message_never_matches() {
        let f = fixture().await;
        f.chat(1, false).await;
        f.rule(1, "!!!", "calm down", 0).await;

        let outcome = f.handler.handle(&IncomingMessage::without_text(1, 10)).await;
        assert_eq!(outcome, ScanOutcome::Exhausted);
    }

    #[tokio::test]
    async fn registered_handler_answers_stream() {
        let f = fixture().await;
        f.chat(1, false).await;
        f.rule(1, "ping", "pong", 0).await;

        f.handler.register(f.client.as_ref()).await.unwrap();
        // Re-registering replaces the subscription; messages are handled once.
        f.handler.register(f.client.as_ref()).await.unwrap();
        assert!(f.client.push(IncomingMessage::new(1, 10, "ping")));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(f.client.sent().len(), 1);
        assert_eq!(f.client.updates_calls.load(Ordering::SeqCst), 2);
    }
}
