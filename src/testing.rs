//! Test doubles shared by unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::channels::{ChatClient, IncomingMessage, MessageStream};
use crate::error::{ChannelError, SchedulerError};
use crate::worker::{DeferredReply, DeferredScheduler};

/// A message handed to `send_message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: i64,
    pub text: String,
    pub reply_to: Option<i64>,
}

/// How the recording client answers `send_code`.
#[derive(Debug, Clone)]
pub enum CodeResponse {
    Hash(String),
    InvalidPhone,
    Fail,
}

/// Chat client that records every call and never touches the network.
pub struct RecordingClient {
    pub sent: Mutex<Vec<SentMessage>>,
    pub self_notes: Mutex<Vec<String>>,
    pub code_requests: Mutex<Vec<String>>,
    pub sign_ins: Mutex<Vec<(String, String, String)>>,
    pub connected: AtomicBool,
    pub authorized: AtomicBool,
    pub fail_send: AtomicBool,
    pub fail_sign_in: AtomicBool,
    pub fail_stop: AtomicBool,
    pub connect_calls: AtomicUsize,
    pub initialize_calls: AtomicUsize,
    pub updates_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
    pub code_response: Mutex<CodeResponse>,
    feed: Mutex<Option<mpsc::UnboundedSender<IncomingMessage>>>,
}

impl Default for RecordingClient {
    fn default() -> Self {
        Self {
            sent: Mutex::default(),
            self_notes: Mutex::default(),
            code_requests: Mutex::default(),
            sign_ins: Mutex::default(),
            connected: AtomicBool::new(false),
            authorized: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
            fail_sign_in: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            connect_calls: AtomicUsize::new(0),
            initialize_calls: AtomicUsize::new(0),
            updates_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            code_response: Mutex::new(CodeResponse::Hash("hash-1".into())),
            feed: Mutex::new(None),
        }
    }
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Push a message into the most recent update stream.
    /// Returns false if nobody is subscribed.
    pub fn push(&self, msg: IncomingMessage) -> bool {
        match self.feed.lock().unwrap().as_ref() {
            Some(tx) => tx.send(msg).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl ChatClient for RecordingClient {
    fn name(&self) -> &str {
        "recording"
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), ChannelError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::SeqCst)
    }

    async fn initialize(&self) -> Result<(), ChannelError> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn updates(&self) -> Result<MessageStream, ChannelError> {
        self.updates_calls.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        // Replacing the sender ends the previous stream.
        *self.feed.lock().unwrap() = Some(tx);
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });
        Ok(Box::pin(stream))
    }

    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<(), ChannelError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(ChannelError::SendFailed {
                name: "recording".into(),
                reason: "send disabled".into(),
            });
        }
        self.sent.lock().unwrap().push(SentMessage {
            chat_id,
            text: text.to_string(),
            reply_to,
        });
        Ok(())
    }

    async fn send_to_self(&self, text: &str) -> Result<(), ChannelError> {
        self.self_notes.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn send_code(&self, phone: &str) -> Result<String, ChannelError> {
        self.code_requests.lock().unwrap().push(phone.to_string());
        match self.code_response.lock().unwrap().clone() {
            CodeResponse::Hash(hash) => Ok(hash),
            CodeResponse::InvalidPhone => Err(ChannelError::PhoneNumberInvalid {
                phone: phone.to_string(),
            }),
            CodeResponse::Fail => Err(ChannelError::Http("flood wait".into())),
        }
    }

    async fn sign_in(&self, phone: &str, code_hash: &str, code: &str) -> Result<(), ChannelError> {
        self.sign_ins
            .lock()
            .unwrap()
            .push((phone.to_string(), code_hash.to_string(), code.to_string()));
        if self.fail_sign_in.load(Ordering::SeqCst) {
            return Err(ChannelError::AuthFailed {
                name: "recording".into(),
                reason: "code expired".into(),
            });
        }
        self.authorized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(ChannelError::NotConnected {
                name: "recording".into(),
            });
        }
        Ok(())
    }
}

/// Scheduler that records registrations instead of running them.
#[derive(Default)]
pub struct RecordingScheduler {
    jobs: Mutex<Vec<DeferredReply>>,
    pub refuse: AtomicBool,
}

impl RecordingScheduler {
    pub fn jobs(&self) -> Vec<DeferredReply> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeferredScheduler for RecordingScheduler {
    async fn schedule(&self, reply: DeferredReply) -> Result<Uuid, SchedulerError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(SchedulerError::MaxJobsExceeded { max: 0 });
        }
        let id = reply.id;
        self.jobs.lock().unwrap().push(reply);
        Ok(id)
    }
}
