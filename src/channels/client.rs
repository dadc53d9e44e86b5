//! Chat client abstraction: the account the responder runs on.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// A text message received on the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub chat_id: i64,
    pub message_id: i64,
    /// Absent for non-text content (media, service messages).
    pub text: Option<String>,
    /// Sent by this account rather than received.
    #[serde(default)]
    pub outgoing: bool,
    #[serde(default)]
    pub sender_name: Option<String>,
}

impl IncomingMessage {
    pub fn new(chat_id: i64, message_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            message_id,
            text: Some(text.into()),
            outgoing: false,
            sender_name: None,
        }
    }

    /// A message with no text body.
    pub fn without_text(chat_id: i64, message_id: i64) -> Self {
        Self {
            chat_id,
            message_id,
            text: None,
            outgoing: false,
            sender_name: None,
        }
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    pub fn outgoing(mut self) -> Self {
        self.outgoing = true;
        self
    }
}

/// Stream of incoming messages from a client.
pub type MessageStream = Pin<Box<dyn Stream<Item = IncomingMessage> + Send>>;

/// Operations the responder needs from the chat transport.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Short transport name for logs and errors.
    fn name(&self) -> &str;

    /// Whether a connection to the provider is established.
    fn is_connected(&self) -> bool;

    /// Establish the connection.
    async fn connect(&self) -> Result<(), ChannelError>;

    /// Whether the connected session belongs to a signed-in account.
    async fn is_authorized(&self) -> bool;

    /// Startup handshake: fetch update state and prepare to receive messages.
    async fn initialize(&self) -> Result<(), ChannelError>;

    /// Subscribe to incoming messages. The stream must stay open until
    /// `stop()`, even if `initialize()` has not run yet. Subscribing again
    /// ends the previous stream.
    async fn updates(&self) -> Result<MessageStream, ChannelError>;

    /// Send a text message, optionally as a reply to an earlier message.
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<(), ChannelError>;

    /// Send a note to the account owner.
    async fn send_to_self(&self, text: &str) -> Result<(), ChannelError>;

    /// Request a verification code for `phone`. Returns the provider's code hash.
    async fn send_code(&self, phone: &str) -> Result<String, ChannelError>;

    /// Complete sign-in with a received code.
    async fn sign_in(&self, phone: &str, code_hash: &str, code: &str) -> Result<(), ChannelError>;

    /// Stop the client and drop the connection.
    async fn stop(&self) -> Result<(), ChannelError>;
}
