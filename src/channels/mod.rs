//! Chat transport abstraction and adapters.

pub mod client;
pub mod telegram;

pub use client::{ChatClient, IncomingMessage, MessageStream};
pub use telegram::TelegramClient;
