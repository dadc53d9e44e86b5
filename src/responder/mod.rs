//! Keyword auto-responder.
//!
//! Incoming message → `MessageHandler` loads the chat's keyword rules →
//! `matcher` tests each sub-keyword in order → `ReplyPolicy` decides on the
//! first match → `ResponseDispatcher` sends or schedules the answer.

pub mod dispatcher;
pub mod handler;
pub mod matcher;
pub mod policy;

pub use dispatcher::ResponseDispatcher;
pub use handler::{MessageHandler, ScanOutcome};
pub use matcher::{KeywordPattern, compile};
pub use policy::{ReplyDecision, ReplyPolicy};
