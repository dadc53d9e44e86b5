//! Background work: deferred reply scheduling.

pub mod scheduler;

pub use scheduler::{DeferredReply, DeferredScheduler, ReplyScheduler};
