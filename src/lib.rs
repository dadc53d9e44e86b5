//! Autoreply: keyword auto-responder for a chat account.

pub mod api;
pub mod channels;
pub mod config;
pub mod error;
pub mod responder;
pub mod session;
pub mod signals;
pub mod store;
pub mod worker;

#[cfg(test)]
mod testing;
