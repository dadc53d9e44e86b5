//! Session lifecycle: sign-in, sign-out and startup driven by operator signals.

pub mod signal_loop;
pub mod state;

pub use signal_loop::SessionSignalLoop;
pub use state::{CodeRequest, SIGNAL_PRIORITY, SessionState};
