//! Session state machine: where the account is in its sign-in lifecycle.

use serde::{Deserialize, Serialize};

use crate::signals::SignalKey;

/// Trigger signals in the order the loop serves them. At most one per tick.
pub const SIGNAL_PRIORITY: [SignalKey; 3] =
    [SignalKey::SendKey, SignalKey::SendedCode, SignalKey::Logout];

/// Sign-in lifecycle of the account.
///
/// NeedCode → CodeSent → SignedIn → LoggedOut. The state is reported to
/// the operator; it never blocks a signal from being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    NeedCode,
    CodeSent,
    SignedIn,
    LoggedOut,
}

/// Result of serving a `send_key` signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeRequest {
    Sent,
    InvalidPhone,
    Failed,
}

impl SessionState {
    /// State at startup, from the persisted `authed` flag.
    pub fn initial(authed: bool) -> Self {
        if authed { Self::SignedIn } else { Self::NeedCode }
    }

    /// After a `send_key` signal was served.
    pub fn on_send_key(self, outcome: CodeRequest) -> Self {
        match outcome {
            CodeRequest::Sent => Self::CodeSent,
            CodeRequest::InvalidPhone => Self::NeedCode,
            CodeRequest::Failed => self,
        }
    }

    /// After a `sended_code` signal was served.
    pub fn on_sended_code(self, signed_in: bool) -> Self {
        if signed_in { Self::SignedIn } else { self }
    }

    /// After a `logout` signal was served.
    pub fn on_logout(self) -> Self {
        Self::LoggedOut
    }

    /// After a successful initialization.
    pub fn on_initialized(self) -> Self {
        Self::SignedIn
    }

    pub fn is_signed_in(&self) -> bool {
        matches!(self, Self::SignedIn)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NeedCode => "need_code",
            Self::CodeSent => "code_sent",
            Self::SignedIn => "signed_in",
            Self::LoggedOut => "logged_out",
        };
        write!(f, "{s}")
    }
}
