//! Session signal loop: serves operator signals from the signal store.
//!
//! Every tick reads the trigger keys in priority order and serves at most one.
//! A served trigger is always deleted, whether or not its action succeeded,
//! so each raised signal is processed at most once.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::channels::ChatClient;
use crate::error::{ChannelError, Error};
use crate::responder::MessageHandler;
use crate::session::state::{CodeRequest, SIGNAL_PRIORITY, SessionState};
use crate::signals::{SignalKey, SignalStore};

/// Text of the self-notification sent after initialization.
const STARTED_NOTE: &str = "started";

/// Polling state machine for sign-in, sign-out and startup.
pub struct SessionSignalLoop {
    signals: Arc<dyn SignalStore>,
    client: Arc<dyn ChatClient>,
    handler: Arc<MessageHandler>,
    session_file: PathBuf,
    interval: Duration,
    state: RwLock<SessionState>,
}

impl SessionSignalLoop {
    pub fn new(
        signals: Arc<dyn SignalStore>,
        client: Arc<dyn ChatClient>,
        handler: Arc<MessageHandler>,
        session_file: PathBuf,
        interval: Duration,
    ) -> Self {
        Self {
            signals,
            client,
            handler,
            session_file,
            interval,
            state: RwLock::new(SessionState::default()),
        }
    }

    /// Current session state.
    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    async fn transition(&self, f: impl FnOnce(SessionState) -> SessionState) {
        let mut state = self.state.write().await;
        let current = *state;
        let next = f(current);
        if next != current {
            tracing::info!(from = %current, to = %next, "Session state changed");
        }
        *state = next;
    }

    /// Pick up an existing session at startup.
    ///
    /// Initializes the client when it already holds an authorized session;
    /// otherwise waits for the operator to sign in.
    pub async fn resume(&self) -> Result<(), Error> {
        let authed = self.signals.is_raised(SignalKey::Authed).await?;
        *self.state.write().await = SessionState::initial(authed);

        if self.client.is_authorized().await {
            self.initialize().await
        } else {
            tracing::info!("No authorized session; waiting for sign-in signals");
            Ok(())
        }
    }

    /// Connect, attach the message handler, run the client handshake, then
    /// announce readiness.
    pub async fn initialize(&self) -> Result<(), Error> {
        if !self.client.is_connected() {
            self.client.connect().await?;
        }
        self.handler.register(self.client.as_ref()).await?;
        self.client.initialize().await?;

        if let Err(e) = self.client.send_to_self(STARTED_NOTE).await {
            tracing::warn!("Failed to send startup notification: {e}");
        }

        self.signals.set(SignalKey::ReadyToConnect, "1").await?;
        self.signals.set(SignalKey::Authed, "1").await?;
        self.transition(SessionState::on_initialized).await;
        tracing::info!(client = self.client.name(), "Client initialized");
        Ok(())
    }

    /// Serve at most one raised signal. Returns the key that was served.
    pub async fn tick(&self) -> Option<SignalKey> {
        for key in SIGNAL_PRIORITY {
            match self.signals.is_raised(key).await {
                Ok(true) => {
                    tracing::info!(signal = %key, "Serving signal");
                    match key {
                        SignalKey::SendKey => self.serve_send_key().await,
                        SignalKey::SendedCode => self.serve_sended_code().await,
                        SignalKey::Logout => self.serve_logout().await,
                        other => {
                            tracing::debug!(signal = %other, "Not a trigger signal");
                            continue;
                        }
                    }
                    return Some(key);
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(signal = %key, "Failed to read signal: {e}");
                    return None;
                }
            }
        }
        None
    }

    /// Poll forever.
    pub async fn run(&self) {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Session signal loop started");
        loop {
            self.tick().await;
            tokio::time::sleep(self.interval).await;
        }
    }

    /// Run the loop on its own task.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    // ── Branches ────────────────────────────────────────────────────

    async fn serve_send_key(&self) {
        let outcome = match self.request_code().await {
            Ok(()) => CodeRequest::Sent,
            Err(Error::Channel(ChannelError::PhoneNumberInvalid { phone })) => {
                tracing::warn!(phone = %phone, "Phone number rejected; code not sent");
                CodeRequest::InvalidPhone
            }
            Err(e) => {
                tracing::error!("Code request failed: {e}");
                CodeRequest::Failed
            }
        };
        self.transition(|s| s.on_send_key(outcome)).await;
        self.clear(SignalKey::SendKey).await;
    }

    async fn request_code(&self) -> Result<(), Error> {
        if !self.client.is_connected() {
            self.client.connect().await?;
        }
        let phone = self.signals.require(SignalKey::Phone).await?;
        let code_hash = self.client.send_code(&phone).await?;
        self.signals.set(SignalKey::CodeHash, &code_hash).await?;
        tracing::info!("Verification code requested");
        Ok(())
    }

    async fn serve_sended_code(&self) {
        let signed_in = match self.sign_in().await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Sign-in failed: {e}");
                false
            }
        };
        self.transition(|s| s.on_sended_code(signed_in)).await;
        self.clear(SignalKey::SendedCode).await;
    }

    /// Sign in with the submitted code, then initialize. A client that is
    /// still authorized (a bot token after logout) skips the code exchange.
    async fn sign_in(&self) -> Result<(), Error> {
        let code = self.signals.require(SignalKey::SendedCode).await?;
        if !self.client.is_connected() {
            self.client.connect().await?;
        }
        if self.client.is_authorized().await {
            tracing::info!("Client still authorized; re-initializing without a code exchange");
            return self.initialize().await;
        }

        let code_hash = self.signals.require(SignalKey::CodeHash).await?;
        let phone = self.signals.require(SignalKey::Phone).await?;
        self.client.sign_in(&phone, &code_hash, &code).await?;
        tracing::info!("Signed in");
        self.initialize().await
    }

    async fn serve_logout(&self) {
        if let Err(e) = self.client.stop().await {
            tracing::warn!("Client stop failed during logout: {e}");
        }

        match tokio::fs::remove_file(&self.session_file).await {
            Ok(()) => {
                tracing::info!(path = %self.session_file.display(), "Session file removed");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.session_file.display(), "Failed to remove session file: {e}");
            }
        }

        self.clear(SignalKey::Authed).await;
        self.clear(SignalKey::Logout).await;
        self.transition(SessionState::on_logout).await;
    }

    async fn clear(&self, key: SignalKey) {
        if let Err(e) = self.signals.delete(key).await {
            tracing::error!(signal = %key, "Failed to clear signal: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::channels::IncomingMessage;
    use crate::responder::ResponseDispatcher;
    use crate::signals::MemorySignalStore;
    use crate::store::{ChatUpsert, Database, LibSqlBackend};
    use crate::testing::{CodeResponse, RecordingClient, RecordingScheduler};

    struct Fixture {
        signal_loop: SessionSignalLoop,
        signals: Arc<MemorySignalStore>,
        client: Arc<RecordingClient>,
        store: Arc<dyn Database>,
        _dir: tempfile::TempDir,
        session_file: PathBuf,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let session_file = dir.path().join("main.session");
        let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let client = Arc::new(RecordingClient::new());
        let signals = Arc::new(MemorySignalStore::new());
        let dispatcher =
            ResponseDispatcher::new(client.clone(), Arc::new(RecordingScheduler::default()));
        let handler = Arc::new(MessageHandler::new(Arc::clone(&store), dispatcher));
        let signal_loop = SessionSignalLoop::new(
            signals.clone(),
            client.clone(),
            handler,
            session_file.clone(),
            Duration::from_millis(20),
        );
        Fixture {
            signal_loop,
            signals,
            client,
            store,
            _dir: dir,
            session_file,
        }
    }

    #[tokio::test]
    async fn idle_tick_does_nothing() {
        let f = fixture().await;
        assert_eq!(f.signal_loop.tick().await, None);
        assert_eq!(f.client.connect_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn send_key_requests_code() {
        let f = fixture().await;
        f.signals.set(SignalKey::Phone, "+15550100").await.unwrap();
        f.signals.set(SignalKey::SendKey, "1").await.unwrap();

        assert_eq!(f.signal_loop.tick().await, Some(SignalKey::SendKey));
        assert!(f.client.is_connected());
        assert_eq!(*f.client.code_requests.lock().unwrap(), vec!["+15550100"]);
        assert_eq!(
            f.signals.get(SignalKey::CodeHash).await.unwrap().as_deref(),
            Some("hash-1")
        );
        assert!(f.signals.get(SignalKey::SendKey).await.unwrap().is_none());
        assert_eq!(f.signal_loop.state().await, SessionState::CodeSent);
    }

    #[tokio::test]
    async fn invalid_phone_swallowed_and_cleared() {
        let f = fixture().await;
        *f.client.code_response.lock().unwrap() = CodeResponse::InvalidPhone;
        f.signals.set(SignalKey::Phone, "nope").await.unwrap();
        f.signals.set(SignalKey::SendKey, "1").await.unwrap();

        assert_eq!(f.signal_loop.tick().await, Some(SignalKey::SendKey));
        assert!(f.signals.get(SignalKey::SendKey).await.unwrap().is_none());
        assert!(f.signals.get(SignalKey::CodeHash).await.unwrap().is_none());
        assert_eq!(f.signal_loop.state().await, SessionState::NeedCode);
    }

    #[tokio::test]
    async fn other_code_failure_still_clears_send_key() {
        let f = fixture().await;
        *f.client.code_response.lock().unwrap() = CodeResponse::Fail;
        f.signals.set(SignalKey::Phone, "+15550100").await.unwrap();
        f.signals.set(SignalKey::SendKey, "1").await.unwrap();

        f.signal_loop.tick().await;
        assert!(f.signals.get(SignalKey::SendKey).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_phone_still_clears_send_key() {
        let f = fixture().await;
        f.signals.set(SignalKey::SendKey, "1").await.unwrap();

        f.signal_loop.tick().await;
        assert!(f.signals.get(SignalKey::SendKey).await.unwrap().is_none());
        assert!(f.client.code_requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn priority_serves_one_signal_per_tick() {
        let f = fixture().await;
        f.signals.set(SignalKey::Phone, "+15550100").await.unwrap();
        f.signals.set(SignalKey::SendKey, "1").await.unwrap();
        f.signals.set(SignalKey::Logout, "1").await.unwrap();

        assert_eq!(f.signal_loop.tick().await, Some(SignalKey::SendKey));
        assert!(f.signals.is_raised(SignalKey::Logout).await.unwrap());
        assert_eq!(f.signal_loop.tick().await, Some(SignalKey::Logout));
        assert_eq!(f.signal_loop.tick().await, None);
    }

    #[tokio::test]
    async fn sign_in_initializes_client() {
        let f = fixture().await;
        f.store
            .upsert_chat(&ChatUpsert {
                id: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        f.store.add_keyword(1, "ping", "pong", 0).await.unwrap();

        f.signals.set(SignalKey::Phone, "+15550100").await.unwrap();
        f.signals.set(SignalKey::CodeHash, "hash-1").await.unwrap();
        f.signals.set(SignalKey::SendedCode, "12345").await.unwrap();

        assert_eq!(f.signal_loop.tick().await, Some(SignalKey::SendedCode));
        assert_eq!(
            *f.client.sign_ins.lock().unwrap(),
            vec![(
                "+15550100".to_string(),
                "hash-1".to_string(),
                "12345".to_string()
            )]
        );
        assert!(f.signals.get(SignalKey::SendedCode).await.unwrap().is_none());
        assert!(f.signals.is_raised(SignalKey::Authed).await.unwrap());
        assert!(f.signals.is_raised(SignalKey::ReadyToConnect).await.unwrap());
        assert_eq!(f.client.initialize_calls.load(Ordering::SeqCst), 1);
        assert_eq!(*f.client.self_notes.lock().unwrap(), vec!["started"]);
        assert_eq!(f.signal_loop.state().await, SessionState::SignedIn);

        // Handler is attached to the client's stream.
        assert!(f.client.push(IncomingMessage::new(1, 5, "ping")));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(f.client.sent().len(), 1);
    }

    #[tokio::test]
    async fn failed_sign_in_still_clears_code() {
        let f = fixture().await;
        f.client.fail_sign_in.store(true, Ordering::SeqCst);
        f.signals.set(SignalKey::Phone, "+15550100").await.unwrap();
        f.signals.set(SignalKey::CodeHash, "hash-1").await.unwrap();
        f.signals.set(SignalKey::SendedCode, "00000").await.unwrap();

        f.signal_loop.tick().await;
        assert!(f.signals.get(SignalKey::SendedCode).await.unwrap().is_none());
        assert!(!f.signals.is_raised(SignalKey::Authed).await.unwrap());
        assert_eq!(f.client.initialize_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn logout_cleans_up_even_if_stop_fails() {
        let f = fixture().await;
        tokio::fs::write(&f.session_file, b"session").await.unwrap();
        f.client.fail_stop.store(true, Ordering::SeqCst);
        f.signals.set(SignalKey::Authed, "1").await.unwrap();
        f.signals.set(SignalKey::Logout, "1").await.unwrap();

        assert_eq!(f.signal_loop.tick().await, Some(SignalKey::Logout));
        assert_eq!(f.client.stop_calls.load(Ordering::SeqCst), 1);
        assert!(!f.session_file.exists());
        assert!(f.signals.get(SignalKey::Authed).await.unwrap().is_none());
        assert!(f.signals.get(SignalKey::Logout).await.unwrap().is_none());
        assert_eq!(f.signal_loop.state().await, SessionState::LoggedOut);
    }

    #[tokio::test]
    async fn authorized_client_reinitializes_after_logout() {
        let f = fixture().await;
        f.store
            .upsert_chat(&ChatUpsert {
                id: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        f.store.add_keyword(1, "ping", "pong", 0).await.unwrap();
        f.client.authorized.store(true, Ordering::SeqCst);
        f.signal_loop.resume().await.unwrap();

        f.signals.set(SignalKey::Logout, "1").await.unwrap();
        assert_eq!(f.signal_loop.tick().await, Some(SignalKey::Logout));
        assert!(!f.client.is_connected());
        assert_eq!(f.signal_loop.state().await, SessionState::LoggedOut);

        // No phone or code hash on record: the token session needs neither.
        f.signals.set(SignalKey::SendedCode, "0").await.unwrap();
        assert_eq!(f.signal_loop.tick().await, Some(SignalKey::SendedCode));
        assert!(f.client.sign_ins.lock().unwrap().is_empty());
        assert!(f.client.is_connected());
        assert_eq!(f.client.initialize_calls.load(Ordering::SeqCst), 2);
        assert!(f.signals.is_raised(SignalKey::Authed).await.unwrap());
        assert!(f.signals.get(SignalKey::SendedCode).await.unwrap().is_none());
        assert_eq!(f.signal_loop.state().await, SessionState::SignedIn);

        assert!(f.client.push(IncomingMessage::new(1, 6, "ping")));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(f.client.sent().len(), 1);
    }

    #[tokio::test]
    async fn logout_without_session_file() {
        let f = fixture().await;
        f.signals.set(SignalKey::Logout, "1").await.unwrap();
        assert_eq!(f.signal_loop.tick().await, Some(SignalKey::Logout));
        assert!(f.signals.get(SignalKey::Logout).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resume_with_authorized_session() {
        let f = fixture().await;
        f.client.authorized.store(true, Ordering::SeqCst);
        f.signal_loop.resume().await.unwrap();

        assert!(f.client.is_connected());
        assert_eq!(f.client.initialize_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.signal_loop.state().await, SessionState::SignedIn);
    }

    #[tokio::test]
    async fn resume_without_session_waits() {
        let f = fixture().await;
        f.signal_loop.resume().await.unwrap();
        assert_eq!(f.client.initialize_calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.signal_loop.state().await, SessionState::NeedCode);
    }

    #[tokio::test]
    async fn spawned_loop_serves_signals() {
        let f = fixture().await;
        let signals = f.signals.clone();
        let handle = Arc::new(f.signal_loop).spawn();

        signals.set(SignalKey::Logout, "1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(signals.get(SignalKey::Logout).await.unwrap().is_none());
        handle.abort();
    }
}
