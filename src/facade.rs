//! Consumer-facing realtime feed.
//!
//! [`RealtimeFeed`] is the only interface the display layer sees: the
//! current ordered buffer, the connection status, the last error, and
//! the imperative controls (reconnect, authenticate, anonymous
//! diagnostic, credential clearing). Each control is safe to invoke
//! concurrently with an in-flight connect/retry cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tungstenite::Message as WsMessage;

use crate::Result;
use crate::auth;
use crate::config::BackendConfig;
use crate::credentials::{CredentialKey, CredentialStore};
use crate::merge::StreamMerger;
use crate::models::{DEMANDS_COLLECTION, ServerEvent};
use crate::models::demand::Demand;
use crate::websocket::connector::SocketConnector;
use crate::websocket::pong;
use crate::websocket::reconnect::{
    ConnectionState, FeedMessage, ReconnectManager, SessionConfig,
};

/// How long the anonymous diagnostic waits for a first event.
const ANONYMOUS_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outbound request deadline for snapshot fetch and login.
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// State shared between the session consumer task and readers.
struct FeedShared {
    merger: Mutex<StreamMerger>,
    state: Mutex<ConnectionState>,
    connected: AtomicBool,
    last_error: Mutex<Option<String>>,
    /// Bumped on every observable change; consumers watch it instead of
    /// polling.
    updates: watch::Sender<u64>,
}

impl FeedShared {
    fn new(capacity: usize) -> Self {
        Self {
            merger: Mutex::new(StreamMerger::new(capacity)),
            state: Mutex::new(ConnectionState::Disconnected),
            connected: AtomicBool::new(false),
            last_error: Mutex::new(None),
            updates: watch::channel(0).0,
        }
    }

    fn apply(&self, message: FeedMessage) {
        match message {
            FeedMessage::State(state) => {
                *self.state.lock().expect("feed state lock poisoned") = state;
                let connected = matches!(
                    state,
                    ConnectionState::Connected
                        | ConnectionState::Subscribing
                        | ConnectionState::Subscribed
                );
                self.connected.store(connected, Ordering::Release);
                if connected {
                    self.set_error(None);
                }
            }
            FeedMessage::TransportError(detail) | FeedMessage::SubscribeFailed(detail) => {
                self.set_error(Some(detail));
            }
            FeedMessage::SnapshotLoaded(records) => {
                self.merger
                    .lock()
                    .expect("merger lock poisoned")
                    .seed_snapshot(records);
            }
            FeedMessage::SnapshotFailed(_) => {
                // Logged at the source; degrades to an empty buffer.
                self.merger
                    .lock()
                    .expect("merger lock poisoned")
                    .snapshot_failed();
            }
            FeedMessage::Created(demand) => {
                self.merger
                    .lock()
                    .expect("merger lock poisoned")
                    .live_event(demand);
            }
        }
        self.updates.send_modify(|n| *n += 1);
    }

    fn set_error(&self, detail: Option<String>) {
        *self.last_error.lock().expect("error lock poisoned") = detail;
    }
}

/// One spawned session: its teardown signal and its tasks.
struct SessionHandle {
    shutdown: watch::Sender<bool>,
    manager: JoinHandle<()>,
    consumer: JoinHandle<()>,
}

impl SessionHandle {
    /// Signals teardown and waits for both tasks to finish, so a
    /// replacement session never overlaps with a stale one.
    async fn quiesce(self) {
        let _ = self.shutdown.send(true);
        let _ = self.manager.await;
        let _ = self.consumer.await;
    }
}

/// The realtime synchronization facade.
pub struct RealtimeFeed {
    backend: BackendConfig,
    http: reqwest::Client,
    credentials: Arc<CredentialStore>,
    shared: Arc<FeedShared>,
    session: tokio::sync::Mutex<Option<SessionHandle>>,
    asset_prefix: String,
}

impl RealtimeFeed {
    /// Creates a feed for the given backend. No connection is made
    /// until [`connect`](Self::connect) is called.
    #[must_use]
    pub fn new(backend: BackendConfig) -> Self {
        let credentials = Arc::new(CredentialStore::new(backend.static_token.clone()));
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        let asset_prefix = backend.base_url.clone();

        Self {
            backend,
            http,
            credentials,
            shared: Arc::new(FeedShared::new(crate::buffer::DEFAULT_CAPACITY)),
            session: tokio::sync::Mutex::new(None),
            asset_prefix,
        }
    }

    /// Overrides the prefix used to rewrite bare image references,
    /// typically the proxy mount point.
    #[must_use]
    pub fn with_asset_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.asset_prefix = prefix.into();
        self
    }

    /// Starts a session: snapshot fetch plus the connect/subscribe
    /// retry loop. Idempotent in effect; calling it again replaces the
    /// current session.
    pub async fn connect(&self) {
        self.start_session().await;
    }

    /// Resets the error state and restarts the connect loop.
    pub async fn reconnect(&self) {
        self.shared.set_error(None);
        self.start_session().await;
    }

    /// Performs the credential exchange, rebinds the connector to the
    /// new credential, and reconnects.
    ///
    /// The old session is quiesced strictly before the new one starts,
    /// so at most one subscription is active at any time and no event
    /// is delivered twice.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Auth`](crate::FeedError::Auth) when the
    /// backend rejects the identity or secret; an established session
    /// keeps running unchanged in that case.
    pub async fn authenticate(&self, identity: &str, secret: &str) -> Result<()> {
        let credential =
            match auth::login(&self.http, &self.backend.base_url, identity, secret).await {
                Ok(credential) => credential,
                Err(e) => {
                    self.shared.set_error(Some(e.to_string()));
                    return Err(e);
                }
            };

        self.credentials.save(CredentialKey::AuthToken, credential);
        self.reconnect().await;
        Ok(())
    }

    /// Diagnostic: opens a throwaway unauthenticated connection, waits
    /// up to a fixed timeout for any creation event, and reports
    /// whether one arrived. The probe is torn down before returning and
    /// never touches the active session.
    pub async fn test_anonymous(&self) -> bool {
        let connector = SocketConnector::new(&self.backend.websocket_url, None);
        let mut conn = match connector.open().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Anonymous probe could not connect: {e}");
                return false;
            }
        };

        let early = match conn.establish_subscription(DEMANDS_COLLECTION).await {
            Ok(records) => records,
            Err(e) => {
                warn!("Anonymous probe could not subscribe: {e}");
                conn.close().await;
                return false;
            }
        };
        if !early.is_empty() {
            conn.close().await;
            return true;
        }

        let received = tokio::time::timeout(ANONYMOUS_PROBE_TIMEOUT, async {
            loop {
                match conn.read.next().await {
                    Some(Ok(WsMessage::Text(text))) => {
                        let Ok(value) = serde_json::from_str::<serde_json::Value>(&text)
                        else {
                            continue;
                        };
                        match ServerEvent::parse(value) {
                            ServerEvent::Created(records) if !records.is_empty() => {
                                return true;
                            }
                            ServerEvent::Ping => {
                                if pong(&mut conn.write).await.is_err() {
                                    return false;
                                }
                            }
                            _ => {}
                        }
                    }
                    Some(Ok(_)) => {}
                    _ => return false,
                }
            }
        })
        .await
        .unwrap_or(false);

        if !received {
            info!("Anonymous probe received no event within timeout");
        }
        conn.close().await;
        received
    }

    /// Removes every locally held credential. The next connection
    /// attempt runs unauthenticated; an already-open connection is not
    /// interrupted.
    pub fn clear_local_auth(&self) {
        self.credentials.clear();
        info!("Cleared local credentials");
    }

    /// Returns a read-only snapshot of the ordered buffer, oldest first.
    #[must_use]
    pub fn demands(&self) -> Vec<Demand> {
        self.shared
            .merger
            .lock()
            .expect("merger lock poisoned")
            .demands()
    }

    /// Returns `true` while the duplex connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock().expect("feed state lock poisoned")
    }

    /// Most recent error message, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.shared
            .last_error
            .lock()
            .expect("error lock poisoned")
            .clone()
    }

    /// Returns a handle that resolves whenever the buffer, state, or
    /// error changes. Dropping the handle simply stops the
    /// notifications.
    #[must_use]
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.shared.updates.subscribe()
    }

    /// Tears down the active session and stops all retry timers.
    pub async fn shutdown(&self) {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.take() {
            session.quiesce().await;
        }
    }

    /// Quiesces any previous session, then spawns a fresh one bound to
    /// the current credential.
    async fn start_session(&self) {
        let mut guard = self.session.lock().await;
        if let Some(old) = guard.take() {
            old.quiesce().await;
        }

        self.shared
            .merger
            .lock()
            .expect("merger lock poisoned")
            .begin_session();

        let token = self.credentials.active_token();
        let connector = SocketConnector::new(
            &self.backend.websocket_url,
            token.as_deref().map(String::as_str),
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let manager = ReconnectManager::new(
            SessionConfig {
                connector,
                collection: DEMANDS_COLLECTION.to_string(),
                http: self.http.clone(),
                base_url: self.backend.base_url.clone(),
                token,
                asset_prefix: self.asset_prefix.clone(),
            },
            tx,
            shutdown_rx,
        );

        let manager_task = tokio::spawn(manager.run());

        let shared = Arc::clone(&self.shared);
        let consumer_task = tokio::spawn(async move {
            // Single consumer of the session channel; the only writer
            // to the buffer.
            while let Some(message) = rx.recv().await {
                shared.apply(message);
            }
        });

        *guard = Some(SessionHandle {
            shutdown: shutdown_tx,
            manager: manager_task,
            consumer: consumer_task,
        });
    }
}

impl Drop for RealtimeFeed {
    fn drop(&mut self) {
        // Best effort: signal teardown so no connection attempt outlives
        // the feed. quiesce() cannot run here, callers wanting a joined
        // teardown use shutdown().
        if let Ok(mut guard) = self.session.try_lock()
            && let Some(session) = guard.take()
        {
            let _ = session.shutdown.send(true);
        }
    }
}
