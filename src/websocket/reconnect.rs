//! Connection session lifecycle.
//!
//! [`ReconnectManager`] owns one logical session: it drives the
//! [`SocketConnector`] through connect attempts with bounded
//! exponential backoff, issues the snapshot fetch concurrently with the
//! first connect, establishes the create-event subscription, and
//! forwards everything to the session's single consumer over an
//! unbounded channel. Teardown is signalled through a watch channel
//! that every awaited step selects against, so pending retry timers are
//! cancelled rather than left running.

use std::time::Duration;

use futures_util::StreamExt;
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use tungstenite::Message as WsMessage;
use zeroize::Zeroizing;

use super::connector::{ActiveConnection, SocketConnector};
use super::pong;
use crate::models::ServerEvent;
use crate::models::demand::Demand;
use crate::snapshot;

/// First retry delay.
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Upper bound on the retry delay, jitter excluded.
pub const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Upper bound on the random jitter added to each delay.
pub const JITTER_MAX: Duration = Duration::from_millis(500);

/// Connection state machine.
///
/// Any state can fall back to `Disconnected` on error or teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Subscribing,
    Subscribed,
}

/// Messages sent from a session to its single consumer.
#[derive(Debug)]
pub enum FeedMessage {
    /// The session moved to a new connection state.
    State(ConnectionState),
    /// A connect/read failure; the session retries on its own.
    TransportError(String),
    /// The subscribe call failed after a successful connect; the
    /// session has stopped and the caller must explicitly reconnect.
    SubscribeFailed(String),
    /// The snapshot resolved, records in most-recent-first order.
    SnapshotLoaded(Vec<Demand>),
    /// The snapshot failed; the buffer starts empty.
    SnapshotFailed(String),
    /// One newly created record from the live subscription.
    Created(Demand),
}

/// Lower bound of the retry delay for a given attempt: `min(base * 2^k, cap)`.
#[must_use]
pub fn backoff_floor(attempt: u32) -> Duration {
    BACKOFF_BASE
        .saturating_mul(2u32.saturating_pow(attempt.min(31)))
        .min(BACKOFF_CAP)
}

/// Retry delay for a given attempt: the floor plus additive jitter.
///
/// Jitter only adds, never subtracts, so the delay always stays at or
/// above the floor.
#[must_use]
pub fn retry_delay(attempt: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(0..=JITTER_MAX.as_millis() as u64);
    backoff_floor(attempt) + Duration::from_millis(jitter)
}

/// Why the reader loop exited.
enum DisconnectReason {
    /// The connection was lost or errored; the session reconnects.
    Transport(String),
    /// Teardown was requested or the consumer went away.
    Shutdown,
}

/// Everything a session needs to reach the backend.
pub struct SessionConfig {
    pub connector: SocketConnector,
    pub collection: String,
    pub http: reqwest::Client,
    pub base_url: String,
    pub token: Option<Zeroizing<String>>,
    pub asset_prefix: String,
}

/// Drives one connection session until subscription failure or teardown.
pub struct ReconnectManager {
    config: SessionConfig,
    tx: mpsc::UnboundedSender<FeedMessage>,
    shutdown: watch::Receiver<bool>,
}

impl ReconnectManager {
    #[must_use]
    pub fn new(
        config: SessionConfig,
        tx: mpsc::UnboundedSender<FeedMessage>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            tx,
            shutdown,
        }
    }

    /// Runs the session: snapshot fetch and connect loop concurrently,
    /// then the read loop, reconnecting on transport failure until
    /// teardown or a subscription failure.
    pub async fn run(mut self) {
        self.spawn_snapshot_fetch();

        let mut attempt: u32 = 0;

        loop {
            self.publish(ConnectionState::Connecting);

            info!(attempt, "Connecting to realtime endpoint");
            let opened = tokio::select! {
                res = self.config.connector.open() => res,
                () = cancelled(&mut self.shutdown) => break,
            };

            let mut conn = match opened {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(attempt, "Connection failed: {e}");
                    let _ = self.tx.send(FeedMessage::TransportError(e.to_string()));
                    self.publish(ConnectionState::Disconnected);

                    let delay = retry_delay(attempt);
                    attempt = attempt.saturating_add(1);
                    info!(delay_ms = delay.as_millis() as u64, "Backing off before retry");
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = cancelled(&mut self.shutdown) => break,
                    }
                    continue;
                }
            };

            attempt = 0;
            self.publish(ConnectionState::Connected);
            self.publish(ConnectionState::Subscribing);

            let early = tokio::select! {
                res = conn.establish_subscription(&self.config.collection) => res,
                () = cancelled(&mut self.shutdown) => {
                    conn.close().await;
                    break;
                }
            };

            let early = match early {
                Ok(records) => records,
                Err(e) => {
                    // Surfaced as an error state; no automatic retry for
                    // subscription failures. The caller reconnects.
                    error!("Subscription failed: {e}");
                    let _ = self.tx.send(FeedMessage::SubscribeFailed(e.to_string()));
                    self.publish(ConnectionState::Disconnected);
                    conn.close().await;
                    return;
                }
            };

            self.publish(ConnectionState::Subscribed);
            for raw in early {
                self.deliver(raw.normalize(&self.config.asset_prefix));
            }

            match self.read_loop(&mut conn).await {
                DisconnectReason::Transport(detail) => {
                    let _ = self.tx.send(FeedMessage::TransportError(detail));
                    self.publish(ConnectionState::Disconnected);

                    let delay = retry_delay(attempt);
                    attempt = attempt.saturating_add(1);
                    info!(
                        delay_ms = delay.as_millis() as u64,
                        "Connection lost, backing off"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = cancelled(&mut self.shutdown) => break,
                    }
                }
                DisconnectReason::Shutdown => {
                    conn.close().await;
                    break;
                }
            }
        }

        info!("Session shutting down");
        self.publish(ConnectionState::Disconnected);
    }

    /// Issues the snapshot request concurrently with the connect loop.
    ///
    /// The snapshot races the live subscription; the consumer parks
    /// events that arrive first and flushes them once the snapshot
    /// message lands. Failures degrade to an empty initial buffer.
    fn spawn_snapshot_fetch(&self) {
        let tx = self.tx.clone();
        let http = self.config.http.clone();
        let base_url = self.config.base_url.clone();
        let token = self.config.token.clone();
        let asset_prefix = self.config.asset_prefix.clone();

        tokio::spawn(async move {
            let token = token.as_deref().map(String::as_str);
            match snapshot::fetch_recent(&http, &base_url, token).await {
                Ok(records) => {
                    let demands = records
                        .into_iter()
                        .map(|raw| raw.normalize(&asset_prefix))
                        .collect();
                    let _ = tx.send(FeedMessage::SnapshotLoaded(demands));
                }
                Err(e) => {
                    warn!("Snapshot fetch failed, starting with empty buffer: {e}");
                    let _ = tx.send(FeedMessage::SnapshotFailed(e.to_string()));
                }
            }
        });
    }

    /// Reads live events until transport failure or teardown.
    async fn read_loop(&mut self, conn: &mut ActiveConnection) -> DisconnectReason {
        loop {
            let msg = tokio::select! {
                msg = conn.read.next() => msg,
                () = cancelled(&mut self.shutdown) => return DisconnectReason::Shutdown,
            };

            match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
                        debug!("Skipping unparseable realtime message");
                        continue;
                    };
                    match ServerEvent::parse(value) {
                        ServerEvent::Created(records) => {
                            for raw in records {
                                self.deliver(raw.normalize(&self.config.asset_prefix));
                            }
                        }
                        ServerEvent::Ping => {
                            if let Err(e) = pong(&mut conn.write).await {
                                return DisconnectReason::Transport(e.to_string());
                            }
                        }
                        ServerEvent::Error(detail) => {
                            warn!(detail, "Server reported realtime error");
                        }
                        ServerEvent::SubscriptionInit | ServerEvent::Ignored => {}
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    warn!("WebSocket stream ended");
                    return DisconnectReason::Transport("connection closed".to_string());
                }
                Some(Ok(_)) => {} // Binary/Ping/Pong frames
                Some(Err(e)) => {
                    warn!("WebSocket error: {e}");
                    return DisconnectReason::Transport(e.to_string());
                }
            }
        }
    }

    fn publish(&self, state: ConnectionState) {
        let _ = self.tx.send(FeedMessage::State(state));
    }

    fn deliver(&self, demand: Demand) {
        let _ = self.tx.send(FeedMessage::Created(demand));
    }
}

/// Resolves once teardown is requested (or the session owner is gone).
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
