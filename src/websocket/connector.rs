//! Credential-bound ownership of a single realtime connection.
//!
//! A [`SocketConnector`] binds the realtime URL and an optional bearer
//! credential at construction; credential rotation replaces the
//! connector instance rather than mutating it. [`ActiveConnection`] is
//! one open duplex link with its subscribe operation.

use std::time::Duration;

use futures_util::StreamExt;
use tracing::{debug, info, warn};
use tungstenite::Message;

use super::{WsReader, WsWriter, connect, pong, subscribe_create, unsubscribe};
use crate::Result;
use crate::error::FeedError;
use crate::models::ServerEvent;
use crate::models::demand::RawDemand;

/// How long to wait for the subscription acknowledgement.
pub const SUBSCRIBE_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds connection attempts against the realtime endpoint, bound to
/// at most one credential.
#[derive(Debug, Clone)]
pub struct SocketConnector {
    url: String,
}

impl SocketConnector {
    /// Creates a connector for `ws_url`, optionally bound to a bearer
    /// token supplied as a connection-level query parameter.
    #[must_use]
    pub fn new(ws_url: &str, token: Option<&str>) -> Self {
        let url = match token {
            Some(token) if !token.is_empty() => {
                let separator = if ws_url.contains('?') { '&' } else { '?' };
                format!("{ws_url}{separator}access_token={token}")
            }
            _ => ws_url.to_string(),
        };
        Self { url }
    }

    /// Returns `true` if a credential is bound to this connector.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.url.contains("access_token=")
    }

    /// Opens one duplex connection.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::WebSocket`] if the connection fails; the
    /// reconnect loop treats that as a transport error and retries.
    pub async fn open(&self) -> Result<ActiveConnection> {
        let (write, read) = connect(&self.url).await?;
        Ok(ActiveConnection { write, read })
    }
}

/// One open realtime connection.
pub struct ActiveConnection {
    pub write: WsWriter,
    pub read: WsReader,
}

impl ActiveConnection {
    /// Issues the create-event subscription and waits for the server
    /// acknowledgement.
    ///
    /// A create event arriving before the acknowledgement also counts
    /// as establishment; such records are returned so they are not
    /// dropped. Keepalive pings received while waiting are answered.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Subscribe`] if the server reports an error,
    /// closes the connection, or the acknowledgement does not arrive
    /// within [`SUBSCRIBE_ACK_TIMEOUT`]. Subscription failures are not
    /// auto-retried by the session.
    pub async fn establish_subscription(
        &mut self,
        collection: &str,
    ) -> Result<Vec<RawDemand>> {
        subscribe_create(&mut self.write, collection).await?;

        let ack = tokio::time::timeout(SUBSCRIBE_ACK_TIMEOUT, async {
            loop {
                let msg = match self.read.next().await {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        return Err(FeedError::Subscribe(format!(
                            "transport failed while subscribing: {e}"
                        )));
                    }
                    None => {
                        return Err(FeedError::Subscribe(
                            "connection closed while subscribing".to_string(),
                        ));
                    }
                };

                let Message::Text(text) = msg else { continue };
                let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
                    continue;
                };

                match ServerEvent::parse(value) {
                    ServerEvent::SubscriptionInit => {
                        info!(collection, "Subscription established");
                        return Ok(Vec::new());
                    }
                    ServerEvent::Created(records) => {
                        debug!(
                            count = records.len(),
                            "Create event arrived before subscription ack"
                        );
                        return Ok(records);
                    }
                    ServerEvent::Error(detail) => {
                        return Err(FeedError::Subscribe(detail));
                    }
                    ServerEvent::Ping => {
                        pong(&mut self.write).await?;
                    }
                    ServerEvent::Ignored => {}
                }
            }
        })
        .await;

        match ack {
            Ok(result) => result,
            Err(_) => Err(FeedError::Subscribe(
                "timed out waiting for subscription acknowledgement".to_string(),
            )),
        }
    }

    /// Tears the connection down, best effort.
    pub async fn close(mut self) {
        if let Err(e) = unsubscribe(&mut self.write).await {
            warn!("Unsubscribe on close failed: {e}");
        }
        let mut stream = self.write.reunite(self.read).ok();
        if let Some(stream) = stream.as_mut()
            && let Err(e) = futures_util::SinkExt::close(stream).await
        {
            debug!("Close frame failed: {e}");
        }
    }
}
