//! Async WebSocket client for the backend's realtime endpoint.

pub mod connector;
pub mod reconnect;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use tungstenite::Message;

use crate::Result;
use crate::models::{PongReply, SubscribeRequest, UnsubscribeRequest};

/// Write half of a realtime connection.
pub type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Read half of a realtime connection.
pub type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Establishes a WebSocket connection to the given URL.
///
/// # Errors
///
/// Returns a [`FeedError`](crate::FeedError) if the connection or TLS
/// handshake fails.
pub async fn connect(url: &str) -> Result<(WsWriter, WsReader)> {
    let (ws_stream, _) = connect_async(url).await?;
    info!("WebSocket handshake completed");

    Ok(ws_stream.split())
}

/// Subscribes to creation events for a collection, requesting all fields.
///
/// # Errors
///
/// Returns a [`FeedError`](crate::FeedError) if sending the
/// subscription message fails.
pub async fn subscribe_create(write: &mut WsWriter, collection: &str) -> Result<()> {
    let request = SubscribeRequest::create_events(collection);
    let json = serde_json::to_string(&request)?;
    write.send(Message::Text(json.into())).await?;
    info!(collection, "Sent create-event subscription");

    Ok(())
}

/// Ends the active subscription.
///
/// # Errors
///
/// Returns a [`FeedError`](crate::FeedError) if sending the
/// unsubscribe message fails.
pub async fn unsubscribe(write: &mut WsWriter) -> Result<()> {
    let json = serde_json::to_string(&UnsubscribeRequest::new())?;
    write.send(Message::Text(json.into())).await?;
    info!("Unsubscribed");

    Ok(())
}

/// Answers a server keepalive ping.
///
/// # Errors
///
/// Returns a [`FeedError`](crate::FeedError) if sending the reply fails.
pub async fn pong(write: &mut WsWriter) -> Result<()> {
    let json = serde_json::to_string(&PongReply::new())?;
    write.send(Message::Text(json.into())).await?;
    debug!("Answered keepalive ping");

    Ok(())
}
