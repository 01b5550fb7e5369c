//! Shared models for the backend's REST and realtime interfaces.
//!
//! Contains the realtime wire-protocol messages (subscribe, keepalive,
//! subscription events) and the REST envelope types for item queries
//! and credential exchange.

pub mod demand;

use serde::{Deserialize, Serialize};

use demand::RawDemand;

/// Collection this layer synchronizes.
pub const DEMANDS_COLLECTION: &str = "demands";

/// A `subscribe` request sent over the realtime connection.
#[derive(Serialize)]
pub struct SubscribeRequest {
    #[serde(rename = "type")]
    pub tpe: &'static str,
    pub collection: String,
    pub event: &'static str,
    pub query: SubscribeQuery,
}

/// Field selection for a subscription.
#[derive(Serialize)]
pub struct SubscribeQuery {
    pub fields: Vec<String>,
}

impl SubscribeRequest {
    /// Builds a create-event subscription requesting all fields.
    #[must_use]
    pub fn create_events(collection: &str) -> Self {
        Self {
            tpe: "subscribe",
            collection: collection.to_string(),
            event: "create",
            query: SubscribeQuery {
                fields: vec!["*".to_string()],
            },
        }
    }
}

/// An `unsubscribe` request ending the active subscription.
#[derive(Serialize)]
pub struct UnsubscribeRequest {
    #[serde(rename = "type")]
    pub tpe: &'static str,
}

impl UnsubscribeRequest {
    #[must_use]
    pub fn new() -> Self {
        Self { tpe: "unsubscribe" }
    }
}

impl Default for UnsubscribeRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Reply to a server keepalive ping.
#[derive(Serialize)]
pub struct PongReply {
    #[serde(rename = "type")]
    pub tpe: &'static str,
}

impl PongReply {
    #[must_use]
    pub fn new() -> Self {
        Self { tpe: "pong" }
    }
}

impl Default for PongReply {
    fn default() -> Self {
        Self::new()
    }
}

/// Error payload attached to a realtime `error` message.
#[derive(Debug, Clone, Deserialize)]
pub struct WireError {
    pub code: Option<String>,
    pub message: Option<String>,
}

/// A parsed server-to-client realtime message.
#[derive(Debug)]
pub enum ServerEvent {
    /// Keepalive; must be answered with [`PongReply`].
    Ping,
    /// Acknowledgement that the subscription is established.
    SubscriptionInit,
    /// One or more newly created records.
    Created(Vec<RawDemand>),
    /// Server-reported error.
    Error(String),
    /// Any message this layer does not act on.
    Ignored,
}

impl ServerEvent {
    /// Interprets a raw JSON message from the realtime connection.
    ///
    /// Creation payloads arrive either as a single object or as an
    /// array; both shapes are accepted. Records that fail to
    /// deserialize are dropped individually rather than poisoning the
    /// whole message.
    #[must_use]
    pub fn parse(value: serde_json::Value) -> Self {
        let tpe = value.get("type").and_then(|t| t.as_str());

        match tpe {
            Some("ping") => Self::Ping,
            Some("error") => {
                let detail = serde_json::from_value::<WireError>(
                    value.get("error").cloned().unwrap_or_default(),
                )
                .ok()
                .and_then(|e| e.message)
                .unwrap_or_else(|| "unspecified realtime error".to_string());
                Self::Error(detail)
            }
            Some("subscription") => {
                match value.get("event").and_then(|e| e.as_str()) {
                    Some("init") => Self::SubscriptionInit,
                    Some("create") => {
                        let records = match value.get("data") {
                            Some(serde_json::Value::Array(items)) => items
                                .iter()
                                .filter_map(|item| {
                                    serde_json::from_value(item.clone()).ok()
                                })
                                .collect(),
                            Some(item @ serde_json::Value::Object(_)) => {
                                serde_json::from_value(item.clone())
                                    .ok()
                                    .map(|d| vec![d])
                                    .unwrap_or_default()
                            }
                            _ => Vec::new(),
                        };
                        Self::Created(records)
                    }
                    _ => Self::Ignored,
                }
            }
            _ => Self::Ignored,
        }
    }
}

/// Envelope for item-listing responses (`GET /items/<collection>`).
#[derive(Deserialize)]
pub struct ItemsResponse {
    pub data: Vec<RawDemand>,
}

/// Credential exchange request body (`POST /auth/login`).
#[derive(Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Envelope for the credential exchange response.
#[derive(Deserialize)]
pub struct LoginResponse {
    pub data: LoginData,
}

/// Issued session credential.
#[derive(Deserialize)]
pub struct LoginData {
    pub access_token: String,
    /// Token time-to-live in milliseconds.
    pub expires: Option<i64>,
}
