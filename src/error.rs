//! Crate-level error types.
//!
//! [`FeedError`] unifies every error source (configuration, WebSocket,
//! HTTP, JSON) behind a single enum so callers can match on the variant
//! they care about while still using the `?` operator for easy
//! propagation.

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FeedError>;

/// Top-level error type returned by all public APIs.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Configuration is missing or inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// A WebSocket operation (connect, send, receive) failed.
    ///
    /// Transport errors are retried by the reconnect loop and are never
    /// fatal to the owning session.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// An HTTP request (snapshot fetch, login, proxy forward) failed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Credential exchange was rejected by the backend.
    ///
    /// Reported to the caller of `authenticate`; an already-established
    /// connection is unaffected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The subscribe call failed after a successful connect.
    ///
    /// Surfaced as an error state; the session does not retry this on
    /// its own, the caller must explicitly reconnect.
    #[error("subscription failed: {0}")]
    Subscribe(String),

    /// The backend answered with a non-2xx status.
    #[error("upstream returned status {status}")]
    Upstream { status: u16 },
}
