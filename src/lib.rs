//! Realtime demand feed synchronization layer.
//!
//! Combines a point-in-time snapshot with a live create-event
//! subscription into one ordered, capacity-bound view of demand
//! records, kept alive across failures by bounded exponential backoff.
//! Ships with a boundary reverse proxy that forwards arbitrary HTTP
//! calls to the backend with header sanitization and fallback
//! credential injection.

pub mod auth;
pub mod buffer;
pub mod config;
pub mod credentials;
pub mod error;
pub mod facade;
pub mod merge;
pub mod models;
pub mod proxy;
pub mod snapshot;
pub mod websocket;

pub use error::{FeedError, Result};
pub use facade::RealtimeFeed;
pub use websocket::reconnect::ConnectionState;
