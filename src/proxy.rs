//! Boundary reverse proxy.
//!
//! Forwards any HTTP request arriving at the public surface to the
//! backend 1:1: `<backend-base><path><query>`. Hop-by-hop headers are
//! stripped in both directions, `x-forwarded-*` headers are added, and
//! a fallback bearer credential is injected when the caller sent none.
//! The proxy is stateless and purely pass-through: no caching, no
//! retry, one backend call per inbound call, redirects returned to the
//! caller unmodified.

use std::net::SocketAddr;

use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::Result;

/// Headers that belong to a single transport hop and must not be
/// forwarded in either direction.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Immutable per-process proxy configuration.
#[derive(Clone)]
pub struct ProxyState {
    client: reqwest::Client,
    base_url: String,
    fallback_token: Option<String>,
}

impl ProxyState {
    /// Builds the proxy state. The outbound client never follows
    /// redirects so 3xx responses reach the caller unmodified.
    #[must_use]
    pub fn new(base_url: impl Into<String>, fallback_token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            fallback_token,
        }
    }
}

/// Builds the proxy router: every method, every path.
#[must_use]
pub fn router(state: ProxyState) -> Router {
    Router::new()
        .fallback(forward)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds `addr` and serves the proxy until the task is cancelled.
///
/// # Errors
///
/// Returns [`FeedError::Config`](crate::FeedError::Config) if the
/// listen address cannot be bound.
pub async fn serve(addr: &str, state: ProxyState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| crate::FeedError::Config(format!("cannot bind proxy to {addr}: {e}")))?;
    info!(addr, "Reverse proxy listening");

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| crate::FeedError::Config(format!("proxy server failed: {e}")))
}

/// Forwards one inbound request to the backend and mirrors the response.
async fn forward(
    State(state): State<ProxyState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_string(), ToString::to_string);
    let target = format!("{}{path_and_query}", state.base_url);

    let headers = build_forward_headers(
        &parts.headers,
        parts.uri.scheme_str(),
        peer.map(|ConnectInfo(addr)| addr),
        state.fallback_token.as_deref(),
    );

    // GET and HEAD are bodiless; everything else forwards the body verbatim.
    let body_bytes = if parts.method == Method::GET || parts.method == Method::HEAD {
        None
    } else {
        match axum::body::to_bytes(body, usize::MAX).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                debug!("Unreadable request body: {e}");
                return (StatusCode::BAD_REQUEST, "unreadable request body").into_response();
            }
        }
    };

    debug!(method = %parts.method, target, "Forwarding request");

    let mut outbound = state
        .client
        .request(parts.method, &target)
        .headers(headers);
    if let Some(bytes) = body_bytes {
        outbound = outbound.body(bytes);
    }

    let upstream = match outbound.send().await {
        Ok(response) => response,
        Err(e) => {
            error!("Backend call failed: {e}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "proxy forward failed").into_response();
        }
    };

    let status = upstream.status();
    let response_headers = filter_response_headers(upstream.headers());
    let body = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Backend body read failed: {e}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "proxy body read failed")
                .into_response();
        }
    };

    let mut response = axum::http::Response::builder().status(status);
    if let Some(map) = response.headers_mut() {
        *map = response_headers;
    }
    response
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Returns `true` for headers that must not cross the proxy.
fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Builds the outbound header set: inbound headers minus `host` and
/// hop-by-hop, plus `x-forwarded-*` and the fallback credential.
fn build_forward_headers(
    inbound: &HeaderMap,
    scheme: Option<&str>,
    peer: Option<SocketAddr>,
    fallback_token: Option<&str>,
) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, value) in inbound {
        if name == header::HOST || is_hop_by_hop(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    if let Some(host) = inbound.get(header::HOST) {
        headers.insert(HeaderName::from_static("x-forwarded-host"), host.clone());
    }
    if let Ok(proto) = HeaderValue::from_str(scheme.unwrap_or("http")) {
        headers.insert(HeaderName::from_static("x-forwarded-proto"), proto);
    }

    let forwarded_for = match (
        inbound
            .get("x-forwarded-for")
            .or_else(|| inbound.get("x-real-ip"))
            .and_then(|v| v.to_str().ok()),
        peer,
    ) {
        (Some(existing), Some(peer)) => format!("{existing}, {}", peer.ip()),
        (Some(existing), None) => existing.to_string(),
        (None, Some(peer)) => peer.ip().to_string(),
        (None, None) => String::new(),
    };
    if !forwarded_for.is_empty()
        && let Ok(value) = HeaderValue::from_str(&forwarded_for)
    {
        headers.insert(HeaderName::from_static("x-forwarded-for"), value);
    }

    if !headers.contains_key(header::AUTHORIZATION)
        && let Some(token) = fallback_token
        && let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}"))
    {
        headers.insert(header::AUTHORIZATION, value);
    }

    headers
}

/// Strips hop-by-hop headers from the backend response.
fn filter_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in upstream {
        if is_hop_by_hop(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}
