//! Application configuration loaded from environment variables.
//!
//! - `DEMANDFEED_BASE_URL` — backend base address (REST item queries, login)
//! - `DEMANDFEED_WS_URL` — realtime endpoint override; when unset it is
//!   derived from the base URL (`http` → `ws` scheme, `/websocket` path)
//! - `DEMANDFEED_STATIC_TOKEN` — optional fallback bearer credential,
//!   injected by the proxy and used for unauthenticated feed sessions
//! - `DEMANDFEED_PROXY_ADDR` — listen address for the reverse proxy

/// Default backend base address.
const DEFAULT_BASE_URL: &str = "http://localhost:8055";

/// Default reverse proxy listen address.
const DEFAULT_PROXY_ADDR: &str = "127.0.0.1:3000";

/// Realtime endpoint path appended to the base URL.
const WEBSOCKET_PATH: &str = "/websocket";

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub proxy: ProxyConfig,
}

/// Backend endpoints and the optional fallback credential.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub websocket_url: String,
    pub static_token: Option<String>,
}

/// Reverse proxy settings.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub listen_addr: String,
}

/// Loads the application configuration from environment variables.
///
/// The realtime URL defaults to the base URL with the scheme switched
/// to `ws(s)` and `/websocket` appended; `DEMANDFEED_WS_URL` overrides
/// it. The static token is optional (anonymous mode).
///
/// # Errors
///
/// Returns [`FeedError::Config`](crate::FeedError::Config) if the base
/// URL has a scheme other than `http` or `https`.
pub fn fetch_config() -> crate::Result<AppConfig> {
    let base_url = non_empty_var("DEMANDFEED_BASE_URL")
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let base_url = base_url.trim_end_matches('/').to_string();

    let websocket_url = match non_empty_var("DEMANDFEED_WS_URL") {
        Some(url) => url,
        None => derive_websocket_url(&base_url)?,
    };

    let static_token = non_empty_var("DEMANDFEED_STATIC_TOKEN");

    let listen_addr = non_empty_var("DEMANDFEED_PROXY_ADDR")
        .unwrap_or_else(|| DEFAULT_PROXY_ADDR.to_string());

    Ok(AppConfig {
        backend: BackendConfig {
            base_url,
            websocket_url,
            static_token,
        },
        proxy: ProxyConfig { listen_addr },
    })
}

/// Derives the realtime endpoint from an HTTP base URL.
fn derive_websocket_url(base_url: &str) -> crate::Result<String> {
    if let Some(rest) = base_url.strip_prefix("https://") {
        Ok(format!("wss://{rest}{WEBSOCKET_PATH}"))
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        Ok(format!("ws://{rest}{WEBSOCKET_PATH}"))
    } else {
        Err(crate::FeedError::Config(format!(
            "DEMANDFEED_BASE_URL must start with http:// or https://, got {base_url}"
        )))
    }
}

/// Returns the value of an environment variable if it exists and is non-empty.
fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}
