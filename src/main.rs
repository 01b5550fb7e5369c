use demandfeed::config::fetch_config;
use demandfeed::proxy::{self, ProxyState};
use demandfeed::{FeedError, RealtimeFeed};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), FeedError> {
    // Initialize tracing subscriber for logging output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "demandfeed=info".into()),
        )
        .init();

    let app_config = fetch_config()?;

    let proxy_state = ProxyState::new(
        app_config.backend.base_url.clone(),
        app_config.backend.static_token.clone(),
    );
    let proxy_addr = app_config.proxy.listen_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = proxy::serve(&proxy_addr, proxy_state).await {
            tracing::error!("Proxy exited: {e}");
        }
    });

    let feed = RealtimeFeed::new(app_config.backend);
    feed.connect().await;

    let mut updates = feed.updates();
    loop {
        if updates.changed().await.is_err() {
            break;
        }
        info!(
            connected = feed.is_connected(),
            buffered = feed.demands().len(),
            error = ?feed.last_error(),
            "Feed update"
        );
    }

    Ok(())
}
