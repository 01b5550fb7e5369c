//! One-shot snapshot of recent demand records.
//!
//! Fetches the most recent records from the backend's item-listing
//! interface in descending recency order. The caller reverses them into
//! oldest-first order when seeding the display buffer.

use tracing::info;

use crate::Result;
use crate::error::FeedError;
use crate::models::{DEMANDS_COLLECTION, ItemsResponse};
use crate::models::demand::RawDemand;

/// Number of records requested per snapshot.
pub const SNAPSHOT_LIMIT: usize = 50;

/// Fetches the `SNAPSHOT_LIMIT` most recent demand records,
/// most-recent-first.
///
/// # Errors
///
/// Returns [`FeedError::Upstream`] on a non-2xx response and
/// [`FeedError::Http`] on transport failure. Callers seeding the live
/// buffer treat either as an empty result so the live stream can still
/// populate it.
pub async fn fetch_recent(
    client: &reqwest::Client,
    base_url: &str,
    token: Option<&str>,
) -> Result<Vec<RawDemand>> {
    let url = format!("{base_url}/items/{DEMANDS_COLLECTION}");
    let mut request = client
        .get(&url)
        .query(&[
            ("sort", "-date_created".to_string()),
            ("limit", SNAPSHOT_LIMIT.to_string()),
        ]);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FeedError::Upstream {
            status: status.as_u16(),
        });
    }

    let body: ItemsResponse = response.json().await?;
    info!(count = body.data.len(), "Fetched demand snapshot");
    Ok(body.data)
}
