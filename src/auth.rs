//! Credential exchange against the backend's login endpoint.
//!
//! Exchanges `(identity, secret)` for a bearer token. The token is
//! subsequently supplied to the realtime endpoint as a connection-level
//! query parameter rather than a header, since the transport is
//! connection-oriented.

use chrono::{Duration, Utc};
use tracing::info;

use crate::Result;
use crate::credentials::Credential;
use crate::error::FeedError;
use crate::models::{LoginRequest, LoginResponse};
use zeroize::Zeroizing;

/// Performs the credential exchange and returns the issued credential.
///
/// # Errors
///
/// Returns [`FeedError::Auth`] when the backend rejects the identity or
/// secret, and [`FeedError::Http`] on transport failure.
pub async fn login(
    client: &reqwest::Client,
    base_url: &str,
    identity: &str,
    secret: &str,
) -> Result<Credential> {
    let url = format!("{base_url}/auth/login");
    let response = client
        .post(&url)
        .json(&LoginRequest {
            email: identity.to_string(),
            password: secret.to_string(),
        })
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(FeedError::Auth(format!(
            "login rejected with status {status}: {body}"
        )));
    }

    let body: LoginResponse = response.json().await?;
    if body.data.access_token.is_empty() {
        return Err(FeedError::Auth("no token returned".to_string()));
    }

    let expires_at = body
        .data
        .expires
        .map(|ms| Utc::now() + Duration::milliseconds(ms));

    info!("Obtained session credential");
    Ok(Credential {
        token: Zeroizing::new(body.data.access_token),
        expires_at,
    })
}
