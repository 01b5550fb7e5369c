//! Volatile credential storage shared by the feed and the proxy.
//!
//! Holds the current bearer credential under a small fixed set of
//! well-known key names. Nothing is persisted to disk: the store lives
//! for the process only, matching the session-storage semantics of the
//! upstream deployment. Writes are visible to the next connection
//! attempt but never interrupt an already-open connection.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use zeroize::Zeroizing;

/// Well-known storage keys managed by this module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CredentialKey {
    /// Session token obtained through `authenticate`.
    AuthToken,
    /// Statically configured fallback token.
    StaticToken,
}

impl CredentialKey {
    /// Returns the storage entry identifier.
    pub fn storage_id(self) -> &'static str {
        match self {
            Self::AuthToken => "demandfeed.auth_token",
            Self::StaticToken => "demandfeed.static_token",
        }
    }

    /// All credential keys, in the order `clear` removes them.
    pub const ALL: [CredentialKey; 2] = [Self::AuthToken, Self::StaticToken];
}

/// A bearer token with an optional expiry instant.
#[derive(Clone)]
pub struct Credential {
    pub token: Zeroizing<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Builds a credential with no expiry.
    #[must_use]
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: Zeroizing::new(token.into()),
            expires_at: None,
        }
    }

    /// Returns `true` if the expiry instant, when present, has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

/// In-process credential store keyed by [`CredentialKey`].
#[derive(Default)]
pub struct CredentialStore {
    entries: RwLock<HashMap<CredentialKey, Credential>>,
}

impl CredentialStore {
    /// Creates an empty store, optionally seeded with a static token.
    #[must_use]
    pub fn new(static_token: Option<String>) -> Self {
        let store = Self::default();
        if let Some(token) = static_token {
            store.save(CredentialKey::StaticToken, Credential::bearer(token));
        }
        store
    }

    /// Saves a credential under the given key, replacing any previous value.
    pub fn save(&self, key: CredentialKey, credential: Credential) {
        self.entries
            .write()
            .expect("credential store lock poisoned")
            .insert(key, credential);
    }

    /// Loads the credential stored under `key`, if any.
    #[must_use]
    pub fn load(&self, key: CredentialKey) -> Option<Credential> {
        self.entries
            .read()
            .expect("credential store lock poisoned")
            .get(&key)
            .cloned()
    }

    /// Returns the token to use for the next outbound request or
    /// connection attempt: the session token when present and not
    /// expired, otherwise the static fallback.
    #[must_use]
    pub fn active_token(&self) -> Option<Zeroizing<String>> {
        let entries = self
            .entries
            .read()
            .expect("credential store lock poisoned");
        if let Some(cred) = entries.get(&CredentialKey::AuthToken)
            && !cred.is_expired()
        {
            return Some(cred.token.clone());
        }
        entries
            .get(&CredentialKey::StaticToken)
            .map(|c| c.token.clone())
    }

    /// Removes the session token, leaving the static fallback intact.
    pub fn clear_session(&self) {
        self.entries
            .write()
            .expect("credential store lock poisoned")
            .remove(&CredentialKey::AuthToken);
    }

    /// Removes every stored credential.
    pub fn clear(&self) {
        let mut entries = self
            .entries
            .write()
            .expect("credential store lock poisoned");
        for key in CredentialKey::ALL {
            entries.remove(&key);
        }
    }
}
