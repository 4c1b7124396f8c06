//! Email → [`IdentityRecord`] lookup against the key-value store.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ProxyError;
use crate::store::KeyValueStore;

/// Routing namespace and backend bearer token for one identity.
///
/// Stored externally as `{"ns": "...", "token": "..."}`.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct IdentityRecord {
    #[serde(rename = "ns")]
    pub namespace: String,
    pub token: String,
}

// Manual Debug so tokens never end up in logs.
impl std::fmt::Debug for IdentityRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityRecord")
            .field("namespace", &self.namespace)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn KeyValueStore>,
    key_prefix: String,
}

impl IdentityResolver {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
        }
    }

    /// Look up the record for `email`. Exactly one store read, no retry.
    pub async fn resolve(&self, email: &str) -> Result<IdentityRecord, ProxyError> {
        let key = format!("{}{email}", self.key_prefix);
        let raw = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| ProxyError::UnknownIdentity {
                email: email.to_string(),
            })?;

        serde_json::from_str(&raw).map_err(|e| ProxyError::CorruptRecord {
            email: email.to_string(),
            source: Box::new(e),
        })
    }
}
