//! In-process [`KeyValueStore`] backed by a `HashMap`.
//!
//! Loaded once at startup from a flat JSON object (`--store-file`). String
//! values are stored as-is; any other JSON value is stored as its compact
//! serialization, so identity records may be written either as an escaped
//! string (the way an external KV service returns them) or inline.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use super::KeyValueStore;
use crate::error::{AuthProxyError, ProxyError};

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn from_json(json: &str, source_label: &str) -> Result<Self, AuthProxyError> {
        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(json)
            .map_err(|e| AuthProxyError::StoreInit {
                backend: "file",
                source: format!("{source_label}: {e}").into(),
            })?;

        let entries = object
            .into_iter()
            .map(|(key, value)| {
                let raw = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, raw)
            })
            .collect();

        Ok(Self { entries })
    }

    pub async fn from_file(path: &Path) -> Result<Self, AuthProxyError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AuthProxyError::StoreInit {
                backend: "file",
                source: format!("{}: {e}", path.display()).into(),
            })?;
        Self::from_json(&content, &path.display().to_string())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ProxyError> {
        Ok(self.entries.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_objects_are_serialized() {
        let store = MemoryStore::from_json(
            r#"{
                "alice@example.com": {"ns": "team-a", "token": "abc"},
                "bob@example.com": "{\"ns\":\"team-b\",\"token\":\"def\"}",
                "tunnelHostnames": "a.example.com,b.example.com"
            }"#,
            "test",
        )
        .unwrap();

        assert_eq!(store.len(), 3);
        let alice = store.entries.get("alice@example.com").unwrap();
        let parsed: serde_json::Value = serde_json::from_str(alice).unwrap();
        assert_eq!(parsed["token"], "abc");
        assert_eq!(
            store.entries.get("tunnelHostnames").map(String::as_str),
            Some("a.example.com,b.example.com")
        );
    }

    #[test]
    fn non_object_json_is_rejected() {
        let err = MemoryStore::from_json("[1, 2]", "store.json").unwrap_err();
        assert!(err.to_string().contains("store.json"));
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let store = MemoryStore::new().with("sentryKey", "k");
        assert_eq!(store.get("sentryKey").await.unwrap().as_deref(), Some("k"));
        assert!(store.get("sentryProjectID").await.unwrap().is_none());
    }
}
