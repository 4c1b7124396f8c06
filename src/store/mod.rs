//! Read-only key-value lookups.
//!
//! The proxy never writes to the store: identity records, the fallback host
//! list, and the collector credentials are all provisioned externally. The
//! [`KeyValueStore`] trait is the only seam through which they are read.
//! Backends: [`memory::MemoryStore`] (in-process map, optionally loaded from
//! a JSON file) and, behind the `redis` feature, [`redis_store::RedisStore`].

pub mod memory;

#[cfg(feature = "redis")]
pub mod redis_store;

use async_trait::async_trait;

use crate::error::ProxyError;

pub use memory::MemoryStore;

// Used as Arc<dyn KeyValueStore>, so async_trait rather than native async fn.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fetch the raw value under `key`. `Ok(None)` means the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>, ProxyError>;
}
