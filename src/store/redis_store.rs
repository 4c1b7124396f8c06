//! Redis-backed [`KeyValueStore`].
//!
//! Reads plain string values with `GET <prefix><key>` over a multiplexed
//! Tokio connection. The connection is cloned per lookup; clones share the
//! same underlying socket, so concurrent requests do not serialize on a lock.

use async_trait::async_trait;
use redis::AsyncCommands;

use super::KeyValueStore;
use crate::error::{AuthProxyError, ProxyError};

pub struct RedisStore {
    connection: redis::aio::MultiplexedConnection,
    prefix: String,
}

impl RedisStore {
    pub async fn connect(url: &str, prefix: &str) -> Result<Self, AuthProxyError> {
        let client = redis::Client::open(url).map_err(|e| AuthProxyError::StoreInit {
            backend: "redis",
            source: Box::new(e),
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AuthProxyError::StoreInit {
                backend: "redis",
                source: Box::new(e),
            })?;

        Ok(Self {
            connection,
            prefix: prefix.to_string(),
        })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ProxyError> {
        let mut conn = self.connection.clone();
        let full_key = format!("{}{key}", self.prefix);

        conn.get::<_, Option<String>>(&full_key)
            .await
            .map_err(|e| ProxyError::Store {
                backend: "redis",
                source: Box::new(e),
            })
    }
}
