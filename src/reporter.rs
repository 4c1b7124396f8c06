//! Error reporting to an external Sentry-compatible collector.
//!
//! Each pipeline failure becomes one [`ErrorEvent`] posted to
//! `<collector_url>/api/<project>/store/` with an `X-Sentry-Auth` header.
//! Collector credentials live in the key-value store next to the identity
//! records. Reporting is best-effort: anything that goes wrong here is
//! logged and dropped, never reported recursively.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use serde::{Deserialize, Serialize};

use crate::config::model::ReporterConfig;
use crate::error::ProxyError;
use crate::server::HttpClient;
use crate::store::KeyValueStore;

pub const PLATFORM: &str = "javascript";
pub const PROTOCOL_VERSION: u8 = 7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub event_id: String,
    pub message: String,
    pub timestamp: f64,
    pub logger: String,
    pub platform: String,
}

impl ErrorEvent {
    #[must_use]
    pub fn new(message: impl Into<String>, timestamp: f64, logger: impl Into<String>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().simple().to_string(),
            message: message.into(),
            timestamp,
            logger: logger.into(),
            platform: PLATFORM.to_string(),
        }
    }
}

/// Seconds since the Unix epoch, with sub-second precision.
#[must_use]
pub fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}

/// Value of the `X-Sentry-Auth` header.
#[must_use]
pub fn auth_header(client_name: &str, timestamp: f64, key: &str) -> String {
    [
        format!("Sentry sentry_version={PROTOCOL_VERSION}"),
        format!("sentry_timestamp={timestamp}"),
        format!("sentry_client={client_name}/0"),
        format!("sentry_key={key}"),
    ]
    .join(", ")
}

#[must_use]
pub fn store_url(collector_url: &str, project_id: &str) -> String {
    format!(
        "{}/api/{project_id}/store/",
        collector_url.trim_end_matches('/')
    )
}

/// One fully-addressed event, ready to send.
#[derive(Debug, Clone)]
pub struct Submission {
    pub url: String,
    pub auth: String,
    pub event: ErrorEvent,
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn submit(&self, submission: &Submission) -> Result<(), ProxyError>;
}

/// Posts events over the shared pooled HTTP client.
pub struct HttpEventSink {
    client: HttpClient,
}

impl HttpEventSink {
    #[must_use]
    pub const fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventSink for HttpEventSink {
    async fn submit(&self, submission: &Submission) -> Result<(), ProxyError> {
        let transport = |source: Box<dyn std::error::Error + Send + Sync>| ProxyError::Transport {
            upstream: submission.url.clone(),
            source,
        };

        let body = serde_json::to_vec(&submission.event).map_err(|e| transport(Box::new(e)))?;
        let req = hyper::Request::post(submission.url.as_str())
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .header("x-sentry-auth", submission.auth.as_str())
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| transport(Box::new(e)))?;

        let response = self
            .client
            .request(req)
            .await
            .map_err(|e| transport(Box::new(e)))?;
        let status = response.status();
        // Drain so the connection can go back to the pool.
        let _ = response.into_body().collect().await;

        if status.is_success() {
            Ok(())
        } else {
            Err(transport(format!("collector responded with {status}").into()))
        }
    }
}

#[derive(Clone)]
pub struct ErrorReporter {
    store: Arc<dyn KeyValueStore>,
    sink: Arc<dyn EventSink>,
}

impl ErrorReporter {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, sink: Arc<dyn EventSink>) -> Self {
        Self { store, sink }
    }

    /// Report `error` to the collector. Returns `true` if the collector accepted it.
    pub async fn report(
        &self,
        config: &ReporterConfig,
        error: &(dyn std::error::Error + Send + Sync),
    ) -> bool {
        if !config.enabled {
            return false;
        }

        let timestamp = epoch_seconds();
        let event = ErrorEvent::new(error.to_string(), timestamp, &config.client_name);
        let event_id = event.event_id.clone();

        let submission = match self.address(config, timestamp, event).await {
            Ok(Some(submission)) => submission,
            Ok(None) => {
                tracing::warn!(
                    event_id = %event_id,
                    "collector credentials not provisioned, error not reported"
                );
                return false;
            }
            Err(e) => {
                tracing::warn!(event_id = %event_id, error = %e, "collector credential lookup failed");
                return false;
            }
        };

        match self.sink.submit(&submission).await {
            Ok(()) => {
                tracing::debug!(event_id = %event_id, "error reported");
                true
            }
            Err(e) => {
                tracing::warn!(event_id = %event_id, error = %e, "error report not delivered");
                false
            }
        }
    }

    async fn address(
        &self,
        config: &ReporterConfig,
        timestamp: f64,
        event: ErrorEvent,
    ) -> Result<Option<Submission>, ProxyError> {
        let Some(project_id) = self.store.get(&config.project_id_key).await? else {
            return Ok(None);
        };
        let Some(key) = self.store.get(&config.api_key_key).await? else {
            return Ok(None);
        };

        Ok(Some(Submission {
            url: store_url(&config.collector_url, &project_id),
            auth: auth_header(&config.client_name, timestamp, &key),
            event,
        }))
    }
}
