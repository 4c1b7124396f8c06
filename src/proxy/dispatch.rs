//! Sending one credentialed request to one upstream.
//!
//! [`Dispatch`] is the seam between the fallback loop and the network. The
//! production [`HyperDispatcher`] uses the shared pooled client and buffers
//! the whole response body, so a retryable response can be dropped cleanly
//! before the next candidate is tried.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use url::Url;

use crate::error::ProxyError;
use crate::server::HttpClient;

#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[async_trait]
pub trait Dispatch: Send + Sync {
    /// `Err` only for transport failures; any HTTP status is an `Ok`.
    async fn dispatch(&self, request: &ProxyRequest) -> Result<UpstreamResponse, ProxyError>;
}

pub struct HyperDispatcher {
    client: HttpClient,
}

impl HyperDispatcher {
    #[must_use]
    pub const fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Dispatch for HyperDispatcher {
    #[allow(clippy::cast_possible_truncation)]
    async fn dispatch(&self, request: &ProxyRequest) -> Result<UpstreamResponse, ProxyError> {
        let upstream = request.url.host_str().unwrap_or_default().to_string();
        let transport = |source: Box<dyn std::error::Error + Send + Sync>| ProxyError::Transport {
            upstream: upstream.clone(),
            source,
        };

        let mut builder = hyper::Request::builder()
            .method(request.method.clone())
            .uri(request.url.as_str());
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        let req = builder
            .body(Full::new(request.body.clone()))
            .map_err(|e| transport(Box::new(e)))?;

        let start = Instant::now();
        let response = match request.timeout {
            Some(limit) => tokio::time::timeout(limit, self.client.request(req))
                .await
                .map_err(|_| transport(format!("no response within {}ms", limit.as_millis()).into()))?,
            None => self.client.request(req).await,
        }
        .map_err(|e| transport(Box::new(e)))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| transport(format!("body read error: {e}").into()))?
            .to_bytes();

        tracing::debug!(
            upstream = %upstream,
            status = status.as_u16(),
            latency_ms = start.elapsed().as_millis() as u64,
            "upstream responded"
        );

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}
