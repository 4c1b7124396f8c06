//! The authenticate-and-forward pipeline.
//!
//! For every inbound request, [`ForwardingEngine::handle`] runs, strictly
//! in sequence: claim extraction, one identity lookup, candidate planning,
//! then the candidate loop. No upstream is contacted unless a token was
//! resolved. Every failure is mirrored to the collector before the response
//! is built.
//!
//! In fallback mode a candidate answering with a status in
//! [`RETRYABLE_STATUSES`] is skipped in favour of the next one; any other
//! status is returned as-is. Transport failures are reported and skipped in
//! both modes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use url::Url;

use super::dispatch::{Dispatch, ProxyRequest, UpstreamResponse};
use super::headers::{bearer, build_proxy_headers, strip_response_hop_by_hop};
use super::upstream::{self, UpstreamPlan};
use crate::config::model::{Config, UpstreamMode};
use crate::error::ProxyError;
use crate::identity::{ClaimExtractor, IdentityResolver};
use crate::reporter::ErrorReporter;
use crate::store::KeyValueStore;

/// 502: origin unreachable behind the tunnel. 503: tunnel not registered.
pub const RETRYABLE_STATUSES: [StatusCode; 2] =
    [StatusCode::BAD_GATEWAY, StatusCode::SERVICE_UNAVAILABLE];

#[must_use]
pub fn is_retryable(status: StatusCode) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

#[derive(Debug)]
pub struct Stats {
    pub forwarded: AtomicU64,
    pub failed: AtomicU64,
    pub fallbacks: AtomicU64,
    pub reported: AtomicU64,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            forwarded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
            reported: AtomicU64::new(0),
        }
    }
}

#[derive(Debug)]
pub struct InboundRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub correlation_id: String,
}

#[derive(Debug)]
struct Forwarded {
    response: UpstreamResponse,
    upstream: Url,
}

/// A pipeline failure, remembering whether the collector already saw it.
struct Failure {
    error: ProxyError,
    reported: bool,
}

impl From<ProxyError> for Failure {
    fn from(error: ProxyError) -> Self {
        Self {
            error,
            reported: false,
        }
    }
}

pub struct ForwardingEngine {
    store: Arc<dyn KeyValueStore>,
    reporter: ErrorReporter,
    dispatcher: Arc<dyn Dispatch>,
    stats: Stats,
}

impl ForwardingEngine {
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        reporter: ErrorReporter,
        dispatcher: Arc<dyn Dispatch>,
    ) -> Self {
        Self {
            store,
            reporter,
            dispatcher,
            stats: Stats::new(),
        }
    }

    #[must_use]
    pub const fn stats(&self) -> &Stats {
        &self.stats
    }

    pub async fn handle(&self, config: &Config, inbound: InboundRequest) -> Response {
        match self.forward(config, &inbound).await {
            Ok(forwarded) => {
                self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    correlation_id = %inbound.correlation_id,
                    upstream = %forwarded.upstream,
                    status = forwarded.response.status.as_u16(),
                    "request forwarded"
                );
                upstream_response(forwarded.response, &inbound.correlation_id)
            }
            Err(failure) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                if failure.error.is_identity_failure() {
                    tracing::warn!(
                        correlation_id = %inbound.correlation_id,
                        error = %failure.error,
                        "identity rejected"
                    );
                } else {
                    tracing::error!(
                        correlation_id = %inbound.correlation_id,
                        error = %failure.error,
                        "request failed"
                    );
                }
                if !failure.reported {
                    self.report(config, &failure.error).await;
                }
                error_response(&failure.error, &inbound.correlation_id)
            }
        }
    }

    async fn forward(&self, config: &Config, inbound: &InboundRequest) -> Result<Forwarded, Failure> {
        let identity = &config.identity;
        let email = ClaimExtractor::new(identity.header.as_str()).extract_email(&inbound.headers)?;
        let record = IdentityResolver::new(Arc::clone(&self.store), identity.key_prefix.as_str())
            .resolve(&email)
            .await?;
        let authorization = bearer(&record.token).map_err(|e| ProxyError::CorruptRecord {
            email: email.clone(),
            source: Box::new(e),
        })?;

        tracing::debug!(
            correlation_id = %inbound.correlation_id,
            email = %email,
            namespace = %record.namespace,
            "identity resolved"
        );

        let plan = upstream::plan(
            &config.upstream,
            self.store.as_ref(),
            &inbound.uri,
            &inbound.headers,
            &record.namespace,
        )
        .await?;

        self.try_candidates(config, &plan, inbound, &authorization).await
    }

    async fn try_candidates(
        &self,
        config: &Config,
        plan: &UpstreamPlan,
        inbound: &InboundRequest,
        authorization: &HeaderValue,
    ) -> Result<Forwarded, Failure> {
        let timeout = config.upstream.timeout.map(Duration::from_millis);
        let mut last_transport_error = None;

        for (attempt, url) in plan.candidates.iter().enumerate() {
            let request = ProxyRequest {
                method: inbound.method.clone(),
                url: url.clone(),
                headers: build_proxy_headers(
                    &inbound.headers,
                    url,
                    authorization,
                    config.upstream.authorization,
                    config.upstream.strip_hop_by_hop,
                    &inbound.correlation_id,
                ),
                body: inbound.body.clone(),
                timeout,
            };

            match self.dispatcher.dispatch(&request).await {
                Ok(response)
                    if plan.mode == UpstreamMode::Fallback && is_retryable(response.status) =>
                {
                    self.stats.fallbacks.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        correlation_id = %inbound.correlation_id,
                        upstream = %url,
                        attempt = attempt + 1,
                        status = response.status.as_u16(),
                        "upstream unavailable, trying next candidate"
                    );
                }
                Ok(response) => {
                    return Ok(Forwarded {
                        response,
                        upstream: url.clone(),
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        correlation_id = %inbound.correlation_id,
                        upstream = %url,
                        attempt = attempt + 1,
                        error = %err,
                        "upstream dispatch failed"
                    );
                    self.report(config, &err).await;
                    last_transport_error = Some(err);
                }
            }
        }

        match (plan.mode, last_transport_error) {
            (UpstreamMode::Single, Some(error)) => Err(Failure {
                error,
                reported: true,
            }),
            _ => Err(ProxyError::ExhaustedFallback.into()),
        }
    }

    async fn report(&self, config: &Config, error: &ProxyError) {
        if self.reporter.report(&config.reporter, error).await {
            self.stats.reported.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn upstream_response(response: UpstreamResponse, correlation_id: &str) -> Response {
    let UpstreamResponse {
        status,
        mut headers,
        body,
    } = response;
    strip_response_hop_by_hop(&mut headers);

    let mut builder = Response::builder().status(status);
    for (key, value) in &headers {
        builder = builder.header(key, value);
    }
    builder
        .header("x-correlation-id", correlation_id)
        .body(Body::from(body))
        .unwrap_or_else(|e| {
            tracing::error!(
                correlation_id = %correlation_id,
                error = %e,
                "failed to build response"
            );
            StatusCode::BAD_GATEWAY.into_response()
        })
}

/// Plain-text response for a pipeline failure.
///
/// Transport failures carry the raw error text and exhaustion its fixed
/// message; identity and store failures only expose the status reason.
#[must_use]
pub fn error_response(error: &ProxyError, correlation_id: &str) -> Response {
    let status = error.status();
    let body = match error {
        ProxyError::Transport { .. } | ProxyError::ExhaustedFallback => error.to_string(),
        _ => status.canonical_reason().unwrap_or("Error").to_string(),
    };

    let mut response = (status, body).into_response();
    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        response.headers_mut().insert("x-correlation-id", value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{UpstreamConfig, DEFAULT_ASSERTION_HEADER};
    use crate::identity::claim::tests::assertion_for;
    use crate::reporter::tests::RecordingSink;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use axum::http::header;
    use http_body_util::BodyExt;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    /// Answers per host from a script; unknown hosts fail at the transport level.
    #[derive(Default)]
    struct ScriptedDispatcher {
        statuses: HashMap<String, u16>,
        seen: Mutex<Vec<ProxyRequest>>,
    }

    impl ScriptedDispatcher {
        fn with(mut self, host: &str, status: u16) -> Self {
            self.statuses.insert(host.to_string(), status);
            self
        }

        async fn hosts(&self) -> Vec<String> {
            self.seen
                .lock()
                .await
                .iter()
                .map(|r| r.url.host_str().unwrap_or_default().to_string())
                .collect()
        }
    }

    #[async_trait]
    impl Dispatch for ScriptedDispatcher {
        async fn dispatch(&self, request: &ProxyRequest) -> Result<UpstreamResponse, ProxyError> {
            self.seen.lock().await.push(request.clone());
            let host = request.url.host_str().unwrap_or_default();
            match self.statuses.get(host) {
                Some(&code) => Ok(UpstreamResponse {
                    status: StatusCode::from_u16(code).unwrap(),
                    headers: HeaderMap::new(),
                    body: Bytes::from(format!("hello from {host}")),
                }),
                None => Err(ProxyError::Transport {
                    upstream: host.to_string(),
                    source: "connection refused".into(),
                }),
            }
        }
    }

    struct Harness {
        engine: ForwardingEngine,
        dispatcher: Arc<ScriptedDispatcher>,
        sink: Arc<RecordingSink>,
    }

    /// Delegates to a memory store, except for one key whose reads fail.
    struct FailingStore {
        inner: MemoryStore,
        failing_key: &'static str,
    }

    #[async_trait]
    impl KeyValueStore for FailingStore {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn get(&self, key: &str) -> Result<Option<String>, ProxyError> {
            if key == self.failing_key {
                return Err(ProxyError::Store {
                    backend: "failing",
                    source: "connection reset by peer".into(),
                });
            }
            self.inner.get(key).await
        }
    }

    fn provisioned(hostnames: &str) -> MemoryStore {
        MemoryStore::new()
            .with("alice@example.com", r#"{"ns":"team-a","token":"abc"}"#)
            .with("tunnelHostnames", hostnames)
            .with("sentryProjectID", "1")
            .with("sentryKey", "k")
    }

    fn harness_with(store: Arc<dyn KeyValueStore>, dispatcher: ScriptedDispatcher) -> Harness {
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = Arc::new(dispatcher);
        let engine = ForwardingEngine::new(
            Arc::clone(&store),
            ErrorReporter::new(store, sink.clone()),
            dispatcher.clone(),
        );
        Harness {
            engine,
            dispatcher,
            sink,
        }
    }

    fn harness(hostnames: &str, dispatcher: ScriptedDispatcher) -> Harness {
        harness_with(Arc::new(provisioned(hostnames)), dispatcher)
    }

    fn inbound(email: &str) -> InboundRequest {
        let mut headers = HeaderMap::new();
        let token = assertion_for(&format!(r#"{{"email":"{email}"}}"#));
        headers.insert(DEFAULT_ASSERTION_HEADER, token.parse().unwrap());
        InboundRequest {
            method: Method::GET,
            uri: "/api/v1/pods".parse().unwrap(),
            headers,
            body: Bytes::new(),
            correlation_id: "cid".into(),
        }
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn retry_predicate_is_set_membership() {
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(is_retryable(StatusCode::SERVICE_UNAVAILABLE));
        for status in [200, 404, 500, 504] {
            assert!(!is_retryable(StatusCode::from_u16(status).unwrap()));
        }
    }

    #[tokio::test]
    async fn falls_back_past_bad_gateway_and_stops_at_first_success() {
        let h = harness(
            "h1,h2,h3",
            ScriptedDispatcher::default()
                .with("h1", 502)
                .with("h2", 200)
                .with("h3", 200),
        );

        let response = h.engine.handle(&Config::default(), inbound("alice@example.com")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "hello from h2");
        assert_eq!(h.dispatcher.hosts().await, ["h1", "h2"]);
        assert_eq!(h.engine.stats().fallbacks.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn non_retryable_errors_are_returned_immediately() {
        let h = harness(
            "h1,h2",
            ScriptedDispatcher::default().with("h1", 500).with("h2", 200),
        );

        let response = h.engine.handle(&Config::default(), inbound("alice@example.com")).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(h.dispatcher.hosts().await, ["h1"]);
    }

    #[tokio::test]
    async fn all_unavailable_exhausts_fallback() {
        let h = harness(
            "h1,h2,h3",
            ScriptedDispatcher::default()
                .with("h1", 503)
                .with("h2", 503)
                .with("h3", 503),
        );

        let response = h.engine.handle(&Config::default(), inbound("alice@example.com")).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "Exhausted all fallback options");
        assert_eq!(h.dispatcher.hosts().await.len(), 3);
        assert_eq!(h.sink.submissions.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn transport_errors_are_reported_and_skipped() {
        let h = harness("down,h2", ScriptedDispatcher::default().with("h2", 204));

        let response = h.engine.handle(&Config::default(), inbound("alice@example.com")).await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let submissions = h.sink.submissions.lock().await;
        assert_eq!(submissions.len(), 1);
        assert!(submissions[0].event.message.contains("connection refused"));
    }

    #[tokio::test]
    async fn unknown_identity_never_dispatches() {
        let h = harness("h1", ScriptedDispatcher::default().with("h1", 200));

        let response = h.engine.handle(&Config::default(), inbound("eve@example.com")).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(h.dispatcher.hosts().await.is_empty());
        let submissions = h.sink.submissions.lock().await;
        assert_eq!(submissions[0].event.message, "No token for eve@example.com");
    }

    #[tokio::test]
    async fn missing_assertion_is_unauthorized() {
        let h = harness("h1", ScriptedDispatcher::default().with("h1", 200));
        let mut request = inbound("alice@example.com");
        request.headers.clear();

        let response = h.engine.handle(&Config::default(), request).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(h.dispatcher.hosts().await.is_empty());
    }

    #[tokio::test]
    async fn outbound_request_carries_bearer_token() {
        let h = harness("h1", ScriptedDispatcher::default().with("h1", 200));

        let response = h.engine.handle(&Config::default(), inbound("alice@example.com")).await;
        assert_eq!(response.status(), StatusCode::OK);

        let seen = h.dispatcher.seen.lock().await;
        assert_eq!(seen[0].headers.get(header::AUTHORIZATION).unwrap(), "Bearer abc");
        assert_eq!(seen[0].url.as_str(), "https://h1/api/v1/pods");
    }

    #[tokio::test]
    async fn single_mode_returns_unavailable_status_as_is() {
        let h = harness("", ScriptedDispatcher::default().with("dash.local", 502));
        let config = Config {
            upstream: UpstreamConfig {
                mode: UpstreamMode::Single,
                ..UpstreamConfig::default()
            },
            ..Config::default()
        };
        let mut request = inbound("alice@example.com");
        request.headers.insert(header::HOST, "dash.local".parse().unwrap());

        let response = h.engine.handle(&config, request).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(h.dispatcher.hosts().await, ["dash.local"]);
    }

    #[tokio::test]
    async fn single_mode_transport_failure_is_service_unavailable() {
        let h = harness("", ScriptedDispatcher::default());
        let config = Config {
            upstream: UpstreamConfig {
                mode: UpstreamMode::Single,
                ..UpstreamConfig::default()
            },
            ..Config::default()
        };
        let mut request = inbound("alice@example.com");
        request.headers.insert(header::HOST, "dash.local".parse().unwrap());

        let response = h.engine.handle(&config, request).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(body_text(response).await.contains("connection refused"));
        // Reported once by the loop, not again on the way out.
        assert_eq!(h.sink.submissions.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_record_is_bad_gateway_and_never_dispatches() {
        let store = provisioned("h1").with("alice@example.com", "not json");
        let h = harness_with(Arc::new(store), ScriptedDispatcher::default().with("h1", 200));

        let response = h.engine.handle(&Config::default(), inbound("alice@example.com")).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_text(response).await, "Bad Gateway");
        assert!(h.dispatcher.hosts().await.is_empty());
        let submissions = h.sink.submissions.lock().await;
        assert_eq!(submissions.len(), 1);
        assert!(submissions[0].event.message.contains("corrupt identity record"));
    }

    #[tokio::test]
    async fn store_failure_is_bad_gateway_and_never_dispatches() {
        let store = FailingStore {
            inner: provisioned("h1"),
            failing_key: "alice@example.com",
        };
        let h = harness_with(Arc::new(store), ScriptedDispatcher::default().with("h1", 200));

        let response = h.engine.handle(&Config::default(), inbound("alice@example.com")).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(h.dispatcher.hosts().await.is_empty());
        let submissions = h.sink.submissions.lock().await;
        assert_eq!(submissions.len(), 1);
        assert!(submissions[0].event.message.contains("connection reset by peer"));
    }

    #[tokio::test]
    async fn host_list_store_failure_is_bad_gateway() {
        let store = FailingStore {
            inner: provisioned("h1"),
            failing_key: "tunnelHostnames",
        };
        let h = harness_with(Arc::new(store), ScriptedDispatcher::default().with("h1", 200));

        let response = h.engine.handle(&Config::default(), inbound("alice@example.com")).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(h.dispatcher.hosts().await.is_empty());
    }

    #[tokio::test]
    async fn empty_host_list_is_bad_gateway() {
        let h = harness("", ScriptedDispatcher::default());

        let response = h.engine.handle(&Config::default(), inbound("alice@example.com")).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(h.dispatcher.hosts().await.is_empty());
        let submissions = h.sink.submissions.lock().await;
        assert_eq!(submissions.len(), 1);
        assert!(submissions[0].event.message.contains("tunnelHostnames"));
    }

    #[tokio::test]
    async fn all_transport_failures_exhaust_fallback() {
        let h = harness("down1,down2", ScriptedDispatcher::default());

        let response = h.engine.handle(&Config::default(), inbound("alice@example.com")).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "Exhausted all fallback options");
        assert_eq!(h.dispatcher.hosts().await, ["down1", "down2"]);
        // One report per transport failure, plus the exhaustion itself.
        let submissions = h.sink.submissions.lock().await;
        assert_eq!(submissions.len(), 3);
        assert_eq!(submissions[2].event.message, "Exhausted all fallback options");
    }
}
