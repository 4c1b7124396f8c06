//! Outbound header construction and hop-by-hop stripping.
//!
//! [`build_proxy_headers`] copies the inbound headers, strips hop-by-hop
//! headers, points `Host` at the candidate, and injects the resolved bearer
//! credential according to the configured [`AuthorizationPolicy`].

use std::sync::LazyLock;

use axum::http::header::{AUTHORIZATION, CONTENT_LENGTH, HOST};
use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::config::model::AuthorizationPolicy;

static HOP_BY_HOP: LazyLock<Vec<HeaderName>> = LazyLock::new(|| {
    [
        "connection",
        "keep-alive",
        "transfer-encoding",
        "te",
        "trailer",
        "upgrade",
        "proxy-authorization",
        "proxy-authenticate",
    ]
    .iter()
    .filter_map(|name| name.parse::<HeaderName>().ok())
    .collect()
});

/// Strip hop-by-hop headers and `content-length` from an upstream response.
///
/// The body was fully collected by the dispatcher, so framing headers from
/// the origin no longer apply. Axum sets `content-length` from the bytes.
pub fn strip_response_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    headers.remove(CONTENT_LENGTH);
}

/// `Bearer <token>` as a sensitive header value.
pub fn bearer(token: &str) -> Result<HeaderValue, axum::http::header::InvalidHeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
    value.set_sensitive(true);
    Ok(value)
}

pub fn build_proxy_headers(
    original: &HeaderMap,
    target_url: &url::Url,
    authorization: &HeaderValue,
    policy: AuthorizationPolicy,
    strip_hop_by_hop: bool,
    correlation_id: &str,
) -> HeaderMap {
    let mut headers = original.clone();

    if strip_hop_by_hop {
        for header_name in HOP_BY_HOP.iter() {
            headers.remove(header_name);
        }
    }

    if let Some(host) = target_url.host_str() {
        let host_value = target_url
            .port()
            .map_or_else(|| host.to_string(), |port| format!("{host}:{port}"));
        if let Ok(val) = HeaderValue::from_str(&host_value) {
            headers.insert(HOST, val);
        }
    }

    match policy {
        AuthorizationPolicy::Replace => {
            headers.insert(AUTHORIZATION, authorization.clone());
        }
        AuthorizationPolicy::Append => {
            headers.append(AUTHORIZATION, authorization.clone());
        }
    }

    if let Ok(val) = HeaderValue::from_str(correlation_id) {
        headers.insert("x-correlation-id", val);
    }

    headers
}
