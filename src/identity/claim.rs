//! Identity assertion parsing.
//!
//! The assertion is a compact JWS (`header.payload.signature`) attached by
//! an authenticating edge in front of this proxy. **The signature is not
//! verified here**: deployments must guarantee the edge has already done so
//! and that requests cannot reach the proxy without passing through it.
//! What this module does enforce is the shape of a signed token: three
//! segments, a non-empty signature, and a header whose `alg` is not
//! `none`. Anything else is rejected as
//! [`ProxyError::MalformedAssertion`].

use axum::http::HeaderMap;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::Deserialize;

use crate::error::ProxyError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityClaim {
    pub email: String,
}

#[derive(Deserialize)]
struct JoseHeader {
    #[serde(default)]
    alg: Option<String>,
}

#[derive(Deserialize)]
struct Payload {
    email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClaimExtractor {
    header: String,
}

impl ClaimExtractor {
    #[must_use]
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }

    /// Return the `email` claim carried by the assertion header.
    pub fn extract_email(&self, headers: &HeaderMap) -> Result<String, ProxyError> {
        self.extract(headers).map(|claim| claim.email)
    }

    pub fn extract(&self, headers: &HeaderMap) -> Result<IdentityClaim, ProxyError> {
        let token = headers
            .get(self.header.as_str())
            .ok_or_else(|| ProxyError::malformed(format!("missing {} header", self.header)))?
            .to_str()
            .map_err(|_| ProxyError::malformed("assertion is not valid ASCII"))?;

        let mut segments = token.trim().split('.');
        let (Some(header), Some(payload), Some(signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(ProxyError::malformed("expected three dot-separated segments"));
        };

        if signature.is_empty() {
            return Err(ProxyError::malformed("unsigned assertion"));
        }

        let jose: JoseHeader = decode_segment(header, "header")?;
        if jose
            .alg
            .as_deref()
            .is_some_and(|alg| alg.eq_ignore_ascii_case("none"))
        {
            return Err(ProxyError::malformed("unsigned assertion (alg=none)"));
        }

        let payload: Payload = decode_segment(payload, "payload")?;
        match payload.email {
            Some(email) if !email.is_empty() => Ok(IdentityClaim { email }),
            _ => Err(ProxyError::malformed("payload has no email claim")),
        }
    }
}

/// Base64url-decode and parse one JWS segment.
///
/// Segments are unpadded per RFC 7515, but some issuers pad them anyway.
fn decode_segment<T: serde::de::DeserializeOwned>(
    segment: &str,
    which: &str,
) -> Result<T, ProxyError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .or_else(|_| URL_SAFE.decode(segment))
        .map_err(|e| ProxyError::malformed(format!("{which} is not base64url: {e}")))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| ProxyError::malformed(format!("{which} is not JSON: {e}")))
}
