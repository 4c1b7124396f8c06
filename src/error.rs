//! Unified error types for auth-proxy.
//!
//! [`AuthProxyError`] covers process-level failures (config, I/O, store
//! setup, the `health` subcommand). [`ProxyError`] is the per-request
//! pipeline taxonomy; each variant maps to exactly one HTTP status via
//! [`ProxyError::status`]. [`ValidationError`] carries config validation
//! findings with an optional hint.

use std::path::PathBuf;

use axum::http::StatusCode;

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "  {}: {}", self.field, self.message)?;
        if let Some(ref suggestion) = self.suggestion {
            write!(f, " ({suggestion})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

fn format_errors(errors: &[ValidationError]) -> String {
    use std::fmt::Write;
    let mut buf = String::new();
    for (i, e) in errors.iter().enumerate() {
        if i > 0 {
            buf.push('\n');
        }
        // write! to String is infallible (only fails on OOM which is unrecoverable)
        let _ = write!(buf, "{e}");
    }
    buf
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AuthProxyError {
    #[error("No key-value store configured.\n\n  {hint}")]
    NoStore { hint: String },

    #[error("Config file not found: {}", path.display())]
    ConfigFileNotFound { path: PathBuf },

    #[error("Config parse error in {path}:\n  {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Config validation failed:\n{}", format_errors(.errors))]
    ConfigValidation { errors: Vec<ValidationError> },

    #[error("Unsupported config format: '{0}'")]
    UnsupportedFormat(String),

    #[error("Invalid address: {0}")]
    AddressParse(#[from] std::net::AddrParseError),

    #[error("Invalid URI: {source}")]
    UriParse {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("HTTP request failed: {source}")]
    HttpRequest {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Store setup failed ({backend}): {source}")]
    StoreInit {
        backend: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("Health check failed with status {0}")]
    HealthCheckFailed(hyper::StatusCode),
}

/// Failures of the authenticate-and-forward pipeline for a single request.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("malformed identity assertion: {reason}")]
    MalformedAssertion { reason: String },

    #[error("No token for {email}")]
    UnknownIdentity { email: String },

    #[error("corrupt identity record for {email}: {source}")]
    CorruptRecord {
        email: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("key-value store error ({backend}): {source}")]
    Store {
        backend: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("no upstream hostnames found under key '{key}'")]
    NoUpstreams { key: String },

    #[error("request has no Host header to forward to")]
    MissingHost,

    #[error("upstream {upstream} unreachable: {source}")]
    Transport {
        upstream: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Exhausted all fallback options")]
    ExhaustedFallback,
}

impl ProxyError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedAssertion {
            reason: reason.into(),
        }
    }

    /// Status returned to the caller when this error ends a request.
    ///
    /// Missing or unknown credentials are a 401; anything that went wrong
    /// between us and the backing services is a 5xx.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::MalformedAssertion { .. } | Self::UnknownIdentity { .. } => {
                StatusCode::UNAUTHORIZED
            }
            Self::CorruptRecord { .. } | Self::Store { .. } | Self::NoUpstreams { .. } => {
                StatusCode::BAD_GATEWAY
            }
            Self::MissingHost => StatusCode::BAD_REQUEST,
            Self::Transport { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::ExhaustedFallback => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this failure happened before any upstream was contacted.
    #[must_use]
    pub const fn is_identity_failure(&self) -> bool {
        matches!(
            self,
            Self::MalformedAssertion { .. }
                | Self::UnknownIdentity { .. }
                | Self::CorruptRecord { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_failures_are_unauthorized() {
        assert_eq!(
            ProxyError::malformed("no header").status(),
            StatusCode::UNAUTHORIZED
        );
        let unknown = ProxyError::UnknownIdentity {
            email: "a@example.com".into(),
        };
        assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(unknown.to_string(), "No token for a@example.com");
    }

    #[test]
    fn exhausted_fallback_message_is_fixed() {
        let err = ProxyError::ExhaustedFallback;
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Exhausted all fallback options");
    }

    #[test]
    fn validation_error_display_includes_suggestion() {
        let err = ValidationError {
            field: "upstream.scheme".into(),
            message: "unsupported scheme 'ftp'".into(),
            suggestion: Some("use 'https'".into()),
        };
        assert_eq!(
            err.to_string(),
            "  upstream.scheme: unsupported scheme 'ftp' (use 'https')"
        );
    }
}
