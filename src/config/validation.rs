//! Configuration validation with detailed error reporting.
//!
//! The [`validate`] function checks a parsed [`Config`] for values serde
//! cannot reject on its own: header names, URL schemes, the single-mode
//! origin, the root rewrite template, and the collector URL. Returns a
//! list of [`ValidationError`] values with per-field suggestions.

use axum::http::HeaderName;
use url::Url;

use super::model::{Config, UpstreamMode};
use crate::error::ValidationError;

pub const VALID_SCHEMES: &[&str] = &["http", "https"];

/// Validate an upstream scheme. Returns `Ok(())` or a human-readable error.
pub fn validate_scheme(scheme: &str) -> Result<(), String> {
    if VALID_SCHEMES.contains(&scheme) {
        Ok(())
    } else {
        Err(format!(
            "unsupported scheme '{scheme}' (expected http or https)"
        ))
    }
}

/// Validate an absolute http(s) URL. Returns `Ok(())` or a human-readable error.
pub fn validate_http_url(url: &str) -> Result<(), String> {
    match Url::parse(url) {
        Ok(parsed) => {
            validate_scheme(parsed.scheme())?;
            if parsed.host_str().is_none() {
                return Err(format!("'{url}' has no host"));
            }
            Ok(())
        }
        Err(_) => Err(format!("'{url}' is not a valid URL")),
    }
}

pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.identity.header.parse::<HeaderName>().is_err() {
        errors.push(ValidationError {
            field: "identity.header".into(),
            message: format!("'{}' is not a valid header name", config.identity.header),
            suggestion: Some("header names are lowercase tokens without spaces".into()),
        });
    }

    let upstream = &config.upstream;

    if let Err(msg) = validate_scheme(&upstream.scheme) {
        errors.push(ValidationError {
            field: "upstream.scheme".into(),
            message: msg,
            suggestion: Some("use 'https'".into()),
        });
    }

    if upstream.mode == UpstreamMode::Fallback && upstream.hostnames_key.trim().is_empty() {
        errors.push(ValidationError {
            field: "upstream.hostnames_key".into(),
            message: "fallback mode needs a store key for the host list".into(),
            suggestion: Some("the default key is 'tunnelHostnames'".into()),
        });
    }

    if let Some(ref origin) = upstream.origin {
        if upstream.mode == UpstreamMode::Fallback {
            errors.push(ValidationError {
                field: "upstream.origin".into(),
                message: "origin is only used in single mode".into(),
                suggestion: Some("set 'mode: single' or remove 'origin'".into()),
            });
        }
        if let Err(msg) = validate_http_url(origin) {
            errors.push(ValidationError {
                field: "upstream.origin".into(),
                message: msg,
                suggestion: None,
            });
        }
    }

    if let Some(ref template) = upstream.root_rewrite {
        if !template.starts_with('/') {
            errors.push(ValidationError {
                field: "upstream.root_rewrite".into(),
                message: "rewrite target must start with '/'".into(),
                suggestion: Some(format!("did you mean '/{template}'?")),
            });
        }
    }

    if upstream.timeout == Some(0) {
        errors.push(ValidationError {
            field: "upstream.timeout".into(),
            message: "timeout must be greater than zero".into(),
            suggestion: Some("omit the field to rely on the transport timeout".into()),
        });
    }

    let reporter = &config.reporter;
    if reporter.enabled {
        if let Err(msg) = validate_http_url(&reporter.collector_url) {
            errors.push(ValidationError {
                field: "reporter.collector_url".into(),
                message: msg,
                suggestion: Some("e.g. 'https://sentry.io'".into()),
            });
        }
        if reporter.client_name.is_empty() {
            errors.push(ValidationError {
                field: "reporter.client_name".into(),
                message: "client name cannot be empty".into(),
                suggestion: None,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[must_use]
pub fn format_validation_report(path: &str, config: &Config) -> String {
    let upstream = &config.upstream;
    let mut lines = vec![format!("  mode: {}", upstream.mode)];

    match upstream.mode {
        UpstreamMode::Fallback => {
            lines.push(format!(
                "  candidates: store key '{}' ({}://)",
                upstream.hostnames_key, upstream.scheme
            ));
        }
        UpstreamMode::Single => {
            let origin = upstream
                .origin
                .as_deref()
                .map_or_else(|| format!("inbound host ({}://)", upstream.scheme), String::from);
            lines.push(format!("  origin: {origin}"));
            lines.push(format!(
                "  root rewrite: {}",
                upstream.root_rewrite.as_deref().unwrap_or("disabled")
            ));
        }
    }

    let timeout = upstream
        .timeout
        .map_or_else(|| "transport default".to_string(), |t| format!("{t}ms"));
    lines.push(format!("  timeout: {timeout}"));
    lines.push(format!("  assertion header: {}", config.identity.header));

    let reporter = if config.reporter.enabled {
        config.reporter.collector_url.clone()
    } else {
        "disabled".to_string()
    };
    lines.push(format!("  error reporting: {reporter}"));

    format!("{} is valid\n{}", path, lines.join("\n"))
}
