//! Concrete [`ConfigSource`](super::ConfigSource) implementations.
//!
//! Provides file-based sources (YAML, JSON, TOML) gated by feature flags and
//! the [`parse_config_str`] helper for format-specific deserialization.

pub mod file_source;

pub use file_source::FileSource;

use sha2::{Digest, Sha256};

use crate::config::model::Config;
use crate::error::AuthProxyError;

/// Parse a config string based on file extension.
pub fn parse_config_str(
    ext: &str,
    content: &str,
    path_display: &str,
) -> Result<Config, AuthProxyError> {
    let parsed: Result<Config, Box<dyn std::error::Error + Send + Sync>> = match ext {
        #[cfg(feature = "yaml")]
        "yaml" | "yml" => serde_yml::from_str(content).map_err(Into::into),

        #[cfg(feature = "json")]
        "json" => serde_json::from_str(content).map_err(Into::into),

        #[cfg(feature = "toml")]
        "toml" => toml::from_str(content).map_err(Into::into),

        other => return Err(AuthProxyError::UnsupportedFormat(other.to_string())),
    };

    parsed.map_err(|source| AuthProxyError::ConfigParse {
        path: path_display.to_string(),
        source,
    })
}

/// Compute a lowercase hex-encoded SHA-256 digest.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_is_stable_hex() {
        let hash = sha256_hex(b"upstream: {}");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, sha256_hex(b"upstream: {}"));
        assert_ne!(hash, sha256_hex(b"upstream: {mode: single}"));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = parse_config_str("ini", "", "auth-proxy.ini").unwrap_err();
        assert!(matches!(err, AuthProxyError::UnsupportedFormat(ref ext) if ext == "ini"));
    }

    #[cfg(feature = "yaml")]
    #[test]
    fn yaml_parse_error_names_the_file() {
        let err = parse_config_str("yaml", "upstream: [", "auth-proxy.yaml").unwrap_err();
        assert!(err.to_string().contains("auth-proxy.yaml"));
    }
}
