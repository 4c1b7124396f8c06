//! Generic async file-based config source with SHA-256 change detection.
//!
//! [`FileSource`] implements [`ConfigSource`] for every format known to
//! [`parse_config_str`]; the format is picked from the file extension by
//! [`FileSource::for_path`]. Every load re-reads the file, validates the
//! parsed [`Config`], and versions it by content hash so the refresh loop
//! can skip unchanged files cheaply.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{parse_config_str, sha256_hex};
use crate::config::model::Config;
use crate::config::validation::validate;
use crate::config::{ConfigSource, ConfigVersion};
use crate::error::AuthProxyError;

/// Extensions accepted for config files, in auto-detection order.
pub const EXTENSIONS: &[(&str, &str)] = &[
    #[cfg(feature = "yaml")]
    ("yaml", "yaml"),
    #[cfg(feature = "yaml")]
    ("yml", "yaml"),
    #[cfg(feature = "json")]
    ("json", "json"),
    #[cfg(feature = "toml")]
    ("toml", "toml"),
];

pub struct FileSource {
    path: PathBuf,
    format: &'static str,
}

impl FileSource {
    /// Build a source for `path`, choosing the parser from its extension.
    pub fn for_path(path: &Path) -> Result<Self, AuthProxyError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        EXTENSIONS
            .iter()
            .find(|(candidate, _)| *candidate == ext)
            .map(|&(_, format)| Self {
                path: path.to_path_buf(),
                format,
            })
            .ok_or_else(|| AuthProxyError::UnsupportedFormat(ext.to_string()))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_content(&self) -> Result<String, AuthProxyError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AuthProxyError::ConfigFileNotFound {
                    path: self.path.clone(),
                })
            }
            Err(e) => Err(AuthProxyError::Io(e)),
        }
    }
}

#[async_trait]
impl ConfigSource for FileSource {
    fn name(&self) -> &'static str {
        self.format
    }

    async fn load(&self) -> Result<(Config, ConfigVersion), AuthProxyError> {
        let content = self.read_content().await?;

        let config = parse_config_str(self.format, &content, &self.path.display().to_string())?;

        validate(&config).map_err(|errors| AuthProxyError::ConfigValidation { errors })?;

        Ok((config, ConfigVersion::Hash(sha256_hex(content.as_bytes()))))
    }

    async fn has_changed(&self, current: &ConfigVersion) -> Result<bool, AuthProxyError> {
        let content = self.read_content().await?;
        Ok(*current != ConfigVersion::Hash(sha256_hex(content.as_bytes())))
    }
}
