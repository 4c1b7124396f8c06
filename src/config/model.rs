//! Serde data structures for the auth-proxy configuration file.
//!
//! Contains [`Config`] (the root), [`IdentityConfig`], [`UpstreamConfig`]
//! and [`ReporterConfig`]. Every field has a default, so an empty file is
//! a valid config. Structs use `deny_unknown_fields` for strict parsing.

use serde::{Deserialize, Serialize};

pub const DEFAULT_ASSERTION_HEADER: &str = "cf-access-jwt-assertion";
pub const DEFAULT_HOSTNAMES_KEY: &str = "tunnelHostnames";
pub const DEFAULT_ROOT_REWRITE: &str = "/#/overview?namespace={namespace}";
pub const DEFAULT_COLLECTOR_URL: &str = "https://sentry.io";
pub const DEFAULT_CLIENT_NAME: &str = "auth-proxy-logger";

fn default_header() -> String {
    DEFAULT_ASSERTION_HEADER.to_string()
}

fn default_hostnames_key() -> String {
    DEFAULT_HOSTNAMES_KEY.to_string()
}

fn default_scheme() -> String {
    "https".to_string()
}

#[allow(clippy::unnecessary_wraps)]
fn default_root_rewrite() -> Option<String> {
    Some(DEFAULT_ROOT_REWRITE.to_string())
}

fn default_collector_url() -> String {
    DEFAULT_COLLECTOR_URL.to_string()
}

fn default_client_name() -> String {
    DEFAULT_CLIENT_NAME.to_string()
}

fn default_project_id_key() -> String {
    "sentryProjectID".to_string()
}

fn default_api_key_key() -> String {
    "sentryKey".to_string()
}

const fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub reporter: ReporterConfig,
}

/// Where the identity assertion lives and how identities are keyed in the store.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityConfig {
    #[serde(default = "default_header")]
    pub header: String,

    /// Prepended to the email to form the store key.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key_prefix: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            header: default_header(),
            key_prefix: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamMode {
    /// Forward to the inbound request's own host (or a fixed origin).
    Single,
    /// Try each host listed in the store, in order.
    #[default]
    Fallback,
}

impl std::fmt::Display for UpstreamMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single => f.write_str("single"),
            Self::Fallback => f.write_str("fallback"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationPolicy {
    /// Drop any inbound `Authorization` header before injecting ours.
    #[default]
    Replace,
    /// Keep the inbound header and add ours next to it.
    Append,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    #[serde(default)]
    pub mode: UpstreamMode,

    /// Store key holding the comma-separated fallback host list.
    #[serde(default = "default_hostnames_key")]
    pub hostnames_key: String,

    /// Scheme used for every candidate (fallback mode) or for the inbound
    /// host when no `origin` is set (single mode).
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Fixed origin for single mode, e.g. `https://dashboard.internal`.
    ///
    /// Without it, single mode forwards to whatever the inbound `Host`
    /// header names. Only leave it unset behind an edge that pins `Host`;
    /// otherwise callers choose where their bearer token is sent.
    /// The inbound path is grafted onto the origin (after any path prefix);
    /// it can never change the origin's host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,

    /// Replacement for the `/` path in single mode; `{namespace}` is substituted.
    #[serde(default = "default_root_rewrite")]
    pub root_rewrite: Option<String>,

    /// Per-candidate timeout in milliseconds. Unset means the transport decides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    #[serde(default)]
    pub authorization: AuthorizationPolicy,

    #[serde(default = "default_true")]
    pub strip_hop_by_hop: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            mode: UpstreamMode::default(),
            hostnames_key: default_hostnames_key(),
            scheme: default_scheme(),
            origin: None,
            root_rewrite: default_root_rewrite(),
            timeout: None,
            authorization: AuthorizationPolicy::default(),
            strip_hop_by_hop: default_true(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ReporterConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_collector_url")]
    pub collector_url: String,

    /// Used both as the event `logger` and in `sentry_client=<name>/0`.
    #[serde(default = "default_client_name")]
    pub client_name: String,

    #[serde(default = "default_project_id_key")]
    pub project_id_key: String,

    #[serde(default = "default_api_key_key")]
    pub api_key_key: String,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            collector_url: default_collector_url(),
            client_name: default_client_name(),
            project_id_key: default_project_id_key(),
            api_key_key: default_api_key_key(),
        }
    }
}
