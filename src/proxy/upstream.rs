//! Upstream candidate planning.
//!
//! Both modes produce an [`UpstreamPlan`]: an ordered list of absolute URLs
//! plus the mode, which decides how the engine treats retryable statuses
//! and exhaustion. Single mode always yields exactly one candidate.

use axum::http::header::HOST;
use axum::http::{HeaderMap, Uri};
use url::Url;

use crate::config::model::{UpstreamConfig, UpstreamMode};
use crate::error::ProxyError;
use crate::store::KeyValueStore;

#[derive(Debug, Clone)]
pub struct UpstreamPlan {
    pub mode: UpstreamMode,
    pub candidates: Vec<Url>,
}

/// Split a comma-separated host list, keeping order and dropping blanks.
#[must_use]
pub fn parse_hostnames(raw: &str) -> Vec<&str> {
    raw.split(',')
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .collect()
}

fn path_and_query(uri: &Uri) -> &str {
    uri.path_and_query().map_or("/", |pq| pq.as_str())
}

/// Point `path_and_query` at `host` using `scheme`.
pub fn candidate_url(scheme: &str, host: &str, path_and_query: &str) -> Result<Url, url::ParseError> {
    Url::parse(&format!("{scheme}://{host}{path_and_query}"))
}

/// Replace the root path with the rewrite template, if one is configured.
///
/// The template is appended to any path prefix already on `url` and goes
/// through the URL path setter, so `?` and `#` in it are percent-encoded
/// rather than starting a query or fragment.
pub fn rewrite_root(url: &mut Url, template: Option<&str>, namespace: &str) {
    if let Some(template) = template {
        let prefix = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{prefix}{}", template.replace("{namespace}", namespace)));
    }
}

/// Graft the inbound path and query onto a fixed origin.
///
/// The origin's host is never replaced, whatever the inbound path looks
/// like; a path prefix on the origin is kept.
pub fn origin_url(origin: &str, uri: &Uri) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(origin)?;
    let prefix = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{prefix}{}", uri.path()));
    url.set_query(uri.query());
    Ok(url)
}

fn single_target(
    config: &UpstreamConfig,
    uri: &Uri,
    headers: &HeaderMap,
    namespace: &str,
) -> Result<Url, ProxyError> {
    let mut url = if let Some(ref origin) = config.origin {
        origin_url(origin, uri).map_err(|e| ProxyError::Transport {
            upstream: origin.clone(),
            source: Box::new(e),
        })?
    } else {
        let host = headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| uri.authority().map(|a| a.as_str()))
            .ok_or(ProxyError::MissingHost)?;
        candidate_url(&config.scheme, host, path_and_query(uri)).map_err(|e| {
            ProxyError::Transport {
                upstream: host.to_string(),
                source: Box::new(e),
            }
        })?
    };

    if uri.path() == "/" {
        rewrite_root(&mut url, config.root_rewrite.as_deref(), namespace);
    }
    Ok(url)
}

async fn fallback_targets(
    config: &UpstreamConfig,
    store: &dyn KeyValueStore,
    uri: &Uri,
) -> Result<Vec<Url>, ProxyError> {
    let raw = store.get(&config.hostnames_key).await?.unwrap_or_default();
    let pq = path_and_query(uri);

    let candidates: Vec<Url> = parse_hostnames(&raw)
        .into_iter()
        .filter_map(|host| match candidate_url(&config.scheme, host, pq) {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!(upstream = %host, error = %e, "skipping unparseable fallback host");
                None
            }
        })
        .collect();

    if candidates.is_empty() {
        return Err(ProxyError::NoUpstreams {
            key: config.hostnames_key.clone(),
        });
    }
    Ok(candidates)
}

/// Build the candidate list for one request.
pub async fn plan(
    config: &UpstreamConfig,
    store: &dyn KeyValueStore,
    uri: &Uri,
    headers: &HeaderMap,
    namespace: &str,
) -> Result<UpstreamPlan, ProxyError> {
    let candidates = match config.mode {
        UpstreamMode::Single => vec![single_target(config, uri, headers, namespace)?],
        UpstreamMode::Fallback => fallback_targets(config, store, uri).await?,
    };
    Ok(UpstreamPlan {
        mode: config.mode,
        candidates,
    })
}
