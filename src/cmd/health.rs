//! `auth-proxy health`: check the health of a running instance.
//!
//! Sends a `GET /health` request to the specified URL and displays
//! the response as formatted text or raw JSON.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::StatusCode;

use crate::cli::HealthArgs;
use crate::error::AuthProxyError;
use crate::health::HealthResponse;
use crate::server::build_http_client;

const CHECK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

fn request_failed(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> AuthProxyError {
    AuthProxyError::HttpRequest {
        source: source.into(),
    }
}

async fn fetch(url: &str) -> Result<(StatusCode, Bytes), AuthProxyError> {
    let uri: hyper::Uri = url.parse().map_err(|e: http::uri::InvalidUri| {
        AuthProxyError::UriParse {
            source: Box::new(e),
        }
    })?;

    let req = hyper::Request::get(uri)
        .body(Full::new(Bytes::new()))
        .map_err(request_failed)?;

    let response = tokio::time::timeout(CHECK_TIMEOUT, build_http_client().request(req))
        .await
        .map_err(|_| request_failed("health check timed out after 10s"))?
        .map_err(request_failed)?;

    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(request_failed)?
        .to_bytes();
    Ok((status, body))
}

pub async fn execute(args: HealthArgs) -> Result<(), AuthProxyError> {
    let url = format!("{}/health", args.url.trim_end_matches('/'));
    let (status, body) = fetch(&url).await?;

    if !status.is_success() {
        return Err(AuthProxyError::HealthCheckFailed(status));
    }

    if args.json {
        println!("{}", String::from_utf8_lossy(&body));
        return Ok(());
    }

    let body_str = String::from_utf8_lossy(&body);
    match serde_json::from_str::<HealthResponse>(&body_str) {
        Ok(health) => {
            let uptime = format_uptime(health.uptime_seconds);
            println!("\u{2713} auth-proxy is healthy ({})", args.url);
            println!("  uptime:         {uptime}");
            println!("  store:          {}", health.store);
            println!(
                "  config:         {} {} (loaded {}s ago)",
                health.config.source, health.config.version, health.config.loaded_ago_seconds
            );
            println!("  upstream mode:  {}", health.config.mode);
            println!(
                "  requests:       {} forwarded, {} failed, {} fallbacks",
                health.stats.requests_forwarded,
                health.stats.requests_failed,
                health.stats.fallbacks
            );
            println!("  errors reported: {}", health.stats.errors_reported);
        }
        Err(e) => {
            eprintln!("Failed to parse health response: {e}");
            println!("{}", String::from_utf8_lossy(&body));
        }
    }

    Ok(())
}

fn format_uptime(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {secs}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}
