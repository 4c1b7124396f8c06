//! `auth-proxy run`: start the proxy server.
//!
//! Opens the key-value store, loads configuration from a file (or falls back
//! to built-in defaults), starts the Axum HTTP server with graceful shutdown,
//! and spawns a background refresh loop that hot-reloads the config file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cli::RunArgs;
use crate::config::model::Config;
use crate::config::sources::file_source::{FileSource, EXTENSIONS};
use crate::config::{ConfigSource, ConfigVersion};
use crate::error::AuthProxyError;
use crate::logging;
use crate::server::{self, AppState, LoadedConfig};
use crate::store::{KeyValueStore, MemoryStore};

pub async fn execute(args: RunArgs) -> Result<(), AuthProxyError> {
    let log_format = logging::resolve_format(args.pretty, args.json);
    logging::init(&args.log_level, log_format);

    let store = open_store(&args).await?;
    let source = resolve_config_source(args.config.as_deref()).await?;

    let loaded = match source {
        Some(ref source) => {
            let (config, version) = source.load().await?;
            LoadedConfig::new(config, version, source.name())
        }
        None => {
            tracing::info!("no config file found, using built-in defaults");
            LoadedConfig::new(Config::default(), ConfigVersion::Builtin, "defaults")
        }
    };
    let mode = loaded.config.upstream.mode;
    let version = loaded.version.short().to_string();

    let state = Arc::new(AppState::new(loaded, store));

    // Shutdown signal: flipping the watch channel stops the refresh loop
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let refresh_handle = source.map(|source| {
        let refresh_state = Arc::clone(&state);
        let poll_interval = args.poll_interval;
        tokio::spawn(async move {
            config_refresh_loop(refresh_state, source, poll_interval, shutdown_rx).await;
        })
    });

    let store_name = state.store_name;
    let router = server::build_router(state, args.max_body);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(
        addr = %addr,
        mode = %mode,
        store = store_name,
        config_version = %version,
        "auth-proxy started"
    );

    let graceful_shutdown = async move {
        server::shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    };

    axum::serve(listener, router)
        .with_graceful_shutdown(graceful_shutdown)
        .await?;

    if let Some(handle) = refresh_handle {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "config refresh task failed");
        }
    }

    tracing::info!("auth-proxy stopped");
    Ok(())
}

async fn open_store(args: &RunArgs) -> Result<Arc<dyn KeyValueStore>, AuthProxyError> {
    #[cfg(feature = "redis")]
    if let Some(ref url) = args.redis_url {
        let store = crate::store::redis_store::RedisStore::connect(url, &args.redis_prefix).await?;
        return Ok(Arc::new(store));
    }

    if let Some(ref path) = args.store_file {
        let store = MemoryStore::from_file(path).await?;
        tracing::info!(path = %path.display(), entries = store.len(), "loaded key-value store");
        return Ok(Arc::new(store));
    }

    Err(AuthProxyError::NoStore {
        hint: "Provide --store-file <json> or --redis-url <url> (redis feature).".into(),
    })
}

async fn resolve_config_source(
    explicit: Option<&Path>,
) -> Result<Option<FileSource>, AuthProxyError> {
    if let Some(path) = explicit {
        return FileSource::for_path(path).map(Some);
    }

    // Auto-detect in current directory
    for (ext, _) in EXTENSIONS {
        let path = PathBuf::from(format!("auth-proxy.{ext}"));
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::info!(path = %path.display(), "auto-detected config file");
            return FileSource::for_path(&path).map(Some);
        }
    }

    Ok(None)
}

async fn config_refresh_loop(
    state: Arc<AppState>,
    source: FileSource,
    interval_secs: u64,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    interval.tick().await; // Skip first immediate tick

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => {
                tracing::debug!("config refresh loop shutting down");
                return;
            }
        }

        let current_version = state.config.read().await.version.clone();

        match source.has_changed(&current_version).await {
            Ok(true) => {
                tracing::info!(path = %source.path().display(), "config change detected, reloading");
                match source.load().await {
                    Ok((config, version)) => {
                        let mode = config.upstream.mode;
                        let mut loaded = state.config.write().await;
                        *loaded = LoadedConfig::new(config, version, source.name());
                        drop(loaded);
                        tracing::info!(mode = %mode, "config reloaded");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "config reload failed, keeping current config");
                    }
                }
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(error = %e, "config change check failed");
            }
        }
    }
}
