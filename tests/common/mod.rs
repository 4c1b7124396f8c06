//! Shared fixtures: stub upstreams, a stub collector, and a running proxy.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use auth_proxy::config::model::Config;
use auth_proxy::config::ConfigVersion;
use auth_proxy::server::{self, AppState, LoadedConfig};
use auth_proxy::store::MemoryStore;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::routing::post;
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tokio::sync::{oneshot, Mutex};

pub const ASSERTION_HEADER: &str = "cf-access-jwt-assertion";

pub fn assertion_for(email: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","kid":"edge"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"email":"{email}","iss":"edge"}}"#));
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

async fn serve(router: Router) -> (SocketAddr, oneshot::Sender<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .unwrap();
    });

    (addr, shutdown_tx)
}

/// An upstream that always answers with one status and echoes what it saw.
pub struct StubUpstream {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    _shutdown: oneshot::Sender<()>,
}

impl StubUpstream {
    pub async fn start(status: u16) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let router = Router::new().fallback(move |uri: Uri, headers: HeaderMap| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let authorization: Vec<&str> = headers
                    .get_all("authorization")
                    .iter()
                    .filter_map(|v| v.to_str().ok())
                    .collect();
                (
                    StatusCode::from_u16(status).unwrap(),
                    format!("{}|{}", uri.path(), authorization.join(";")),
                )
            }
        });
        let (addr, shutdown) = serve(router).await;
        Self {
            addr,
            hits,
            _shutdown: shutdown,
        }
    }

    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct ReceivedEvent {
    pub project: String,
    pub auth: String,
    pub body: serde_json::Value,
}

/// Records every event posted to `/api/{project}/store/`.
pub struct StubCollector {
    pub addr: SocketAddr,
    pub events: Arc<Mutex<Vec<ReceivedEvent>>>,
    _shutdown: oneshot::Sender<()>,
}

async fn store_event(
    State(events): State<Arc<Mutex<Vec<ReceivedEvent>>>>,
    Path(project): Path<String>,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    let auth = headers
        .get("x-sentry-auth")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let body = serde_json::from_str(&body).unwrap_or(serde_json::Value::Null);
    events.lock().await.push(ReceivedEvent {
        project,
        auth,
        body,
    });
    StatusCode::OK
}

impl StubCollector {
    pub async fn start() -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let router = Router::new()
            .route("/api/{project}/store/", post(store_event))
            .with_state(Arc::clone(&events));
        let (addr, shutdown) = serve(router).await;
        Self {
            addr,
            events,
            _shutdown: shutdown,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn events(&self) -> Vec<ReceivedEvent> {
        self.events.lock().await.clone()
    }
}

pub fn store_with_hosts(hosts: &[String]) -> MemoryStore {
    MemoryStore::new()
        .with("alice@example.com", r#"{"ns":"team-a","token":"abc"}"#)
        .with("tunnelHostnames", hosts.join(","))
        .with("sentryProjectID", "4242")
        .with("sentryKey", "public-key")
}

/// Config pointing fallback candidates at plain-HTTP stubs.
pub fn test_config(collector: &StubCollector) -> Config {
    let mut config = Config::default();
    config.upstream.scheme = "http".into();
    config.reporter.collector_url = collector.url();
    config
}

pub struct RunningProxy {
    pub addr: SocketAddr,
    pub state: Arc<AppState>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl RunningProxy {
    pub async fn start(config: Config, store: MemoryStore) -> Self {
        let state = Arc::new(AppState::new(
            LoadedConfig::new(config, ConfigVersion::Hash("test-hash".into()), "test"),
            Arc::new(store),
        ));
        let router = server::build_router(Arc::clone(&state), 1_048_576);
        let (addr, shutdown) = serve(router).await;
        Self {
            addr,
            state,
            shutdown: Some(shutdown),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub async fn get_as(&self, email: &str, path: &str) -> reqwest::Response {
        reqwest::Client::new()
            .get(self.url(path))
            .header(ASSERTION_HEADER, assertion_for(email))
            .send()
            .await
            .unwrap()
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
