//! Shared test harness for Scatter integration tests.
//!
//! Provides:
//!
//! - [`SharedDir`]: two independent engines ("alice" uploads, "bob"
//!   downloads) over one blob directory, so share codes cross a process
//!   boundary in everything but name.
//! - [`LiveGateway`]: the HTTP gateway bound to a real loopback port.
//! - [`BlobHost`]: a minimal image host speaking the upload/GET protocol the
//!   HTTP uploader expects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use bytes::Bytes;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use scatter_engine::{SettingsSnapshot, TransferEngine, TransferSettings};
use scatter_gateway::{GatewayConfig, GatewayServer, History};
use scatter_uploader::{DirUploader, Uploader};
use tempfile::TempDir;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Generate deterministic test data of the given size.
pub fn test_data(size: usize) -> Vec<u8> {
    test_data_seeded(size, 0xDEAD_BEEF)
}

/// Generate deterministic test data with a custom seed.
pub fn test_data_seeded(size: usize, seed: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state = seed;
    for _ in 0..size {
        state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        data.push((state >> 16) as u8);
    }
    data
}

/// Transfer settings with a short retry delay.
pub fn settings(upload: usize, download: usize, retries: u32) -> Arc<TransferSettings> {
    Arc::new(TransferSettings::from_snapshot(SettingsSnapshot {
        upload_task_count: upload,
        download_task_count: download,
        request_retry_count: retries,
        retry_delay_ms: 2,
    }))
}

/// Poll `cond` until it holds, failing the test after five seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// =========================================================================
// Shared blob directory
// =========================================================================

/// Two engines sharing one blob directory through separate uploaders.
pub struct SharedDir {
    pub alice: Arc<TransferEngine>,
    pub bob: Arc<TransferEngine>,
    _dir: TempDir,
}

impl SharedDir {
    pub fn new(chunk_size: u32) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let alice = Self::engine_over(dir.path(), chunk_size);
        let bob = Self::engine_over(dir.path(), chunk_size);
        Self {
            alice,
            bob,
            _dir: dir,
        }
    }

    fn engine_over(dir: &std::path::Path, chunk_size: u32) -> Arc<TransferEngine> {
        let uploader: Arc<dyn Uploader> =
            Arc::new(DirUploader::new(dir, chunk_size).expect("blob dir"));
        Arc::new(TransferEngine::new(uploader, settings(4, 3, 2)))
    }
}

// =========================================================================
// Live gateway
// =========================================================================

/// The gateway served on `127.0.0.1:<ephemeral>`. Shuts down on drop.
pub struct LiveGateway {
    pub base_url: String,
    pub engine: Arc<TransferEngine>,
    pub history: Arc<History>,
    _shutdown: DropGuard,
}

impl LiveGateway {
    pub async fn start(uploader: Arc<dyn Uploader>, access_key: Option<&str>) -> Self {
        Self::start_with(uploader, settings(4, 3, 2), access_key).await
    }

    pub async fn start_with(
        uploader: Arc<dyn Uploader>,
        settings: Arc<TransferSettings>,
        access_key: Option<&str>,
    ) -> Self {
        let engine = Arc::new(TransferEngine::new(uploader, settings));
        let history = Arc::new(History::in_memory());
        let server = GatewayServer::new(GatewayConfig {
            engine: engine.clone(),
            history: history.clone(),
            access_key: access_key.map(str::to_string),
            compact_codes: true,
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let base_url = format!("http://{}", listener.local_addr().expect("local addr"));
        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();
        tokio::spawn(async move {
            let _ = server
                .serve_listener(listener, async move { stop.cancelled().await })
                .await;
        });

        Self {
            base_url,
            engine,
            history,
            _shutdown: shutdown.drop_guard(),
        }
    }

    pub fn url(&self, path_and_query: &str) -> String {
        format!("{}{path_and_query}", self.base_url)
    }
}

/// Percent-encode a query value.
pub fn encode(value: &str) -> String {
    utf8_percent_encode(value, NON_ALPHANUMERIC).to_string()
}

// =========================================================================
// Blob host
// =========================================================================

#[derive(Clone, Default)]
struct HostState {
    blobs: Arc<Mutex<HashMap<usize, Bytes>>>,
    next: Arc<AtomicUsize>,
    base: Arc<Mutex<String>>,
    uploads: Arc<AtomicUsize>,
    fail_every: Arc<AtomicUsize>,
}

/// An in-process image host: `POST /upload` answers
/// `{"data":{"url":...}}`, `GET /i/{id}` serves the blob back.
pub struct BlobHost {
    pub base_url: String,
    state: HostState,
    _shutdown: DropGuard,
}

async fn host_upload(State(host): State<HostState>, body: Bytes) -> Result<String, StatusCode> {
    let n = host.uploads.fetch_add(1, Ordering::SeqCst) + 1;
    let every = host.fail_every.load(Ordering::SeqCst);
    if every > 0 && n % every == 0 {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    let id = host.next.fetch_add(1, Ordering::SeqCst);
    host.blobs.lock().expect("lock poisoned").insert(id, body);
    let base = host.base.lock().expect("lock poisoned").clone();
    Ok(format!(r#"{{"code":0,"data":{{"url":"{base}/i/{id}.gif"}}}}"#))
}

async fn host_fetch(
    State(host): State<HostState>,
    Path(file): Path<String>,
) -> Result<Bytes, StatusCode> {
    let id: usize = file
        .trim_end_matches(".gif")
        .parse()
        .map_err(|_| StatusCode::NOT_FOUND)?;
    host.blobs
        .lock()
        .expect("lock poisoned")
        .get(&id)
        .cloned()
        .ok_or(StatusCode::NOT_FOUND)
}

impl BlobHost {
    pub async fn start() -> Self {
        let state = HostState::default();
        let app = Router::new()
            .route("/upload", post(host_upload))
            .route("/i/{file}", get(host_fetch))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let base_url = format!("http://{}", listener.local_addr().expect("local addr"));
        *state.base.lock().expect("lock poisoned") = base_url.clone();

        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await;
        });

        Self {
            base_url,
            state,
            _shutdown: shutdown.drop_guard(),
        }
    }

    /// Answer every `n`th upload with 503.
    pub fn fail_every(&self, n: usize) {
        self.state.fail_every.store(n, Ordering::SeqCst);
    }

    /// Upload requests received, including refused ones.
    pub fn upload_requests(&self) -> usize {
        self.state.uploads.load(Ordering::SeqCst)
    }

    /// Blobs currently held.
    pub fn blob_count(&self) -> usize {
        self.state.blobs.lock().expect("lock poisoned").len()
    }

    /// Forget a stored blob, as hosts do when they expire content.
    pub fn expire(&self, locator: &str) -> bool {
        let Some(id) = locator
            .rsplit('/')
            .next()
            .and_then(|f| f.trim_end_matches(".gif").parse::<usize>().ok())
        else {
            return false;
        };
        self.state
            .blobs
            .lock()
            .expect("lock poisoned")
            .remove(&id)
            .is_some()
    }
}
