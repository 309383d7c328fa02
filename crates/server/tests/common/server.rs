//! Server test utilities.

use super::remote::MemoryArchive;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use picvault_cache::archive::ArchiveReceiver;
use picvault_cache::{CacheController, CacheParts, SettingsHandle, SystemClock};
use picvault_core::config::AppConfig;
use picvault_server::{AppState, create_router};
use picvault_storage::RemoteArchive;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use time::OffsetDateTime;
use tower::ServiceExt;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub remote: Option<Arc<MemoryArchive>>,
    /// Held so queued archive jobs are not refused; tests archive inline.
    pub receiver: Option<ArchiveReceiver>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Local tier only.
    pub async fn new() -> Self {
        Self::build(|_| {}, None).await
    }

    /// With an in-memory remote archive.
    pub async fn with_remote() -> Self {
        Self::build(|_| {}, Some(Arc::new(MemoryArchive::new()))).await
    }

    /// Local tier only, with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(modifier, None).await
    }

    async fn build<F>(modifier: F, remote: Option<Arc<MemoryArchive>>) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let mut config = AppConfig::for_testing(temp_dir.path());
        modifier(&mut config);

        let local = picvault_storage::local_from_config(&config.local)
            .await
            .expect("Failed to open local store");
        let metadata = picvault_metadata::from_config(&config.metadata)
            .await
            .expect("Failed to create metadata store");
        let settings = SettingsHandle::load(
            metadata.clone(),
            &config.policy,
            OffsetDateTime::now_utc(),
        )
        .await
        .expect("Failed to load settings");

        let (cache, receiver) = CacheController::new(
            CacheParts {
                metadata,
                local: Arc::new(local),
                remote: remote.clone().map(|r| r as Arc<dyn RemoteArchive>),
                settings: Arc::new(settings),
                timeouts: config.timeouts.clone(),
                batch_size: config.archive.scan_batch_size,
                clock: Arc::new(SystemClock),
            },
            config.archive.queue_capacity,
        );

        let state = AppState::new(config, cache);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            remote,
            receiver,
            _temp_dir: temp_dir,
        }
    }

    pub fn cache(&self) -> &CacheController {
        &self.state.cache
    }

    pub fn remote(&self) -> &MemoryArchive {
        self.remote.as_deref().expect("test server has no remote")
    }

    /// Send a request and return status, headers and raw body.
    pub async fn send(
        &self,
        request: Request<Body>,
    ) -> (StatusCode, axum::http::HeaderMap, bytes::Bytes) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body)
    }

    /// Send a request with an optional JSON body and parse the JSON response.
    pub async fn json(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(serde_json::to_vec(&v).unwrap())
            }
            None => Body::empty(),
        };

        let (status, _, bytes) = self.send(builder.body(body).unwrap()).await;
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// PUT raw image bytes under `id`.
    pub async fn put_image(&self, id: &str, bytes: &[u8], content_type: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("PUT")
            .uri(format!("/v1/images/{id}"))
            .header("Content-Type", content_type)
            .body(Body::from(bytes.to_vec()))
            .unwrap();
        let (status, _, body) = self.send(request).await;
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }
}

/// Deterministic image-looking bytes.
#[allow(dead_code)]
pub fn image_bytes(len: usize, seed: u8) -> Vec<u8> {
    let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
    bytes.extend((0..len.saturating_sub(8)).map(|i| (i as u8).wrapping_mul(31) ^ seed));
    bytes.truncate(len);
    bytes
}
