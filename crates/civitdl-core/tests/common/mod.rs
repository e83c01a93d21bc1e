//! In-process mock of the catalog API and its download endpoint.

#![allow(dead_code)]

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use civitdl_core::network::RetryConfig;
use futures::stream::{self, StreamExt};
use civitdl_core::{
    CivitaiClient, Downloader, EffectiveConfig, HttpClient, TransferManager,
};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A file served by the mock.
#[derive(Clone)]
pub struct MockFile {
    pub id: u64,
    pub name: String,
    pub content: Vec<u8>,
    pub primary: bool,
    pub publish_hash: bool,
}

impl MockFile {
    pub fn new(id: u64, name: &str, content: &[u8]) -> Self {
        Self {
            id,
            name: name.to_string(),
            content: content.to_vec(),
            primary: true,
            publish_hash: true,
        }
    }

    pub fn sha256(&self) -> String {
        hex::encode(Sha256::digest(&self.content))
    }
}

#[derive(Clone)]
pub struct MockVersion {
    pub id: u64,
    pub label: String,
    pub created_at: String,
    pub files: Vec<MockFile>,
}

impl MockVersion {
    pub fn new(id: u64, label: &str, created_at: &str, files: Vec<MockFile>) -> Self {
        Self {
            id,
            label: label.to_string(),
            created_at: created_at.to_string(),
            files,
        }
    }
}

#[derive(Clone)]
pub struct MockModel {
    pub id: u64,
    pub name: String,
    pub model_type: String,
    pub versions: Vec<MockVersion>,
}

impl MockModel {
    pub fn new(id: u64, name: &str, model_type: &str, versions: Vec<MockVersion>) -> Self {
        Self {
            id,
            name: name.to_string(),
            model_type: model_type.to_string(),
            versions,
        }
    }
}

#[derive(Default)]
pub struct MockState {
    base_url: String,
    models: Vec<MockModel>,
    /// Serve `Range` requests with 206; otherwise always 200 with the full body.
    pub honor_range: AtomicBool,
    /// Serve only this many bytes of every file.
    pub truncate_to: Mutex<Option<usize>>,
    /// Send this many bytes of every file, then hold the connection open.
    pub stall_after: Mutex<Option<usize>>,
    pub download_hits: AtomicUsize,
    pub range_starts: Mutex<Vec<u64>>,
    /// When set, catalog calls without this bearer token get 401.
    pub required_token: Option<String>,
}

impl MockState {
    fn file_json(&self, file: &MockFile) -> Value {
        let mut hashes = serde_json::Map::new();
        if file.publish_hash {
            hashes.insert("SHA256".into(), json!(file.sha256().to_uppercase()));
        }
        hashes.insert("CRC32".into(), json!("DEADBEEF"));
        json!({
            "id": file.id,
            "name": file.name,
            "sizeKB": file.content.len() as f64 / 1024.0,
            "type": "Model",
            "primary": file.primary,
            "hashes": hashes,
            "downloadUrl": format!("{}/download/{}", self.base_url, file.id),
        })
    }

    fn version_json(&self, model: &MockModel, version: &MockVersion) -> Value {
        json!({
            "id": version.id,
            "modelId": model.id,
            "name": version.label,
            "createdAt": version.created_at,
            "baseModel": "SD 1.5",
            "stats": {"downloadCount": 10},
            "files": version.files.iter().map(|f| self.file_json(f)).collect::<Vec<_>>(),
            "model": {"name": model.name, "type": model.model_type},
        })
    }

    fn model_json(&self, model: &MockModel) -> Value {
        json!({
            "id": model.id,
            "name": model.name,
            "type": model.model_type,
            "nsfw": false,
            "modelVersions": model
                .versions
                .iter()
                .map(|v| self.version_json(model, v))
                .collect::<Vec<_>>(),
        })
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        match &self.required_token {
            None => true,
            Some(token) => headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                == Some(format!("Bearer {}", token).as_str()),
        }
    }
}

async fn get_model(
    State(state): State<Arc<MockState>>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match state.models.iter().find(|m| m.id == id) {
        Some(model) => Json(state.model_json(model)).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({"error": "No model"}))).into_response(),
    }
}

async fn get_version(
    State(state): State<Arc<MockState>>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    for model in &state.models {
        if let Some(version) = model.versions.iter().find(|v| v.id == id) {
            return Json(state.version_json(model, version)).into_response();
        }
    }
    StatusCode::NOT_FOUND.into_response()
}

async fn search(
    State(state): State<Arc<MockState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let query = params
        .get("query")
        .map(|q| q.to_lowercase())
        .unwrap_or_default();
    let items: Vec<Value> = state
        .models
        .iter()
        .filter(|m| m.name.to_lowercase().contains(&query))
        .map(|m| state.model_json(m))
        .collect();
    Json(json!({"items": items, "metadata": {"totalItems": items.len()}})).into_response()
}

async fn download(
    State(state): State<Arc<MockState>>,
    Path(file_id): Path<u64>,
    headers: HeaderMap,
) -> Response {
    state.download_hits.fetch_add(1, Ordering::SeqCst);

    let file = state
        .models
        .iter()
        .flat_map(|m| m.versions.iter())
        .flat_map(|v| v.files.iter())
        .find(|f| f.id == file_id);
    let Some(file) = file else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut body = file.content.clone();
    if let Some(limit) = *state.truncate_to.lock().unwrap() {
        body.truncate(limit);
    }

    if let Some(sent) = *state.stall_after.lock().unwrap() {
        body.truncate(sent);
        let head = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from(body))]);
        let stalled = head.chain(stream::pending());
        return (StatusCode::OK, Body::from_stream(stalled)).into_response();
    }

    let range_start = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("bytes="))
        .and_then(|v| v.trim_end_matches('-').parse::<u64>().ok());

    if let (Some(start), true) = (range_start, state.honor_range.load(Ordering::SeqCst)) {
        state.range_starts.lock().unwrap().push(start);
        let total = file.content.len() as u64;
        if start >= total {
            return StatusCode::RANGE_NOT_SATISFIABLE.into_response();
        }
        let slice = body.get(start as usize..).unwrap_or_default().to_vec();
        let content_range = format!("bytes {}-{}/{}", start, total - 1, total);
        return (
            StatusCode::PARTIAL_CONTENT,
            [(header::CONTENT_RANGE, content_range)],
            slice,
        )
            .into_response();
    }

    (StatusCode::OK, body).into_response()
}

/// A running mock catalog.
pub struct MockCatalog {
    pub state: Arc<MockState>,
    pub base_url: String,
}

impl MockCatalog {
    pub async fn start(models: Vec<MockModel>) -> Self {
        Self::start_with_token(models, None).await
    }

    pub async fn start_with_token(models: Vec<MockModel>, required_token: Option<&str>) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let state = Arc::new(MockState {
            base_url: base_url.clone(),
            models,
            honor_range: AtomicBool::new(true),
            required_token: required_token.map(String::from),
            ..MockState::default()
        });

        let app = Router::new()
            .route("/api/v1/models", get(search))
            .route("/api/v1/models/:id", get(get_model))
            .route("/api/v1/model-versions/:id", get(get_version))
            .route("/download/:id", get(download))
            .with_state(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { state, base_url }
    }

    pub fn api_base(&self) -> String {
        format!("{}/api/v1", self.base_url)
    }

    pub fn download_hits(&self) -> usize {
        self.state.download_hits.load(Ordering::SeqCst)
    }

    pub fn set_honor_range(&self, honor: bool) {
        self.state.honor_range.store(honor, Ordering::SeqCst);
    }

    pub fn set_truncate(&self, limit: Option<usize>) {
        *self.state.truncate_to.lock().unwrap() = limit;
    }

    pub fn set_stall_after(&self, sent: Option<usize>) {
        *self.state.stall_after.lock().unwrap() = sent;
    }

    pub fn range_starts(&self) -> Vec<u64> {
        self.state.range_starts.lock().unwrap().clone()
    }

    /// A downloader against this mock with fast retries.
    pub fn downloader(&self, root: &std::path::Path, token: Option<&str>) -> Downloader {
        let fast = RetryConfig::new()
            .with_base_delay(Duration::from_millis(5))
            .with_jitter(false);
        let http = HttpClient::new(token.map(String::from)).unwrap();
        let catalog = CivitaiClient::with_base_url(http.clone(), self.api_base())
            .with_retry(fast.clone());
        let transfers = TransferManager::new(http)
            .with_retry(fast)
            .with_progress_interval(Duration::ZERO);
        let config = EffectiveConfig {
            api_token: token.map(String::from),
            root_path: root.to_path_buf(),
            output_dir: None,
            placement_overrides: BTreeMap::new(),
        };
        Downloader::new(Arc::new(catalog), transfers, config)
    }
}

/// Model 12345: one LORA with a single-file latest version.
pub fn detail_tweaker() -> MockModel {
    MockModel::new(
        12345,
        "Detail Tweaker",
        "LORA",
        vec![
            MockVersion::new(
                2,
                "v2.2",
                "2023-06-01T00:00:00.000Z",
                vec![MockFile::new(
                    21,
                    "detail_tweaker_v22.safetensors",
                    b"detail tweaker weights v2.2 -- 0123456789abcdef",
                )],
            ),
            MockVersion::new(
                1,
                "v1.0",
                "2023-01-01T00:00:00.000Z",
                vec![MockFile::new(
                    11,
                    "detail_tweaker_v10.safetensors",
                    b"detail tweaker weights v1.0",
                )],
            ),
        ],
    )
}

/// Model 67890: a checkpoint with versions v2.0 and v1.1.
pub fn dream_checkpoint() -> MockModel {
    MockModel::new(
        67890,
        "Dream Checkpoint",
        "Checkpoint",
        vec![
            MockVersion::new(
                32,
                "v2.0",
                "2024-02-01T00:00:00.000Z",
                vec![MockFile::new(321, "dream_v20.safetensors", b"dream checkpoint v2.0")],
            ),
            MockVersion::new(
                31,
                "v1.1",
                "2023-12-01T00:00:00.000Z",
                vec![MockFile::new(311, "dream_v11.safetensors", b"dream checkpoint v1.1")],
            ),
        ],
    )
}
