//! Shared mocks for pipeline and manager tests.
//!
//! Everything here is deterministic and network-free: the mock service
//! records every request and serves scripted responses, the mock transport
//! keeps blobs in maps keyed by URL, and the memory worker tracks ref
//! acquisitions so tests can assert that nothing leaks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::content::{
    BlobReader, ContentError, ContentProvider, Descriptor, Digest, ANNOTATION_UNCOMPRESSED,
};
use crate::service::types::{
    CacheConfig, GetConfigRequest, GetLayerDownloadURLRequest, GetLayerUploadURLRequest,
    LayerURLResponse, Record, RuntimeConfig, UpdateCacheLayersRequest, UpdateCacheRecordsRequest,
    UpdateCacheRecordsResponse,
};
use crate::service::{CacheService, ServiceError};
use crate::solver::CachedResult;
use crate::transport::{BlobTransport, TransportError};
use crate::worker::{CacheRef, Remote, Worker, WorkerError};

/// Extract the `Err` variant of a `Result` whose `Ok` type has no `Debug`
/// impl, so tests can assert on errors without `Result::unwrap_err`.
pub fn expect_err<T, E>(result: Result<T, E>) -> E {
    match result {
        Err(err) => err,
        Ok(_) => panic!("expected Err, got Ok"),
    }
}

/// Descriptor for a zstd layer blob, with a synthetic diff-id annotation.
pub fn layer_descriptor(blob: &str, size: u64) -> Descriptor {
    let mut annotations = HashMap::new();
    annotations.insert(ANNOTATION_UNCOMPRESSED.to_string(), format!("{blob}-diff"));
    Descriptor {
        media_type: "application/vnd.oci.image.layer.v1.tar+zstd".to_string(),
        digest: Digest::new(blob),
        size,
        annotations,
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────────────────────────────────

/// A result handle with a fixed id and optional backing ref.
pub struct CannedResult {
    id: String,
    worker_ref: Option<Arc<dyn CacheRef>>,
}

impl CannedResult {
    pub fn new(id: impl Into<String>, worker_ref: Option<Arc<dyn CacheRef>>) -> Self {
        Self {
            id: id.into(),
            worker_ref,
        }
    }
}

#[async_trait]
impl CachedResult for CannedResult {
    fn id(&self) -> &str {
        &self.id
    }

    fn worker_ref(&self) -> Option<Arc<dyn CacheRef>> {
        self.worker_ref.clone()
    }

    async fn release(&self) {}
}

// ─────────────────────────────────────────────────────────────────────────
// Worker
// ─────────────────────────────────────────────────────────────────────────

/// Ref handle tracking acquisition/release balance.
pub struct MemoryRef {
    id: String,
    description: String,
    remotes: Vec<Remote>,
    acquisitions: AtomicUsize,
    releases: AtomicUsize,
}

#[async_trait]
impl CacheRef for MemoryRef {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    async fn remotes(&self, _compression: crate::content::Compression) -> Result<Vec<Remote>, WorkerError> {
        Ok(self.remotes.clone())
    }

    async fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory worker for tests.
pub struct MemoryWorker {
    refs: Mutex<HashMap<String, Arc<MemoryRef>>>,
    tracked: Mutex<Vec<Arc<MemoryRef>>>,
    from_remote_calls: AtomicUsize,
}

impl MemoryWorker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            refs: Mutex::new(HashMap::new()),
            tracked: Mutex::new(Vec::new()),
            from_remote_calls: AtomicUsize::new(0),
        })
    }

    /// Register a ref the worker can serve.
    pub fn insert_ref(
        &self,
        id: &str,
        description: &str,
        remotes: Vec<Remote>,
    ) -> Arc<dyn CacheRef> {
        let cache_ref = Arc::new(MemoryRef {
            id: id.to_string(),
            description: description.to_string(),
            remotes,
            acquisitions: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        });
        self.refs
            .lock()
            .unwrap()
            .insert(id.to_string(), Arc::clone(&cache_ref));
        self.tracked.lock().unwrap().push(Arc::clone(&cache_ref));
        cache_ref
    }

    /// Drop a ref, simulating pruning.
    pub fn remove_ref(&self, id: &str) {
        self.refs.lock().unwrap().remove(id);
    }

    /// Whether every acquisition has been balanced by a release.
    pub fn all_refs_released(&self) -> bool {
        self.tracked.lock().unwrap().iter().all(|cache_ref| {
            cache_ref.acquisitions.load(Ordering::SeqCst)
                == cache_ref.releases.load(Ordering::SeqCst)
        })
    }

    pub fn from_remote_calls(&self) -> usize {
        self.from_remote_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Worker for MemoryWorker {
    async fn load_ref(
        &self,
        id: &str,
        _no_update_last_used: bool,
    ) -> Result<Arc<dyn CacheRef>, WorkerError> {
        let cache_ref = self
            .refs
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| WorkerError::RefNotFound(id.to_string()))?;
        cache_ref.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(cache_ref)
    }

    async fn from_remote(&self, remote: &Remote) -> Result<Arc<dyn CacheRef>, WorkerError> {
        let n = self.from_remote_calls.fetch_add(1, Ordering::SeqCst);
        let id = format!("imported-{n}");
        let cache_ref = Arc::new(MemoryRef {
            id,
            description: String::new(),
            remotes: vec![remote.clone()],
            acquisitions: AtomicUsize::new(1),
            releases: AtomicUsize::new(0),
        });
        self.tracked.lock().unwrap().push(Arc::clone(&cache_ref));
        Ok(cache_ref)
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Content provider
// ─────────────────────────────────────────────────────────────────────────

/// Blob provider over an in-memory map.
pub struct MemoryBlobProvider {
    blobs: Mutex<HashMap<Digest, Bytes>>,
}

impl MemoryBlobProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            blobs: Mutex::new(HashMap::new()),
        })
    }

    pub fn insert(&self, digest: Digest, bytes: Vec<u8>) {
        self.blobs.lock().unwrap().insert(digest, Bytes::from(bytes));
    }
}

#[async_trait]
impl ContentProvider for MemoryBlobProvider {
    async fn reader_at(&self, desc: &Descriptor) -> Result<Box<dyn BlobReader>, ContentError> {
        let data = self
            .blobs
            .lock()
            .unwrap()
            .get(&desc.digest)
            .cloned()
            .ok_or_else(|| ContentError::NotFound {
                digest: desc.digest.clone(),
            })?;
        Ok(Box::new(MemoryBlobReader { data }))
    }
}

struct MemoryBlobReader {
    data: Bytes,
}

#[async_trait]
impl BlobReader for MemoryBlobReader {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_at(&self, offset: u64, length: usize) -> Result<Bytes, ContentError> {
        let offset = offset as usize;
        if offset >= self.data.len() {
            return Ok(Bytes::new());
        }
        let end = std::cmp::min(offset + length, self.data.len());
        Ok(self.data.slice(offset..end))
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Service
// ─────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct MockServiceState {
    config: Option<RuntimeConfig>,
    import_config: CacheConfig,
    fail_imports: bool,
    fail_download_urls: bool,
    export_records: Vec<Record>,
    records_delay: Option<Duration>,
    record_requests: Vec<UpdateCacheRecordsRequest>,
    layer_updates: Vec<UpdateCacheLayersRequest>,
    import_calls: usize,
}

/// Scripted, recording implementation of [`CacheService`].
///
/// Defaults: hour-long sync periods (so loops never tick unless a test asks
/// for it), an empty remote index, and an empty export set.
pub struct MockCacheService {
    state: Mutex<MockServiceState>,
}

impl MockCacheService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockServiceState::default()),
        })
    }

    pub fn set_config(&self, config: RuntimeConfig) {
        self.state.lock().unwrap().config = Some(config);
    }

    pub fn set_import_config(&self, config: CacheConfig) {
        self.state.lock().unwrap().import_config = config;
    }

    pub fn fail_imports(&self) {
        self.state.lock().unwrap().fail_imports = true;
    }

    pub fn fail_download_urls(&self) {
        self.state.lock().unwrap().fail_download_urls = true;
    }

    pub fn respond_with_export_records(&self, records: Vec<Record>) {
        self.state.lock().unwrap().export_records = records;
    }

    /// Make `update_cache_records` take `delay` before responding.
    pub fn delay_record_updates(&self, delay: Duration) {
        self.state.lock().unwrap().records_delay = Some(delay);
    }

    pub fn recorded_record_requests(&self) -> Vec<UpdateCacheRecordsRequest> {
        self.state.lock().unwrap().record_requests.clone()
    }

    pub fn recorded_layer_updates(&self) -> Vec<UpdateCacheLayersRequest> {
        self.state.lock().unwrap().layer_updates.clone()
    }

    pub fn import_calls(&self) -> usize {
        self.state.lock().unwrap().import_calls
    }
}

#[async_trait]
impl CacheService for MockCacheService {
    async fn get_config(&self, _req: GetConfigRequest) -> Result<RuntimeConfig, ServiceError> {
        Ok(self.state.lock().unwrap().config.unwrap_or(RuntimeConfig {
            import_period_seconds: 3600,
            export_period_seconds: 3600,
            export_timeout_seconds: 60,
        }))
    }

    async fn import_cache(&self) -> Result<CacheConfig, ServiceError> {
        let mut state = self.state.lock().unwrap();
        state.import_calls += 1;
        if state.fail_imports {
            return Err(ServiceError::Status {
                status: 500,
                url: "mock:import".to_string(),
            });
        }
        Ok(state.import_config.clone())
    }

    async fn update_cache_records(
        &self,
        req: UpdateCacheRecordsRequest,
    ) -> Result<UpdateCacheRecordsResponse, ServiceError> {
        let (delay, export_records) = {
            let mut state = self.state.lock().unwrap();
            state.record_requests.push(req);
            (state.records_delay, state.export_records.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(UpdateCacheRecordsResponse { export_records })
    }

    async fn update_cache_layers(
        &self,
        req: UpdateCacheLayersRequest,
    ) -> Result<(), ServiceError> {
        self.state.lock().unwrap().layer_updates.push(req);
        Ok(())
    }

    async fn get_layer_upload_url(
        &self,
        req: GetLayerUploadURLRequest,
    ) -> Result<LayerURLResponse, ServiceError> {
        Ok(LayerURLResponse {
            url: format!("https://blobs.test/{}", req.digest),
        })
    }

    async fn get_layer_download_url(
        &self,
        req: GetLayerDownloadURLRequest,
    ) -> Result<LayerURLResponse, ServiceError> {
        if self.state.lock().unwrap().fail_download_urls {
            return Err(ServiceError::Status {
                status: 403,
                url: "mock:download-url".to_string(),
            });
        }
        Ok(LayerURLResponse {
            url: format!("https://blobs.test/{}", req.digest),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct MockTransportState {
    puts: Vec<(String, Vec<u8>)>,
    fail_puts: HashMap<String, u16>,
    blobs: HashMap<String, Bytes>,
}

/// In-memory implementation of [`BlobTransport`].
pub struct MockTransport {
    state: Mutex<MockTransportState>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockTransportState::default()),
        })
    }

    /// Serve `bytes` for ranged GETs against `url`.
    pub fn insert_blob(&self, url: &str, bytes: Vec<u8>) {
        self.state
            .lock()
            .unwrap()
            .blobs
            .insert(url.to_string(), Bytes::from(bytes));
    }

    /// Respond to PUTs against `url` with `status`.
    pub fn fail_put(&self, url: &str, status: u16) {
        self.state
            .lock()
            .unwrap()
            .fail_puts
            .insert(url.to_string(), status);
    }

    /// Successful uploads, in order.
    pub fn recorded_puts(&self) -> Vec<(String, Vec<u8>)> {
        self.state.lock().unwrap().puts.clone()
    }
}

#[async_trait]
impl BlobTransport for MockTransport {
    async fn put_blob(
        &self,
        url: &str,
        reader: Box<dyn BlobReader>,
    ) -> Result<(), TransportError> {
        if let Some(status) = self.state.lock().unwrap().fail_puts.get(url).copied() {
            return Err(TransportError::UnexpectedStatus {
                status,
                url: url.to_string(),
            });
        }

        let size = reader.size();
        let mut body = Vec::with_capacity(size as usize);
        let mut offset = 0u64;
        while offset < size {
            let chunk = reader
                .read_at(offset, crate::content::BLOB_CHUNK_SIZE)
                .await
                .map_err(|err| TransportError::Request {
                    url: url.to_string(),
                    reason: err.to_string(),
                })?;
            if chunk.is_empty() {
                break;
            }
            offset += chunk.len() as u64;
            body.extend_from_slice(&chunk);
        }

        self.state
            .lock()
            .unwrap()
            .puts
            .push((url.to_string(), body));
        Ok(())
    }

    async fn get_blob_range(
        &self,
        url: &str,
        offset: u64,
        length: u64,
    ) -> Result<Bytes, TransportError> {
        let state = self.state.lock().unwrap();
        let data = state
            .blobs
            .get(url)
            .ok_or_else(|| TransportError::UnexpectedStatus {
                status: 404,
                url: url.to_string(),
            })?;
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(Bytes::new());
        }
        let end = std::cmp::min(offset + length as usize, data.len());
        Ok(data.slice(offset..end))
    }
}
