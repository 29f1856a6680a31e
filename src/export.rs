//! Export pipeline: local cache state to the remote service.
//!
//! Each run walks the local key graph, announces it, uploads the blobs the
//! service asks for, and reports what was pushed:
//!
//! 1. **Walk** - flatten keys, backlinks, and loadable results into a
//!    records request. Results that fail to load (lazy or pruned refs) are
//!    skipped, never errors.
//! 2. **Announce** - `update_cache_records`; the response is the
//!    authoritative upload set. The server chooses; nothing is pushed
//!    speculatively.
//! 3. **Upload** - per record: resolve the ref, take its first zstd remote,
//!    push every layer through its signed URL.
//! 4. **Commit** - `update_cache_layers` with exactly the records whose
//!    uploads all succeeded. Skipped when phase 3 errored.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error};

use crate::content::{Compression, ContentError, ContentProvider, Descriptor, Digest};
use crate::service::types as wire;
use crate::service::types::{
    GetLayerUploadURLRequest, UpdateCacheLayersRequest, UpdateCacheRecordsRequest,
};
use crate::service::{CacheService, ServiceError};
use crate::solver::{release_result_detached, CacheKeyStore, CacheResultStore};
use crate::transport::{BlobTransport, TransportError};
use crate::worker::{release_ref_detached, CacheRef, Worker, WorkerError};

/// Export pipeline errors.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error("failed to upload layer {digest}: {source}")]
    Upload {
        digest: Digest,
        source: TransportError,
    },
}

/// Ships local cache state to the remote service.
pub struct CacheExporter {
    service: Arc<dyn CacheService>,
    transport: Arc<dyn BlobTransport>,
    worker: Arc<dyn Worker>,
    keys: Arc<dyn CacheKeyStore>,
    results: Arc<dyn CacheResultStore>,
}

impl CacheExporter {
    pub fn new(
        service: Arc<dyn CacheService>,
        transport: Arc<dyn BlobTransport>,
        worker: Arc<dyn Worker>,
        keys: Arc<dyn CacheKeyStore>,
        results: Arc<dyn CacheResultStore>,
    ) -> Self {
        Self {
            service,
            transport,
            worker,
            keys,
            results,
        }
    }

    /// Run one export.
    pub async fn run(&self) -> Result<(), ExportError> {
        let (cache_keys, links) = self.walk_local_state().await;

        let response = self
            .service
            .update_cache_records(UpdateCacheRecordsRequest { cache_keys, links })
            .await?;
        let records = response.export_records;
        if records.is_empty() {
            return Ok(());
        }
        debug!(records = records.len(), "server requested record uploads");

        let mut updated_records = Vec::with_capacity(records.len());
        for record in records {
            if let Some(layers) = self.export_record(&record).await? {
                updated_records.push(wire::RecordLayers {
                    record_digest: record.digest,
                    layers,
                });
            }
        }

        self.service
            .update_cache_layers(UpdateCacheLayersRequest { updated_records })
            .await?;
        Ok(())
    }

    /// Phase 1: flatten keys, links, and loadable results.
    async fn walk_local_state(&self) -> (Vec<wire::CacheKey>, Vec<wire::Link>) {
        let mut cache_keys = Vec::new();
        let mut links = Vec::new();

        for id in self.keys.walk() {
            let mut cache_key = wire::CacheKey {
                id: id.clone(),
                results: Vec::new(),
            };
            for (linked_id, info) in self.keys.walk_backlinks(&id) {
                links.push(wire::Link {
                    id: id.clone(),
                    linked_id,
                    input: info.input,
                    digest: info.digest,
                    selector: info.selector,
                });
            }
            for stored in self.keys.walk_results(&id) {
                let result = match self.results.load(&stored).await {
                    Ok(result) => result,
                    Err(err) => {
                        // the ref may be lazy or pruned, just skip it
                        debug!(result = %stored.id, key = %id, error = %err, "skipping cache result");
                        continue;
                    }
                };
                let Some(worker_ref) = result.worker_ref() else {
                    debug!(result = %stored.id, key = %id, "skipping cache result: not an immutable ref");
                    release_result_detached(result);
                    continue;
                };
                cache_key.results.push(wire::ResultEntry {
                    id: worker_ref.id().to_string(),
                    created_at: stored.created_at,
                    description: worker_ref.description(),
                });
                release_result_detached(result);
            }
            cache_keys.push(cache_key);
        }

        (cache_keys, links)
    }

    /// Phase 3 for one record. `Ok(None)` means the record was skipped.
    async fn export_record(
        &self,
        record: &wire::Record,
    ) -> Result<Option<Vec<Descriptor>>, ExportError> {
        let cache_ref = match self.worker.load_ref(&record.cache_ref_id, true).await {
            Ok(cache_ref) => cache_ref,
            Err(err) => {
                // the ref may be lazy or pruned, just skip it
                debug!(cache_ref = %record.cache_ref_id, error = %err, "skipping cache ref for export");
                return Ok(None);
            }
        };
        let outcome = self.push_record(&cache_ref, record).await;
        release_ref_detached(cache_ref);
        outcome
    }

    async fn push_record(
        &self,
        cache_ref: &Arc<dyn CacheRef>,
        record: &wire::Record,
    ) -> Result<Option<Vec<Descriptor>>, ExportError> {
        let mut remotes = cache_ref.remotes(Compression::Zstd).await?;
        if remotes.is_empty() {
            error!(cache_ref = %record.cache_ref_id, "skipping cache ref for export: no remotes");
            return Ok(None);
        }
        if remotes.len() > 1 {
            debug!(cache_ref = %record.cache_ref_id, "multiple remotes for cache ref, using the first one");
        }
        let remote = remotes.remove(0);

        for layer in &remote.descriptors {
            self.push_layer(layer, remote.provider.as_ref()).await?;
        }
        Ok(Some(remote.descriptors))
    }

    /// Upload one layer blob through its signed URL.
    async fn push_layer(
        &self,
        layer: &Descriptor,
        provider: &dyn ContentProvider,
    ) -> Result<(), ExportError> {
        let resolved = self
            .service
            .get_layer_upload_url(GetLayerUploadURLRequest {
                digest: layer.digest.clone(),
            })
            .await?;

        let reader = provider.reader_at(layer).await?;
        self.transport
            .put_blob(&resolved.url, reader)
            .await
            .map_err(|source| ExportError::Upload {
                digest: layer.digest.clone(),
                source,
            })
    }
}
