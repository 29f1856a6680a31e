//! Read-only cache view materialized from an import.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::content::Digest;
use crate::import::chain::CacheChains;
use crate::solver::{
    CacheError, CacheKey, CacheKeyStore, CacheKeyWithSelector, CacheManager, CacheRecord,
    CacheResult, CacheResultStore, CachedResult, ExportableCacheKey, LocalCacheManager,
    MemoryKeyStore, WorkerCachedResult,
};
use crate::worker::{Remote, Worker};

/// Name under which imported records are surfaced; load requests for this
/// source route back to the view.
pub const IMPORTED_VIEW_ID: &str = "remote";

/// A snapshot view over one imported index.
///
/// Lookups behave like any other cache manager; loading a record asks the
/// worker to materialize the record's remote layer chain. The view is
/// immutable - saves are rejected - and is discarded wholesale when the next
/// import installs its replacement.
pub struct ImportedCacheView {
    inner: LocalCacheManager,
}

impl ImportedCacheView {
    /// Build the view from parsed chains.
    pub fn materialize(chains: CacheChains, worker: Arc<dyn Worker>) -> Self {
        let keys = MemoryKeyStore::new();
        let mut remotes = HashMap::new();

        for record in &chains.records {
            keys.add(&record.id);
        }
        for record in &chains.records {
            for (dep_id, link) in &record.links {
                keys.add(dep_id);
                // endpoints were registered above, the link cannot fail
                let _ = keys.add_link(dep_id, link.clone(), &record.id);
            }
            for chain_result in &record.results {
                let _ = keys.add_result(&record.id, chain_result.result.clone());
                remotes.insert(chain_result.result.id.clone(), chain_result.remote.clone());
            }
        }

        let results = ImportedResultStore {
            worker,
            remotes: Mutex::new(remotes),
        };
        Self {
            inner: LocalCacheManager::new(IMPORTED_VIEW_ID, Arc::new(keys), Arc::new(results)),
        }
    }
}

#[async_trait]
impl CacheManager for ImportedCacheView {
    fn id(&self) -> &str {
        IMPORTED_VIEW_ID
    }

    async fn query(
        &self,
        deps: &[CacheKeyWithSelector],
        input: u32,
        digest: &Digest,
        output: u32,
    ) -> Result<Vec<CacheKey>, CacheError> {
        self.inner.query(deps, input, digest, output).await
    }

    async fn records(&self, key: &CacheKey) -> Result<Vec<CacheRecord>, CacheError> {
        self.inner.records(key).await
    }

    async fn load(&self, record: &CacheRecord) -> Result<Box<dyn CachedResult>, CacheError> {
        self.inner.load(record).await
    }

    async fn save(
        &self,
        _key: &CacheKey,
        _result: &dyn CachedResult,
        _created_at: DateTime<Utc>,
    ) -> Result<ExportableCacheKey, CacheError> {
        Err(CacheError::ReadOnly(IMPORTED_VIEW_ID.to_string()))
    }
}

/// Result store that materializes peer layer chains through the worker.
struct ImportedResultStore {
    worker: Arc<dyn Worker>,
    remotes: Mutex<HashMap<String, Remote>>,
}

#[async_trait]
impl CacheResultStore for ImportedResultStore {
    async fn save(
        &self,
        _result: &dyn CachedResult,
        _created_at: DateTime<Utc>,
    ) -> Result<CacheResult, CacheError> {
        Err(CacheError::ReadOnly(IMPORTED_VIEW_ID.to_string()))
    }

    async fn load(&self, result: &CacheResult) -> Result<Box<dyn CachedResult>, CacheError> {
        let remote = {
            let remotes = self.remotes.lock().unwrap();
            remotes
                .get(&result.id)
                .cloned()
                .ok_or_else(|| CacheError::RecordNotFound {
                    id: result.id.clone(),
                    source_id: IMPORTED_VIEW_ID.to_string(),
                })?
        };
        let cache_ref = self.worker.from_remote(&remote).await?;
        Ok(Box::new(WorkerCachedResult::new(cache_ref)))
    }
}
