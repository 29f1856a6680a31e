//! In-memory key storage and the worker-backed result store.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::solver::traits::{CacheKeyStore, CacheResultStore, CachedResult};
use crate::solver::types::{CacheError, CacheInfoLink, CacheResult};
use crate::worker::{CacheRef, Worker};

/// In-memory cache key store.
///
/// Links are indexed in both directions: forward (dependency to dependents)
/// for queries, and backward (key to its dependencies) for the export walk.
#[derive(Default)]
pub struct MemoryKeyStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    keys: HashSet<String>,
    results: HashMap<String, Vec<CacheResult>>,
    links: HashMap<String, HashMap<CacheInfoLink, BTreeSet<String>>>,
    backlinks: HashMap<String, Vec<(String, CacheInfoLink)>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheKeyStore for MemoryKeyStore {
    fn exists(&self, id: &str) -> bool {
        self.inner.lock().unwrap().keys.contains(id)
    }

    fn walk(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut ids: Vec<String> = inner.keys.iter().cloned().collect();
        ids.sort();
        ids
    }

    fn walk_results(&self, id: &str) -> Vec<CacheResult> {
        let inner = self.inner.lock().unwrap();
        inner.results.get(id).cloned().unwrap_or_default()
    }

    fn walk_backlinks(&self, id: &str) -> Vec<(String, CacheInfoLink)> {
        let inner = self.inner.lock().unwrap();
        inner.backlinks.get(id).cloned().unwrap_or_default()
    }

    fn walk_links(&self, dep_id: &str, link: &CacheInfoLink) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .links
            .get(dep_id)
            .and_then(|by_link| by_link.get(link))
            .map(|targets| targets.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn add(&self, id: &str) {
        self.inner.lock().unwrap().keys.insert(id.to_string());
    }

    fn add_result(&self, id: &str, result: CacheResult) -> Result<(), CacheError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.keys.contains(id) {
            return Err(CacheError::KeyNotFound(id.to_string()));
        }
        let results = inner.results.entry(id.to_string()).or_default();
        if !results.iter().any(|existing| existing.id == result.id) {
            results.push(result);
        }
        Ok(())
    }

    fn add_link(
        &self,
        dep_id: &str,
        link: CacheInfoLink,
        target_id: &str,
    ) -> Result<(), CacheError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.keys.contains(dep_id) {
            return Err(CacheError::KeyNotFound(dep_id.to_string()));
        }
        if !inner.keys.contains(target_id) {
            return Err(CacheError::KeyNotFound(target_id.to_string()));
        }
        inner
            .links
            .entry(dep_id.to_string())
            .or_default()
            .entry(link.clone())
            .or_default()
            .insert(target_id.to_string());
        let backlinks = inner.backlinks.entry(target_id.to_string()).or_default();
        let entry = (dep_id.to_string(), link);
        if !backlinks.contains(&entry) {
            backlinks.push(entry);
        }
        Ok(())
    }
}

/// A cached result backed by an immutable worker ref.
pub struct WorkerCachedResult {
    cache_ref: Arc<dyn CacheRef>,
}

impl WorkerCachedResult {
    pub fn new(cache_ref: Arc<dyn CacheRef>) -> Self {
        Self { cache_ref }
    }
}

#[async_trait]
impl CachedResult for WorkerCachedResult {
    fn id(&self) -> &str {
        self.cache_ref.id()
    }

    fn worker_ref(&self) -> Option<Arc<dyn CacheRef>> {
        Some(Arc::clone(&self.cache_ref))
    }

    async fn release(&self) {
        self.cache_ref.release().await;
    }
}

/// Result store backed by the worker's ref cache.
///
/// Stored pointers carry the worker ref id; loading re-acquires the ref
/// without refreshing its last-used ordering.
pub struct WorkerResultStore {
    worker: Arc<dyn Worker>,
}

impl WorkerResultStore {
    pub fn new(worker: Arc<dyn Worker>) -> Self {
        Self { worker }
    }
}

#[async_trait]
impl CacheResultStore for WorkerResultStore {
    async fn save(
        &self,
        result: &dyn CachedResult,
        created_at: DateTime<Utc>,
    ) -> Result<CacheResult, CacheError> {
        let cache_ref = result
            .worker_ref()
            .ok_or_else(|| CacheError::InvalidResult(result.id().to_string()))?;
        Ok(CacheResult {
            id: cache_ref.id().to_string(),
            created_at,
        })
    }

    async fn load(&self, result: &CacheResult) -> Result<Box<dyn CachedResult>, CacheError> {
        let cache_ref = self.worker.load_ref(&result.id, true).await?;
        Ok(Box::new(WorkerCachedResult::new(cache_ref)))
    }
}
