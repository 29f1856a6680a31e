//! Cache interface and storage seams.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::content::Digest;
use crate::solver::types::{
    CacheError, CacheInfoLink, CacheKey, CacheKeyWithSelector, CacheRecord, CacheResult,
    ExportableCacheKey,
};
use crate::worker::CacheRef;

/// A loaded cache result.
///
/// Holds a reference to an immutable underlying ref for as long as the result
/// is alive; callers must release it on all exit paths (see
/// [`release_result_detached`]).
#[async_trait]
pub trait CachedResult: Send + Sync {
    /// Identifier of the result (the backing ref id for worker results).
    fn id(&self) -> &str;

    /// The immutable worker ref backing this result, if it is one.
    ///
    /// Results whose system handle is not a worker ref are skipped by the
    /// export walk.
    fn worker_ref(&self) -> Option<Arc<dyn CacheRef>>;

    /// Release the underlying ref.
    async fn release(&self);
}

/// Solver-facing cache operations.
///
/// Implemented by the local cache, by imported views, by the combined view
/// over both, and by the manager façade itself.
#[async_trait]
pub trait CacheManager: Send + Sync {
    /// Identifier used to route record loads back to their owner.
    fn id(&self) -> &str;

    /// Find cache keys for a step.
    ///
    /// `deps` is the set of candidate keys for input slot `input`; an empty
    /// set queries for base keys of (`digest`, `output`).
    async fn query(
        &self,
        deps: &[CacheKeyWithSelector],
        input: u32,
        digest: &Digest,
        output: u32,
    ) -> Result<Vec<CacheKey>, CacheError>;

    /// Loadable records of a key.
    async fn records(&self, key: &CacheKey) -> Result<Vec<CacheRecord>, CacheError>;

    /// Load a record into a usable result.
    async fn load(&self, record: &CacheRecord) -> Result<Box<dyn CachedResult>, CacheError>;

    /// Persist a result under a key.
    async fn save(
        &self,
        key: &CacheKey,
        result: &dyn CachedResult,
        created_at: DateTime<Utc>,
    ) -> Result<ExportableCacheKey, CacheError>;
}

/// Key, link, and result-pointer storage behind the local cache.
///
/// Walks return owned snapshots; the store serializes access internally.
pub trait CacheKeyStore: Send + Sync {
    /// Whether a key id is present.
    fn exists(&self, id: &str) -> bool;

    /// All key ids, in stable order.
    fn walk(&self) -> Vec<String>;

    /// Result pointers recorded for a key.
    fn walk_results(&self, id: &str) -> Vec<CacheResult>;

    /// Dependency edges of a key: (dependency id, link metadata).
    fn walk_backlinks(&self, id: &str) -> Vec<(String, CacheInfoLink)>;

    /// Keys reachable from a dependency through a specific link.
    fn walk_links(&self, dep_id: &str, link: &CacheInfoLink) -> Vec<String>;

    /// Register a key id.
    fn add(&self, id: &str);

    /// Attach a result pointer to a key.
    fn add_result(&self, id: &str, result: CacheResult) -> Result<(), CacheError>;

    /// Record a dependency edge from `dep_id` to `target_id`.
    fn add_link(&self, dep_id: &str, link: CacheInfoLink, target_id: &str)
        -> Result<(), CacheError>;
}

/// Result storage: turns results into pointers and back.
#[async_trait]
pub trait CacheResultStore: Send + Sync {
    /// Persist a result, returning the pointer to store with its key.
    async fn save(
        &self,
        result: &dyn CachedResult,
        created_at: DateTime<Utc>,
    ) -> Result<CacheResult, CacheError>;

    /// Re-acquire a stored result.
    ///
    /// Fails with [`CacheError::Worker`] when the backing ref is lazy or has
    /// been pruned.
    async fn load(&self, result: &CacheResult) -> Result<Box<dyn CachedResult>, CacheError>;
}

/// Release a loaded result on a detached task, so that cancellation of the
/// caller cannot leak the underlying ref.
pub fn release_result_detached(result: Box<dyn CachedResult>) {
    if tokio::runtime::Handle::try_current().is_err() {
        return;
    }
    tokio::spawn(async move {
        result.release().await;
    });
}
