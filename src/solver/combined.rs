//! Combined view over an imported cache and the local cache.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::content::Digest;
use crate::solver::traits::{CacheManager, CachedResult};
use crate::solver::types::{
    CacheError, CacheKey, CacheKeyWithSelector, CacheRecord, ExportableCacheKey,
};

/// Ordered composition of cache managers.
///
/// Query and Records consult every source in order (imported views first,
/// local last) and de-duplicate; Load routes to the source that produced the
/// record; Save always goes to the main (local) manager.
pub struct CombinedCacheManager {
    sources: Vec<Arc<dyn CacheManager>>,
    main: Arc<dyn CacheManager>,
}

impl CombinedCacheManager {
    /// Build a combined view. `main` is appended to the lookup order and is
    /// the only save target.
    pub fn new(sources: Vec<Arc<dyn CacheManager>>, main: Arc<dyn CacheManager>) -> Self {
        let mut sources = sources;
        sources.push(Arc::clone(&main));
        Self { sources, main }
    }
}

#[async_trait]
impl CacheManager for CombinedCacheManager {
    fn id(&self) -> &str {
        "combined"
    }

    async fn query(
        &self,
        deps: &[CacheKeyWithSelector],
        input: u32,
        digest: &Digest,
        output: u32,
    ) -> Result<Vec<CacheKey>, CacheError> {
        let mut found = Vec::new();
        let mut seen = HashSet::new();
        for source in &self.sources {
            for key in source.query(deps, input, digest, output).await? {
                if seen.insert(key.id.clone()) {
                    found.push(key);
                }
            }
        }
        Ok(found)
    }

    async fn records(&self, key: &CacheKey) -> Result<Vec<CacheRecord>, CacheError> {
        let mut records = Vec::new();
        for source in &self.sources {
            records.extend(source.records(key).await?);
        }
        Ok(records)
    }

    async fn load(&self, record: &CacheRecord) -> Result<Box<dyn CachedResult>, CacheError> {
        for source in &self.sources {
            if source.id() == record.source {
                return source.load(record).await;
            }
        }
        Err(CacheError::RecordNotFound {
            id: record.id.clone(),
            source_id: record.source.clone(),
        })
    }

    async fn save(
        &self,
        key: &CacheKey,
        result: &dyn CachedResult,
        created_at: DateTime<Utc>,
    ) -> Result<ExportableCacheKey, CacheError> {
        self.main.save(key, result, created_at).await
    }
}
