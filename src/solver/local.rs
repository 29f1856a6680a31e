//! Cache manager over a key store and a result store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::content::Digest;
use crate::solver::traits::{CacheKeyStore, CacheManager, CacheResultStore, CachedResult};
use crate::solver::types::{
    CacheError, CacheInfoLink, CacheKey, CacheKeyWithSelector, CacheRecord, CacheResult,
    ExportableCacheKey,
};

/// Query/Records/Load/Save over a [`CacheKeyStore`] + [`CacheResultStore`]
/// pair.
///
/// This backs both the local cache (memory key store + worker result store)
/// and the read side of imported views.
pub struct LocalCacheManager {
    name: String,
    keys: Arc<dyn CacheKeyStore>,
    results: Arc<dyn CacheResultStore>,
}

impl LocalCacheManager {
    pub fn new(
        name: impl Into<String>,
        keys: Arc<dyn CacheKeyStore>,
        results: Arc<dyn CacheResultStore>,
    ) -> Self {
        Self {
            name: name.into(),
            keys,
            results,
        }
    }

    /// The key store, for the export walk.
    pub fn key_store(&self) -> Arc<dyn CacheKeyStore> {
        Arc::clone(&self.keys)
    }

    /// The result store, for the export walk.
    pub fn result_store(&self) -> Arc<dyn CacheResultStore> {
        Arc::clone(&self.results)
    }
}

#[async_trait]
impl CacheManager for LocalCacheManager {
    fn id(&self) -> &str {
        &self.name
    }

    async fn query(
        &self,
        deps: &[CacheKeyWithSelector],
        input: u32,
        digest: &Digest,
        output: u32,
    ) -> Result<Vec<CacheKey>, CacheError> {
        if deps.is_empty() {
            let base = CacheKey::base(digest.clone(), output);
            if self.keys.exists(&base.id) {
                return Ok(vec![base]);
            }
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for dep in deps {
            let link = CacheInfoLink {
                input,
                digest: digest.clone(),
                selector: dep.selector.clone(),
            };
            for id in self.keys.walk_links(&dep.key.id, &link) {
                if seen.insert(id.clone()) {
                    found.push(CacheKey::handle(id, digest.clone(), output));
                }
            }
        }
        Ok(found)
    }

    async fn records(&self, key: &CacheKey) -> Result<Vec<CacheRecord>, CacheError> {
        Ok(self
            .keys
            .walk_results(&key.id)
            .into_iter()
            .map(|result| CacheRecord {
                id: result.id,
                key_id: key.id.clone(),
                created_at: result.created_at,
                source: self.name.clone(),
            })
            .collect())
    }

    async fn load(&self, record: &CacheRecord) -> Result<Box<dyn CachedResult>, CacheError> {
        self.results
            .load(&CacheResult {
                id: record.id.clone(),
                created_at: record.created_at,
            })
            .await
    }

    async fn save(
        &self,
        key: &CacheKey,
        result: &dyn CachedResult,
        created_at: DateTime<Utc>,
    ) -> Result<ExportableCacheKey, CacheError> {
        self.keys.add(&key.id);
        for (input, alternatives) in key.deps.iter().enumerate() {
            for dep in alternatives {
                self.keys.add(&dep.key.id);
                self.keys.add_link(
                    &dep.key.id,
                    CacheInfoLink {
                        input: input as u32,
                        digest: key.digest.clone(),
                        selector: dep.selector.clone(),
                    },
                    &key.id,
                )?;
            }
        }
        let stored = self.results.save(result, created_at).await?;
        self.keys.add_result(&key.id, stored)?;
        Ok(key.clone())
    }
}
