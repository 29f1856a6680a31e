//! Import pipeline: remote index to combined cache view.
//!
//! Each run fetches the remote index, translates its layer metadata into
//! descriptor/provider pairs, parses the record graph into chains, and
//! materializes a read-only view that is combined with the local cache. A
//! failure anywhere aborts the attempt and leaves the previous view in
//! place.

mod chain;
mod view;

pub use chain::{
    descriptor_provider_pair, parse_config, CacheChains, ChainRecord, ChainResult,
    DescriptorProviderPair, ImportError,
};
pub use view::ImportedCacheView;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::service::CacheService;
use crate::solver::{CacheManager, CombinedCacheManager};
use crate::content::ContentProvider;
use crate::worker::Worker;

/// Builds fresh combined views from the remote index.
pub struct CacheImporter {
    service: Arc<dyn CacheService>,
    worker: Arc<dyn Worker>,
    layer_provider: Arc<dyn ContentProvider>,
    local: Arc<dyn CacheManager>,
}

impl CacheImporter {
    pub fn new(
        service: Arc<dyn CacheService>,
        worker: Arc<dyn Worker>,
        layer_provider: Arc<dyn ContentProvider>,
        local: Arc<dyn CacheManager>,
    ) -> Self {
        Self {
            service,
            worker,
            layer_provider,
            local,
        }
    }

    /// Run one import and return the view to install.
    pub async fn run(&self) -> Result<Arc<dyn CacheManager>, ImportError> {
        let cache_config = self.service.import_cache().await?;
        debug!(
            layers = cache_config.layers.len(),
            records = cache_config.records.len(),
            "importing remote cache index"
        );

        let mut providers = HashMap::new();
        for layer in &cache_config.layers {
            let pair = descriptor_provider_pair(layer, Arc::clone(&self.layer_provider))?;
            providers.insert(layer.blob.clone(), pair);
        }

        let chains = parse_config(&cache_config, &providers)?;
        let view = ImportedCacheView::materialize(chains, Arc::clone(&self.worker));
        Ok(Arc::new(CombinedCacheManager::new(
            vec![Arc::new(view) as Arc<dyn CacheManager>],
            Arc::clone(&self.local),
        )))
    }
}
