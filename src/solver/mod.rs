//! Solver-facing cache model.
//!
//! The build solver sees one [`CacheManager`] interface regardless of whether
//! a lookup is answered from local state or from a peer's imported index.
//! This module defines that interface, the key/result storage seams behind
//! it, the in-memory key store backing the local cache, and the combined
//! manager that layers an imported view over the local one.

mod combined;
mod local;
mod store;
mod traits;
mod types;

pub use combined::CombinedCacheManager;
pub use local::LocalCacheManager;
pub use store::{MemoryKeyStore, WorkerCachedResult, WorkerResultStore};
pub use traits::{
    release_result_detached, CacheKeyStore, CacheManager, CacheResultStore, CachedResult,
};
pub use types::{
    CacheError, CacheInfoLink, CacheKey, CacheKeyWithSelector, CacheRecord, CacheResult,
    ExportableCacheKey,
};
