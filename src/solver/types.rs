//! Cache key, link, and record types.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest as _, Sha256};
use thiserror::Error;

use crate::content::Digest;
use crate::worker::WorkerError;

/// Errors surfaced through the solver-facing cache interface.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache key {0} not found")]
    KeyNotFound(String),

    #[error("cache record {id} not found in {source_id}")]
    RecordNotFound { id: String, source_id: String },

    #[error("cache view {0} is read-only")]
    ReadOnly(String),

    #[error("result {0} is not backed by a worker ref")]
    InvalidResult(String),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// A content-addressed fingerprint of a build step, plus the local results it
/// has yielded.
///
/// The `id` is deterministic: two engines computing the key for the same step
/// with the same dependency resolution arrive at the same id. That property
/// is what lets a peer's exported keys answer this engine's queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    /// Content-addressed fingerprint.
    pub id: String,
    /// Digest of the build step this key caches.
    pub digest: Digest,
    /// Output index of the step.
    pub output: u32,
    /// Dependency keys, one set of alternatives per input slot.
    ///
    /// Empty for base keys and for key handles returned from a query.
    pub deps: Vec<Vec<CacheKeyWithSelector>>,
}

impl CacheKey {
    /// Key for a step with no dependencies.
    pub fn base(digest: Digest, output: u32) -> Self {
        let id = root_key_id(&digest, output);
        Self {
            id,
            digest,
            output,
            deps: Vec::new(),
        }
    }

    /// Key for a step whose input slots are satisfied by `deps`.
    pub fn derived(digest: Digest, output: u32, deps: Vec<Vec<CacheKeyWithSelector>>) -> Self {
        let id = derived_key_id(&digest, output, &deps);
        Self {
            id,
            digest,
            output,
            deps,
        }
    }

    /// Handle with a known id, as returned from query paths.
    pub(crate) fn handle(id: String, digest: Digest, output: u32) -> Self {
        Self {
            id,
            digest,
            output,
            deps: Vec::new(),
        }
    }
}

/// A cache key that has been saved and may be exported.
pub type ExportableCacheKey = CacheKey;

/// A dependency key together with the selector it was resolved under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeyWithSelector {
    pub selector: String,
    pub key: Arc<CacheKey>,
}

/// Link metadata for one dependency edge.
///
/// `input` names the dependency slot of the dependent key; `digest` is the
/// dependent step's digest. The (input, digest, selector) triple is the full
/// edge identity used both for queries and for the export wire format.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheInfoLink {
    pub input: u32,
    pub digest: Digest,
    pub selector: String,
}

/// Pointer to a stored result of a cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheResult {
    /// Identifier understood by the owning result store (a worker ref id for
    /// local results).
    pub id: String,
    pub created_at: DateTime<Utc>,
}

/// A loadable record of a cache key, as returned from `records`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    pub id: String,
    /// Id of the cache key this record belongs to.
    pub key_id: String,
    pub created_at: DateTime<Utc>,
    /// Id of the cache manager that produced the record; load requests are
    /// routed back to it.
    pub source: String,
}

fn root_key_id(digest: &Digest, output: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(digest.as_str().as_bytes());
    hasher.update(b"@");
    hasher.update(output.to_be_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

fn derived_key_id(digest: &Digest, output: u32, deps: &[Vec<CacheKeyWithSelector>]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(digest.as_str().as_bytes());
    hasher.update(b"@");
    hasher.update(output.to_be_bytes());
    for (input, alternatives) in deps.iter().enumerate() {
        hasher.update(b"|");
        hasher.update((input as u32).to_be_bytes());
        for dep in alternatives {
            hasher.update(b":");
            hasher.update(dep.key.id.as_bytes());
            hasher.update(b"/");
            hasher.update(dep.selector.as_bytes());
        }
    }
    format!("sha256:{}", hex::encode(hasher.finalize()))
}
