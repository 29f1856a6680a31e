//! Worker collaborator seam.
//!
//! The worker owns the content store and materializes layer blobs on demand.
//! The cache manager never touches layer bytes directly; it asks the worker
//! for immutable refs and for remote representations of those refs.
//!
//! Trait-based so tests can substitute an in-memory worker.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::content::{Compression, ContentProvider, Descriptor};

/// Worker-side errors.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The ref does not exist locally (lazy or pruned).
    #[error("ref {0} not found")]
    RefNotFound(String),

    #[error("failed to materialize remote: {0}")]
    Remote(String),

    #[error("{0}")]
    Other(String),
}

/// A remote representation of a ref: an ordered layer chain plus the provider
/// that can produce the bytes of each layer.
#[derive(Clone)]
pub struct Remote {
    /// Layer descriptors, base layer first.
    pub descriptors: Vec<Descriptor>,
    /// Provider for the layer bytes.
    pub provider: Arc<dyn ContentProvider>,
}

impl std::fmt::Debug for Remote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Remote")
            .field("descriptors", &self.descriptors)
            .finish()
    }
}

/// An immutable ref handle held while a cached result is in use.
///
/// Every acquired ref must be released on all exit paths; see
/// [`release_ref_detached`] for the shutdown-safe way to do that.
#[async_trait]
pub trait CacheRef: Send + Sync {
    /// Stable identifier of the underlying ref.
    fn id(&self) -> &str;

    /// Human-readable description recorded when the ref was created.
    fn description(&self) -> String;

    /// Remote representations of this ref under the given compression.
    async fn remotes(&self, compression: Compression) -> Result<Vec<Remote>, WorkerError>;

    /// Release the handle.
    async fn release(&self);
}

/// The worker capability set consumed by the cache manager.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Look up an immutable ref by id.
    ///
    /// `no_update_last_used` keeps the lookup from refreshing prune ordering,
    /// so that background exports do not pin refs the engine has stopped
    /// using. Returns [`WorkerError::RefNotFound`] when the ref is lazy or
    /// has been pruned.
    async fn load_ref(
        &self,
        id: &str,
        no_update_last_used: bool,
    ) -> Result<Arc<dyn CacheRef>, WorkerError>;

    /// Materialize a ref from a peer's remote layer chain.
    async fn from_remote(&self, remote: &Remote) -> Result<Arc<dyn CacheRef>, WorkerError>;
}

/// Release a ref on a detached task.
///
/// Cancellation of the caller must never leak a ref, so the release runs on
/// its own task rather than inside the caller's (possibly timed-out) future.
pub fn release_ref_detached(cache_ref: Arc<dyn CacheRef>) {
    if tokio::runtime::Handle::try_current().is_err() {
        warn!(ref_id = cache_ref.id(), "no runtime available to release ref");
        return;
    }
    tokio::spawn(async move {
        cache_ref.release().await;
    });
}
