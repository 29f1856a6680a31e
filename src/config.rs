//! Manager configuration.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::manager::MountSynchronizer;
use crate::service::types::RuntimeConfig;
use crate::solver::{CacheKeyStore, CacheResultStore};
use crate::worker::Worker;

/// Configuration errors; all fail manager construction.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid cache config: import/export periods must be non-zero")]
    ZeroSyncPeriod,
}

/// Everything the cache manager needs at construction time.
///
/// An empty `service_url` selects degenerate mode: a pass-through over the
/// local cache with no background synchronization.
pub struct ManagerConfig {
    /// Key/link storage of the local cache.
    pub key_store: Arc<dyn CacheKeyStore>,
    /// Result storage of the local cache.
    pub result_store: Arc<dyn CacheResultStore>,
    /// The worker that owns refs and materializes layers.
    pub worker: Arc<dyn Worker>,
    /// Optional cache-mount synchronization collaborator.
    pub mount_synchronizer: Option<Arc<dyn MountSynchronizer>>,
    /// Base URL of the remote cache service; empty for degenerate mode.
    pub service_url: String,
    /// Opaque engine identifier sent with `get_config`.
    pub engine_id: String,
}

/// The validated synchronization schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSchedule {
    pub import_period: Duration,
    pub export_period: Duration,
    pub export_timeout: Duration,
}

impl SyncSchedule {
    /// Convert the wire config, rejecting zero durations.
    pub fn from_wire(config: &RuntimeConfig) -> Result<Self, ConfigError> {
        if config.import_period_seconds == 0
            || config.export_period_seconds == 0
            || config.export_timeout_seconds == 0
        {
            return Err(ConfigError::ZeroSyncPeriod);
        }
        Ok(Self {
            import_period: Duration::from_secs(config.import_period_seconds),
            export_period: Duration::from_secs(config.export_period_seconds),
            export_timeout: Duration::from_secs(config.export_timeout_seconds),
        })
    }
}
