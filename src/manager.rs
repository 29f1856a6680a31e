//! Lifecycle coordinator and solver-facing façade.
//!
//! The manager owns the two background synchronization loops and the view
//! they feed:
//!
//! - the **import loop** periodically rebuilds the combined view from the
//!   remote index and installs it with an atomic swap;
//! - the **export loop** periodically ships local cache state to the
//!   service, and runs exactly one final export when shutdown begins.
//!
//! Solver calls are served from whichever view is installed at the time.
//! Construction performs one synchronous import so the engine never starts
//! with a stale view; after that, loop failures are logged and retried on
//! the next tick, never propagated.
//!
//! # Shutdown
//!
//! `close` cancels the `start_close` token, invokes the cache-mount stop
//! hook if one was installed, and waits until the export loop signals `done`
//! or the caller's token fires - whichever comes first. The final export
//! keeps its full configured budget either way and may finish in the
//! background after `close` has returned.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{ConfigError, ManagerConfig, SyncSchedule};
use crate::content::{ContentProvider, Digest};
use crate::export::CacheExporter;
use crate::import::{CacheImporter, ImportError};
use crate::layer::LayerProvider;
use crate::service::types::GetConfigRequest;
use crate::service::{CacheService, HttpCacheService, ServiceError};
use crate::solver::{
    CacheError, CacheKey, CacheKeyWithSelector, CacheManager, CacheRecord, CachedResult,
    ExportableCacheKey, LocalCacheManager,
};
use crate::transport::{BlobTransport, ReqwestTransport};

/// Identifier of the manager façade.
pub const MANAGER_ID: &str = "enginecache";

/// Per-tick budget for periodic imports.
const IMPORT_TICK_TIMEOUT: Duration = Duration::from_secs(60);

/// Manager lifecycle errors. Only construction propagates errors to the
/// caller; the background loops log and retry.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("initial cache import failed: {0}")]
    InitialImport(#[source] ImportError),

    #[error("cache mount synchronization failed: {0}")]
    MountSync(String),
}

/// Hook invoked during close to stop cache-mount synchronization.
pub type StopMountSync =
    Box<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<(), ManagerError>> + Send + Sync>;

/// Collaborator that keeps shared cache mount volumes in sync with the
/// service. Starting it returns the stop hook the manager invokes during
/// close.
#[async_trait]
pub trait MountSynchronizer: Send + Sync {
    async fn start(&self, ctx: CancellationToken) -> Result<StopMountSync, ManagerError>;
}

/// The cache manager surface handed to the host engine.
#[async_trait]
pub trait Manager: CacheManager {
    /// Begin synchronizing shared cache mounts, if a synchronizer was
    /// configured.
    async fn start_cache_mount_synchronization(
        &self,
        ctx: CancellationToken,
    ) -> Result<(), ManagerError>;

    /// Begin shutdown and wait for the final export, bounded by `ctx`.
    async fn close(&self, ctx: CancellationToken) -> Result<(), ManagerError>;
}

/// Construct a manager, choosing mode by `service_url`.
///
/// With a service URL this performs the initial synchronous import and
/// starts both loops; any failure on that path fails construction. With an
/// empty URL it returns the degenerate pass-through manager.
pub async fn new_manager(config: ManagerConfig) -> Result<Arc<dyn Manager>, ManagerError> {
    if config.service_url.is_empty() {
        return Ok(degenerate_manager(&config));
    }
    let service: Arc<dyn CacheService> = Arc::new(HttpCacheService::new(&config.service_url)?);
    let transport: Arc<dyn BlobTransport> = Arc::new(ReqwestTransport::new());
    new_manager_with(config, service, transport).await
}

/// [`new_manager`] with injected service and transport implementations.
pub async fn new_manager_with(
    config: ManagerConfig,
    service: Arc<dyn CacheService>,
    transport: Arc<dyn BlobTransport>,
) -> Result<Arc<dyn Manager>, ManagerError> {
    if config.service_url.is_empty() {
        return Ok(degenerate_manager(&config));
    }
    debug!(url = %config.service_url, "using cache service");

    let runtime_config = service
        .get_config(GetConfigRequest {
            engine_id: config.engine_id.clone(),
        })
        .await?;
    let schedule = SyncSchedule::from_wire(&runtime_config)?;

    let local = Arc::new(LocalCacheManager::new(
        "local",
        Arc::clone(&config.key_store),
        Arc::clone(&config.result_store),
    ));
    let layer_provider: Arc<dyn ContentProvider> = Arc::new(LayerProvider::new(
        Arc::clone(&service),
        Arc::clone(&transport),
    ));
    let importer = CacheImporter::new(
        Arc::clone(&service),
        Arc::clone(&config.worker),
        layer_provider,
        Arc::clone(&local) as Arc<dyn CacheManager>,
    );
    let exporter = CacheExporter::new(
        service,
        transport,
        Arc::clone(&config.worker),
        Arc::clone(&config.key_store),
        Arc::clone(&config.result_store),
    );

    // initial synchronous import; refuse to start with a stale view
    let initial = importer.run().await.map_err(ManagerError::InitialImport)?;

    let manager = Arc::new(EngineCacheManager {
        inner: RwLock::new(initial),
        importer,
        exporter,
        start_close: CancellationToken::new(),
        done: CancellationToken::new(),
        synchronizer: config.mount_synchronizer,
        stop_mount_sync: Mutex::new(None),
    });
    manager.spawn_import_loop(schedule.import_period);
    manager.spawn_export_loop(schedule.export_period, schedule.export_timeout);
    info!(
        import_period_secs = schedule.import_period.as_secs(),
        export_period_secs = schedule.export_period.as_secs(),
        "cache manager started"
    );
    Ok(manager)
}

fn degenerate_manager(config: &ManagerConfig) -> Arc<dyn Manager> {
    info!("no cache service configured, using local cache only");
    Arc::new(DefaultCacheManager {
        local: Arc::new(LocalCacheManager::new(
            "local",
            Arc::clone(&config.key_store),
            Arc::clone(&config.result_store),
        )),
    })
}

/// The service-backed manager.
pub struct EngineCacheManager {
    /// Current combined view; swapped atomically by the import loop.
    inner: RwLock<Arc<dyn CacheManager>>,
    importer: CacheImporter,
    exporter: CacheExporter,
    /// Cancelled once to begin shutdown.
    start_close: CancellationToken,
    /// Cancelled when the export loop has performed its final pass.
    done: CancellationToken,
    synchronizer: Option<Arc<dyn MountSynchronizer>>,
    stop_mount_sync: Mutex<Option<StopMountSync>>,
}

impl EngineCacheManager {
    fn spawn_import_loop(self: &Arc<Self>, period: Duration) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let import_parent = manager.start_close.child_token();
            loop {
                tokio::select! {
                    biased;
                    _ = manager.start_close.cancelled() => return,
                    _ = tokio::time::sleep(period) => {}
                }
                let tick = tokio::time::timeout(IMPORT_TICK_TIMEOUT, manager.import_once());
                tokio::select! {
                    biased;
                    _ = import_parent.cancelled() => return,
                    result = tick => match result {
                        Ok(Ok(())) => debug!("cache import complete"),
                        Ok(Err(err)) => error!(error = %err, "failed to import cache"),
                        Err(_) => error!("cache import timed out"),
                    },
                }
            }
        });
    }

    fn spawn_export_loop(self: &Arc<Self>, period: Duration, export_timeout: Duration) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let shutdown = tokio::select! {
                    biased;
                    // always run a final export before shutdown
                    _ = manager.start_close.cancelled() => true,
                    _ = tokio::time::sleep(period) => false,
                };
                // fresh deadline, detached from shutdown, so the final
                // export keeps its full configured budget
                match tokio::time::timeout(export_timeout, manager.exporter.run()).await {
                    Ok(Ok(())) => debug!("cache export complete"),
                    Ok(Err(err)) => error!(error = %err, "failed to export cache"),
                    Err(_) => error!("cache export timed out"),
                }
                if shutdown {
                    manager.done.cancel();
                    return;
                }
            }
        });
    }

    async fn import_once(&self) -> Result<(), ImportError> {
        let view = self.importer.run().await?;
        *self.inner.write().await = view;
        Ok(())
    }
}

#[async_trait]
impl CacheManager for EngineCacheManager {
    fn id(&self) -> &str {
        MANAGER_ID
    }

    async fn query(
        &self,
        deps: &[CacheKeyWithSelector],
        input: u32,
        digest: &Digest,
        output: u32,
    ) -> Result<Vec<CacheKey>, CacheError> {
        let inner = Arc::clone(&*self.inner.read().await);
        inner.query(deps, input, digest, output).await
    }

    async fn records(&self, key: &CacheKey) -> Result<Vec<CacheRecord>, CacheError> {
        let inner = Arc::clone(&*self.inner.read().await);
        inner.records(key).await
    }

    async fn load(&self, record: &CacheRecord) -> Result<Box<dyn CachedResult>, CacheError> {
        let inner = Arc::clone(&*self.inner.read().await);
        inner.load(record).await
    }

    async fn save(
        &self,
        key: &CacheKey,
        result: &dyn CachedResult,
        created_at: DateTime<Utc>,
    ) -> Result<ExportableCacheKey, CacheError> {
        let inner = Arc::clone(&*self.inner.write().await);
        inner.save(key, result, created_at).await
    }
}

#[async_trait]
impl Manager for EngineCacheManager {
    async fn start_cache_mount_synchronization(
        &self,
        ctx: CancellationToken,
    ) -> Result<(), ManagerError> {
        let Some(synchronizer) = &self.synchronizer else {
            return Ok(());
        };
        let stop = synchronizer.start(ctx).await?;
        *self.stop_mount_sync.lock().await = Some(stop);
        Ok(())
    }

    async fn close(&self, ctx: CancellationToken) -> Result<(), ManagerError> {
        self.start_close.cancel();

        let mut result = Ok(());
        if let Some(stop) = self.stop_mount_sync.lock().await.take() {
            result = stop(ctx.clone()).await;
        }

        tokio::select! {
            biased;
            _ = self.done.cancelled() => {}
            _ = ctx.cancelled() => {}
        }
        result
    }
}

/// Pass-through manager used when no service URL is configured.
///
/// Every data-plane call goes straight to the local cache; the lifecycle
/// operations are no-ops.
struct DefaultCacheManager {
    local: Arc<LocalCacheManager>,
}

#[async_trait]
impl CacheManager for DefaultCacheManager {
    fn id(&self) -> &str {
        self.local.id()
    }

    async fn query(
        &self,
        deps: &[CacheKeyWithSelector],
        input: u32,
        digest: &Digest,
        output: u32,
    ) -> Result<Vec<CacheKey>, CacheError> {
        self.local.query(deps, input, digest, output).await
    }

    async fn records(&self, key: &CacheKey) -> Result<Vec<CacheRecord>, CacheError> {
        self.local.records(key).await
    }

    async fn load(&self, record: &CacheRecord) -> Result<Box<dyn CachedResult>, CacheError> {
        self.local.load(record).await
    }

    async fn save(
        &self,
        key: &CacheKey,
        result: &dyn CachedResult,
        created_at: DateTime<Utc>,
    ) -> Result<ExportableCacheKey, CacheError> {
        self.local.save(key, result, created_at).await
    }
}

#[async_trait]
impl Manager for DefaultCacheManager {
    async fn start_cache_mount_synchronization(
        &self,
        _ctx: CancellationToken,
    ) -> Result<(), ManagerError> {
        Ok(())
    }

    async fn close(&self, _ctx: CancellationToken) -> Result<(), ManagerError> {
        Ok(())
    }
}
