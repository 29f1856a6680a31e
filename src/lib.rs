//! BuildCache - distributed build-cache synchronization for build engines.
//!
//! This library sits beneath a container image build engine: it answers the
//! solver's cache lookups, periodically pushes locally-computed results to a
//! remote cache service so peer engines can reuse them, and periodically
//! pulls the remote index so this engine can reuse peers' results.
//!
//! # High-Level API
//!
//! ```ignore
//! use buildcache::config::ManagerConfig;
//! use buildcache::manager::new_manager;
//! use tokio_util::sync::CancellationToken;
//!
//! let manager = new_manager(ManagerConfig {
//!     key_store,
//!     result_store,
//!     worker,
//!     mount_synchronizer: None,
//!     service_url: "https://cache.example.com".to_string(),
//!     engine_id: "engine-1".to_string(),
//! })
//! .await?;
//!
//! // Serve solver lookups from the combined local + imported view
//! let keys = manager.query(&[], 0, &step_digest, 0).await?;
//!
//! // Shut down: one final export runs before the manager stops
//! manager.close(CancellationToken::new()).await?;
//! ```
//!
//! With an empty `service_url` the manager degenerates to a pass-through
//! over the local cache and never touches the network.

pub mod config;
pub mod content;
pub mod export;
pub mod import;
pub mod layer;
pub mod manager;
pub mod service;
pub mod solver;
pub mod transport;
pub mod worker;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::ManagerConfig;
pub use manager::{new_manager, new_manager_with, Manager, ManagerError};
pub use solver::{CacheKey, CacheManager};

/// Version of the buildcache library.
///
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
