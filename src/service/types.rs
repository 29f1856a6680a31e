//! Wire types for the remote cache service.
//!
//! Field names follow the service's JSON schema; keep the `rename`
//! attributes in sync with it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content::{Descriptor, Digest};

/// Request for the per-engine synchronization schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetConfigRequest {
    #[serde(rename = "engineID")]
    pub engine_id: String,
}

/// The remote-configured synchronization schedule, in seconds.
///
/// All three values must be strictly positive; validation happens in
/// [`crate::config::SyncSchedule`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(rename = "importPeriodSeconds")]
    pub import_period_seconds: u64,
    #[serde(rename = "exportPeriodSeconds")]
    pub export_period_seconds: u64,
    #[serde(rename = "exportTimeoutSeconds")]
    pub export_timeout_seconds: u64,
}

/// Annotations the service stores for each layer blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerAnnotations {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub size: u64,
    #[serde(rename = "diffID")]
    pub diff_id: Digest,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A layer advertised by the remote index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheLayer {
    pub blob: Digest,
    /// Index of the parent layer in the same config, for chained results.
    #[serde(rename = "parentIndex", default, skip_serializing_if = "Option::is_none")]
    pub parent_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<LayerAnnotations>,
}

/// One dependency edge of a record in the remote index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    #[serde(rename = "linkedID")]
    pub linked_id: String,
    pub input: u32,
    pub digest: Digest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

/// A result attached to a record in the remote index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordResultConfig {
    #[serde(rename = "layerIndex")]
    pub layer_index: usize,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// A cache key record in the remote index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRecordConfig {
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<LinkConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<RecordResultConfig>,
}

/// The remote index served on import.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layers: Vec<CacheLayer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<CacheRecordConfig>,
}

/// A result of a cache key, as announced to the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEntry {
    pub id: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// A cache key as announced to the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheKey {
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<ResultEntry>,
}

/// A dependency edge as announced to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub id: String,
    #[serde(rename = "linkedID")]
    pub linked_id: String,
    pub input: u32,
    pub digest: Digest,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub selector: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateCacheRecordsRequest {
    #[serde(rename = "cacheKeys", default)]
    pub cache_keys: Vec<CacheKey>,
    #[serde(default)]
    pub links: Vec<Link>,
}

/// A record the service wants uploaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "cacheRefID")]
    pub cache_ref_id: String,
    pub digest: Digest,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateCacheRecordsResponse {
    #[serde(rename = "exportRecords", default)]
    pub export_records: Vec<Record>,
}

/// Layers pushed for one record, reported back after upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordLayers {
    #[serde(rename = "recordDigest")]
    pub record_digest: Digest,
    pub layers: Vec<Descriptor>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateCacheLayersRequest {
    #[serde(rename = "updatedRecords", default)]
    pub updated_records: Vec<RecordLayers>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetLayerUploadURLRequest {
    pub digest: Digest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetLayerDownloadURLRequest {
    pub digest: Digest,
}

/// A single-use signed URL for a layer blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerURLResponse {
    pub url: String,
}
