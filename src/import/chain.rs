//! Translation of the remote index into cache chains.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::content::{
    ContentProvider, Descriptor, Digest, ANNOTATION_CREATED_AT, ANNOTATION_UNCOMPRESSED,
};
use crate::service::types::{CacheConfig, CacheLayer};
use crate::service::ServiceError;
use crate::solver::{CacheInfoLink, CacheResult};
use crate::worker::Remote;

/// Import pipeline errors. Fatal to the current attempt only.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("missing annotations for layer {0}")]
    MissingAnnotations(Digest),

    #[error("missing diffID for layer {0}")]
    MissingDiffId(Digest),

    #[error("invalid cache config: {0}")]
    InvalidConfig(String),
}

/// A descriptor paired with the provider that can fetch its bytes.
#[derive(Clone)]
pub struct DescriptorProviderPair {
    pub descriptor: Descriptor,
    pub provider: Arc<dyn ContentProvider>,
}

/// The parsed record graph: one entry per remote cache key, with dependency
/// edges and layer-chain results attached.
#[derive(Default)]
pub struct CacheChains {
    pub records: Vec<ChainRecord>,
}

pub struct ChainRecord {
    pub id: String,
    /// Dependency edges: (dependency key id, link metadata).
    pub links: Vec<(String, CacheInfoLink)>,
    pub results: Vec<ChainResult>,
}

pub struct ChainResult {
    pub result: CacheResult,
    pub remote: Remote,
}

/// Translate one advertised layer into a descriptor/provider pair.
///
/// The diff-id is mandatory; a non-zero creation time is carried along as an
/// annotation so the worker can backdate the unpacked snapshot.
pub fn descriptor_provider_pair(
    layer: &CacheLayer,
    provider: Arc<dyn ContentProvider>,
) -> Result<DescriptorProviderPair, ImportError> {
    let annotations = layer
        .annotations
        .as_ref()
        .ok_or_else(|| ImportError::MissingAnnotations(layer.blob.clone()))?;
    if annotations.diff_id.is_empty() {
        return Err(ImportError::MissingDiffId(layer.blob.clone()));
    }

    let mut descriptor_annotations = HashMap::new();
    descriptor_annotations.insert(
        ANNOTATION_UNCOMPRESSED.to_string(),
        annotations.diff_id.to_string(),
    );
    if let Some(created_at) = annotations.created_at {
        descriptor_annotations.insert(ANNOTATION_CREATED_AT.to_string(), created_at.to_rfc3339());
    }

    Ok(DescriptorProviderPair {
        descriptor: Descriptor {
            media_type: annotations.media_type.clone(),
            digest: layer.blob.clone(),
            size: annotations.size,
            annotations: descriptor_annotations,
        },
        provider,
    })
}

/// Parse the remote index into [`CacheChains`].
///
/// Layer references are resolved into full parent chains (base layer first);
/// a dangling index or a parent cycle fails the whole parse.
pub fn parse_config(
    config: &CacheConfig,
    providers: &HashMap<Digest, DescriptorProviderPair>,
) -> Result<CacheChains, ImportError> {
    let mut chains = CacheChains::default();

    for record in &config.records {
        if record.id.is_empty() {
            return Err(ImportError::InvalidConfig("record with empty id".to_string()));
        }

        let links = record
            .inputs
            .iter()
            .map(|link| {
                (
                    link.linked_id.clone(),
                    CacheInfoLink {
                        input: link.input,
                        digest: link.digest.clone(),
                        selector: link.selector.clone().unwrap_or_default(),
                    },
                )
            })
            .collect();

        let mut results = Vec::with_capacity(record.results.len());
        for (index, result) in record.results.iter().enumerate() {
            let descriptors = layer_chain(config, result.layer_index)?
                .into_iter()
                .map(|layer_index| {
                    let blob = &config.layers[layer_index].blob;
                    providers
                        .get(blob)
                        .map(|pair| pair.descriptor.clone())
                        .ok_or_else(|| {
                            ImportError::InvalidConfig(format!("no provider for layer {blob}"))
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;

            let provider = providers
                .get(&config.layers[result.layer_index].blob)
                .map(|pair| Arc::clone(&pair.provider))
                .ok_or_else(|| {
                    ImportError::InvalidConfig(format!(
                        "no provider for layer {}",
                        config.layers[result.layer_index].blob
                    ))
                })?;

            results.push(ChainResult {
                result: CacheResult {
                    id: format!("{}#{}", record.id, index),
                    created_at: result.created_at,
                },
                remote: Remote {
                    descriptors,
                    provider,
                },
            });
        }

        chains.records.push(ChainRecord {
            id: record.id.clone(),
            links,
            results,
        });
    }

    Ok(chains)
}

/// Resolve a layer index into its full parent chain, base layer first.
fn layer_chain(config: &CacheConfig, layer_index: usize) -> Result<Vec<usize>, ImportError> {
    let mut chain = Vec::new();
    let mut current = Some(layer_index);
    while let Some(index) = current {
        if index >= config.layers.len() {
            return Err(ImportError::InvalidConfig(format!(
                "layer index {index} out of range"
            )));
        }
        if chain.contains(&index) {
            return Err(ImportError::InvalidConfig(format!(
                "layer parent cycle at index {index}"
            )));
        }
        chain.push(index);
        current = config.layers[index].parent_index;
    }
    chain.reverse();
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    use crate::service::types::{CacheRecordConfig, LayerAnnotations, RecordResultConfig};
    use crate::testutil::{expect_err, MemoryBlobProvider};

    fn layer(blob: &str, parent_index: Option<usize>) -> CacheLayer {
        CacheLayer {
            blob: Digest::new(blob),
            parent_index,
            annotations: Some(LayerAnnotations {
                media_type: "application/vnd.oci.image.layer.v1.tar+zstd".to_string(),
                size: 100,
                diff_id: Digest::new(format!("{blob}-diff")),
                created_at: None,
            }),
        }
    }

    fn provider() -> Arc<dyn ContentProvider> {
        MemoryBlobProvider::new() as Arc<dyn ContentProvider>
    }

    fn providers_for(layers: &[CacheLayer]) -> HashMap<Digest, DescriptorProviderPair> {
        let provider = provider();
        layers
            .iter()
            .map(|layer| {
                (
                    layer.blob.clone(),
                    descriptor_provider_pair(layer, Arc::clone(&provider)).unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn pair_requires_annotations() {
        let bare = CacheLayer {
            blob: Digest::new("sha256:l1"),
            parent_index: None,
            annotations: None,
        };
        let err = expect_err(descriptor_provider_pair(&bare, provider()));
        assert!(matches!(err, ImportError::MissingAnnotations(_)));
    }

    #[test]
    fn pair_requires_diff_id() {
        let mut layer = layer("sha256:l1", None);
        layer.annotations.as_mut().unwrap().diff_id = Digest::new("");
        let err = expect_err(descriptor_provider_pair(&layer, provider()));
        assert!(matches!(err, ImportError::MissingDiffId(_)));
    }

    #[test]
    fn pair_copies_annotations() {
        let mut layer_with_created = layer("sha256:l1", None);
        let created = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        layer_with_created.annotations.as_mut().unwrap().created_at = Some(created);

        let pair = descriptor_provider_pair(&layer_with_created, provider()).unwrap();
        assert_eq!(pair.descriptor.digest, Digest::new("sha256:l1"));
        assert_eq!(pair.descriptor.size, 100);
        assert_eq!(
            pair.descriptor.annotations[ANNOTATION_UNCOMPRESSED],
            "sha256:l1-diff"
        );
        assert_eq!(
            pair.descriptor.annotations[ANNOTATION_CREATED_AT],
            created.to_rfc3339()
        );

        // without a creation time the annotation is absent
        let pair = descriptor_provider_pair(&layer("sha256:l2", None), provider()).unwrap();
        assert!(!pair.descriptor.annotations.contains_key(ANNOTATION_CREATED_AT));
    }

    #[test]
    fn parse_resolves_layer_chains_base_first() {
        let layers = vec![layer("sha256:base", None), layer("sha256:top", Some(0))];
        let config = CacheConfig {
            layers: layers.clone(),
            records: vec![CacheRecordConfig {
                id: "k1".to_string(),
                inputs: Vec::new(),
                results: vec![RecordResultConfig {
                    layer_index: 1,
                    created_at: Utc::now(),
                }],
            }],
        };

        let chains = parse_config(&config, &providers_for(&layers)).unwrap();
        assert_eq!(chains.records.len(), 1);
        let remote = &chains.records[0].results[0].remote;
        assert_eq!(remote.descriptors.len(), 2);
        assert_eq!(remote.descriptors[0].digest, Digest::new("sha256:base"));
        assert_eq!(remote.descriptors[1].digest, Digest::new("sha256:top"));
    }

    #[test]
    fn parse_rejects_dangling_layer_index() {
        let layers = vec![layer("sha256:base", None)];
        let config = CacheConfig {
            layers: layers.clone(),
            records: vec![CacheRecordConfig {
                id: "k1".to_string(),
                inputs: Vec::new(),
                results: vec![RecordResultConfig {
                    layer_index: 5,
                    created_at: Utc::now(),
                }],
            }],
        };
        let err = expect_err(parse_config(&config, &providers_for(&layers)));
        assert!(matches!(err, ImportError::InvalidConfig(_)));
    }

    #[test]
    fn parse_rejects_parent_cycles() {
        let mut first = layer("sha256:a", Some(1));
        let second = layer("sha256:b", Some(0));
        first.parent_index = Some(1);
        let layers = vec![first, second];
        let config = CacheConfig {
            layers: layers.clone(),
            records: vec![CacheRecordConfig {
                id: "k1".to_string(),
                inputs: Vec::new(),
                results: vec![RecordResultConfig {
                    layer_index: 0,
                    created_at: Utc::now(),
                }],
            }],
        };
        let err = expect_err(parse_config(&config, &providers_for(&layers)));
        assert!(matches!(err, ImportError::InvalidConfig(_)));
    }
}
