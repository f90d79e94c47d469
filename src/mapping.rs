//! Static label-to-cluster index shared by the matcher and the ranker.
//!
//! The mapping is produced once at indexing time and persisted as
//! `mappings.json` under the indexer directory. Both model stages treat it
//! as read-only: the matcher derives its coarse training targets from it,
//! the ranker uses it to decide which fine labels each cluster may predict.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::PipelineError;

/// Cluster assigned to labels that do not resolve through the mapping.
pub const UNKNOWN_CLUSTER: &str = "unk";

/// Read-only relation from fine-grained label to cluster identifier(s).
#[derive(Debug, Clone)]
pub struct ClusterMapping {
    mapping: BTreeMap<String, Vec<String>>,
    clusters: Vec<String>,
    multi_cluster: bool,
}

impl ClusterMapping {
    /// Load `mappings.json` for an indexer. Missing or malformed artifacts
    /// are fatal: nothing in the pipeline can operate without the mapping.
    pub fn load(indexers_path: &Path, indexer: &str) -> Result<Self, PipelineError> {
        let path = Self::artifact_path(indexers_path, indexer);
        let raw = std::fs::read_to_string(&path)
            .map_err(|_| PipelineError::MissingArtifact(path.clone()))?;
        let mapping: BTreeMap<String, Vec<String>> =
            serde_json::from_str(&raw).map_err(|e| PipelineError::MalformedMapping {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        if mapping.values().any(|clusters| clusters.is_empty()) {
            return Err(PipelineError::MalformedMapping {
                path,
                reason: "label maps to no cluster".to_string(),
            });
        }
        Ok(Self::from_map(mapping))
    }

    /// Build the index from an in-memory relation.
    pub fn from_map(mapping: BTreeMap<String, Vec<String>>) -> Self {
        let mut clusters: Vec<String> = Vec::new();
        for assigned in mapping.values() {
            for cluster in assigned {
                if !clusters.contains(cluster) {
                    clusters.push(cluster.clone());
                }
            }
        }
        clusters.sort();
        let multi_cluster = mapping.values().any(|assigned| assigned.len() > 1);
        Self { mapping, clusters, multi_cluster }
    }

    /// Persist the relation where [`ClusterMapping::load`] expects it.
    pub fn save(&self, indexers_path: &Path, indexer: &str) -> anyhow::Result<()> {
        let path = Self::artifact_path(indexers_path, indexer);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_string_pretty(&self.mapping)?)?;
        Ok(())
    }

    fn artifact_path(indexers_path: &Path, indexer: &str) -> PathBuf {
        indexers_path.join(indexer).join("mappings.json")
    }

    /// Clusters a fine label belongs to; `None` when the label is unmapped
    /// and should be treated as [`UNKNOWN_CLUSTER`].
    pub fn clusters_of(&self, label: &str) -> Option<&[String]> {
        self.mapping.get(label).map(Vec::as_slice)
    }

    pub fn label_in_cluster(&self, cluster: &str, label: &str) -> bool {
        self.clusters_of(label)
            .is_some_and(|assigned| assigned.iter().any(|c| c == cluster))
    }

    /// Fine labels of one cluster, in mapping order.
    pub fn labels_of_cluster(&self, cluster: &str) -> Vec<String> {
        self.mapping
            .iter()
            .filter(|(_, assigned)| assigned.iter().any(|c| c == cluster))
            .map(|(label, _)| label.clone())
            .collect()
    }

    /// The full fine-grained label universe.
    pub fn labels(&self) -> impl Iterator<Item = &String> {
        self.mapping.keys()
    }

    /// Ordered distinct clusters.
    pub fn clusters(&self) -> &[String] {
        &self.clusters
    }

    pub fn multi_cluster(&self) -> bool {
        self.multi_cluster
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> ClusterMapping {
        let mut raw = BTreeMap::new();
        raw.insert("a01.1".to_string(), vec!["a".to_string()]);
        raw.insert("a02.2".to_string(), vec!["a".to_string(), "b".to_string()]);
        raw.insert("b10.0".to_string(), vec!["b".to_string()]);
        ClusterMapping::from_map(raw)
    }

    #[test]
    fn test_clusters_are_ordered_and_distinct() {
        let m = mapping();
        assert_eq!(m.clusters(), ["a".to_string(), "b".to_string()]);
        assert!(m.multi_cluster());
    }

    #[test]
    fn test_label_in_cluster() {
        let m = mapping();
        assert!(m.label_in_cluster("a", "a02.2"));
        assert!(m.label_in_cluster("b", "a02.2"));
        assert!(!m.label_in_cluster("b", "a01.1"));
        assert!(!m.label_in_cluster("a", "never-indexed"));
    }

    #[test]
    fn test_unmapped_label_resolves_to_none() {
        assert!(mapping().clusters_of("z99.9").is_none());
    }

    #[test]
    fn test_round_trip_through_indexer_dir() {
        let dir = tempfile::tempdir().unwrap();
        let m = mapping();
        m.save(dir.path(), "test-indexer").unwrap();
        let reloaded = ClusterMapping::load(dir.path(), "test-indexer").unwrap();
        assert_eq!(reloaded.clusters(), m.clusters());
        assert_eq!(reloaded.labels_of_cluster("a"), m.labels_of_cluster("a"));
    }

    #[test]
    fn test_missing_artifact_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = ClusterMapping::load(dir.path(), "nope").unwrap_err();
        assert!(matches!(err, PipelineError::MissingArtifact(_)));
    }
}
