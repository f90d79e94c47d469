//! Full divide-and-conquer model: one matcher plus one ranker, keyed by a
//! (transformer, seed) identity.
//!
//! Final label scores combine both stages: the matcher's probability for a
//! cluster gates the ranker's probability for each label inside it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::{ChannelId, Document, Prediction};
use crate::mapping::ClusterMapping;
use crate::matcher::{Matcher, INCORRECT_MATCHER_LABEL};
use crate::metrics::{calculate_mean_average_precision, calculate_summary, Metric};
use crate::ml::DocumentEmbedder;
use crate::ranker::{Ranker, WeightedEvaluation};
use crate::storage::BlobStore;

/// A matcher/ranker pair trained under one (transformer, seed) identity.
pub struct DacModel {
    pub matcher: Matcher,
    pub ranker: Ranker,
    transformer: String,
    seed: u64,
}

impl DacModel {
    /// Identity string used for artifact paths and ensemble channels.
    pub fn model_name(transformer: &str, seed: u64) -> String {
        format!("{transformer}-{seed}")
    }

    /// Local artifact root of one identity for an indexer.
    pub fn model_root(models_path: &Path, indexer: &str, transformer: &str, seed: u64) -> PathBuf {
        models_path.join(indexer).join(Self::model_name(transformer, seed))
    }

    /// Load both stages of one identity, optionally fetching artifacts
    /// from blob stores and attaching a frozen encoder to the ranker.
    #[allow(clippy::too_many_arguments)]
    pub fn load(
        indexers_path: &Path,
        models_path: &Path,
        indexer: &str,
        transformer: &str,
        seed: u64,
        matcher_store: Option<&dyn BlobStore>,
        ranker_store: Option<&dyn BlobStore>,
        embedder: Option<Box<dyn DocumentEmbedder>>,
    ) -> anyhow::Result<Self> {
        let name = Self::model_name(transformer, seed);
        let model_root = Self::model_root(models_path, indexer, transformer, seed);
        let blob_prefix = format!("{indexer}/{name}");

        let mut matcher =
            Matcher::new(indexers_path, indexer, &model_root)?.with_blob_prefix(&blob_prefix);
        matcher.load_artifacts(matcher_store)?;

        let mut ranker =
            Ranker::new(indexers_path, indexer, &model_root)?.with_blob_prefix(&blob_prefix);
        if let Some(embedder) = embedder {
            ranker = ranker.with_embedder(embedder);
        }
        ranker.load_artifacts(ranker_store)?;

        Ok(Self { matcher, ranker, transformer: transformer.to_string(), seed })
    }

    pub fn name(&self) -> String {
        Self::model_name(&self.transformer, self.seed)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn mapping(&self) -> &ClusterMapping {
        self.matcher.mapping()
    }

    /// Run matcher then ranker and merge into final label predictions.
    ///
    /// Probability mode writes `score(label) = matcher(cluster) ×
    /// ranker(label)` for every candidate label (max over clusters when
    /// labels map to several). Hard mode keeps the ranker's positive
    /// labels inside the matcher's argmax cluster, at score 1.0. The
    /// `channel` defaults to [`ChannelId::PredictedProba`] /
    /// [`ChannelId::Predicted`]; ensembling passes a namespaced channel.
    pub fn predict(
        &self,
        docs: &mut [Document],
        channel: Option<ChannelId>,
        return_probabilities: bool,
    ) -> anyhow::Result<()> {
        tracing::info!(model = %self.name(), documents = docs.len(), "predicting");
        self.matcher.predict(docs, return_probabilities)?;
        self.ranker.predict(docs, return_probabilities)?;
        let target = channel.unwrap_or(if return_probabilities {
            ChannelId::PredictedProba
        } else {
            ChannelId::Predicted
        });
        for doc in docs.iter_mut() {
            let merged = if return_probabilities {
                self.merge_probabilities(doc)
            } else {
                self.merge_hard(doc)
            };
            doc.set_predictions(target.clone(), merged);
        }
        Ok(())
    }

    fn merge_probabilities(&self, doc: &Document) -> Vec<Prediction> {
        let matcher_scores: BTreeMap<&str, f64> = doc
            .predictions(&ChannelId::MatcherProba)
            .iter()
            .map(|p| (p.label.as_str(), p.score))
            .collect();
        let mut merged: BTreeMap<String, f64> = BTreeMap::new();
        for prediction in doc.predictions(&ChannelId::RankerProba) {
            if prediction.label == INCORRECT_MATCHER_LABEL {
                continue;
            }
            let Some(clusters) = self.mapping().clusters_of(&prediction.label) else {
                continue;
            };
            for cluster in clusters {
                let gate = matcher_scores.get(cluster.as_str()).copied().unwrap_or(0.0);
                let score = gate * prediction.score;
                let entry = merged.entry(prediction.label.clone()).or_insert(f64::MIN);
                *entry = entry.max(score);
            }
        }
        merged
            .into_iter()
            .map(|(label, score)| Prediction::new(label, score))
            .collect()
    }

    fn merge_hard(&self, doc: &Document) -> Vec<Prediction> {
        let Some(cluster) = doc
            .predictions(&ChannelId::Matcher)
            .first()
            .map(|p| p.label.clone())
        else {
            return Vec::new();
        };
        doc.predictions(&ChannelId::Ranker)
            .iter()
            .filter(|p| p.label != INCORRECT_MATCHER_LABEL)
            .filter(|p| self.mapping().label_in_cluster(&cluster, &p.label))
            .map(|p| Prediction::new(p.label.clone(), 1.0))
            .collect()
    }

    /// Evaluate the combined model against fine-grained gold labels.
    pub fn eval(
        &self,
        docs: &mut [Document],
        metrics: &[Metric],
        first_n_digits: usize,
    ) -> anyhow::Result<BTreeMap<String, f64>> {
        let mut scores = BTreeMap::new();
        if docs.is_empty() {
            return Ok(scores);
        }
        for metric in metrics {
            self.predict(docs, None, metric.needs_probabilities())?;
            match metric {
                Metric::Map => {
                    let map = calculate_mean_average_precision(
                        &*docs,
                        self.mapping().labels(),
                        &ChannelId::PredictedProba,
                    );
                    tracing::info!(model = %self.name(), map, "evaluation");
                    scores.insert("map".to_string(), map);
                }
                Metric::Summary => {
                    let summary = calculate_summary(
                        &*docs,
                        self.mapping().labels(),
                        &ChannelId::Predicted,
                        first_n_digits,
                    );
                    tracing::info!(model = %self.name(), f1 = summary.f1, "evaluation");
                    scores.insert("f1".to_string(), summary.f1);
                    scores.insert("precision".to_string(), summary.precision);
                    scores.insert("recall".to_string(), summary.recall);
                }
            }
        }
        Ok(scores)
    }

    /// The ranker's support-weighted per-cluster breakdown, as consumed by
    /// component analysis.
    pub fn component_scores(
        &self,
        split_types: &[crate::corpus::Split],
        metrics: &[Metric],
    ) -> anyhow::Result<BTreeMap<String, WeightedEvaluation>> {
        self.ranker.eval_weighted(split_types, metrics)
    }
}
