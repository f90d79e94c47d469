//! Per-cluster fine-grained classifiers, the second stage of the pipeline.
//!
//! Each cluster owns an independent sub-model: a label binarizer fixing the
//! labels it may predict, a tf-idf vectorizer fitted on its own training
//! texts, and a one-vs-rest boosted classifier. Clusters that never saw a
//! training text stay [`ModelState::Untrained`] and predict nothing rather
//! than failing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::core::{ChannelId, Document, PipelineError, Prediction};
use crate::corpus::{read_augmentation_corpora, read_corpus, Augmentation, Corpus, Split};
use crate::mapping::ClusterMapping;
use crate::matcher::INCORRECT_MATCHER_LABEL;
use crate::metrics::{average_precision_binary, Metric};
use crate::ml::{
    embed_chunked, DocumentEmbedder, GbdtParams, MultiLabelBinarizer, OneVsRestClassifier,
    TfidfVectorizer, EMBEDDING_CHUNK_SIZE,
};
use crate::storage::{download_with_retry, upload_with_retry, BlobStore, RetryPolicy};

/// Training configuration for the ranker.
#[derive(Debug, Clone)]
pub struct RankerTrainConfig {
    /// Splits folded into each cluster's training set.
    pub split_types: Vec<Split>,
    pub augmentation: Vec<Augmentation>,
    /// Merge the matcher's misrouted texts as hard negatives (train-only).
    pub use_incorrect_matcher_predictions: bool,
    /// Cap on training sentences per cluster; 0 disables the cap.
    pub subset: usize,
    pub gbdt: GbdtParams,
}

impl Default for RankerTrainConfig {
    fn default() -> Self {
        Self {
            split_types: vec![Split::Train, Split::Dev],
            augmentation: vec![
                Augmentation::NerMention,
                Augmentation::NerSentence,
                Augmentation::NerStripped,
                Augmentation::DescriptionsLabels,
            ],
            use_incorrect_matcher_predictions: false,
            subset: 0,
            gbdt: GbdtParams::default(),
        }
    }
}

/// Fitted state of one cluster's sub-model.
pub enum ModelState {
    Trained {
        vectorizer: TfidfVectorizer,
        classifier: OneVsRestClassifier,
    },
    /// The cluster had no training texts; prediction yields all-zero.
    Untrained,
}

/// One cluster's sub-model: the binarizer always exists (it is derived
/// from the mapping), the vectorizer and classifier only after training.
pub struct ClusterModel {
    binarizer: MultiLabelBinarizer,
    state: ModelState,
}

impl ClusterModel {
    pub fn classes(&self) -> &[String] {
        self.binarizer.classes()
    }

    pub fn is_trained(&self) -> bool {
        matches!(self.state, ModelState::Trained { .. })
    }
}

/// Per-cluster score with the number of evaluation texts behind it.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ClusterScore {
    pub score: f64,
    pub support: usize,
}

/// Outcome of [`Ranker::eval_weighted`] for one metric.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WeightedEvaluation {
    pub per_cluster: BTreeMap<String, ClusterScore>,
    /// Σ(score·support) / Σ(support) over evaluated clusters.
    pub weighted: f64,
}

/// Second-stage model: one independent classifier per cluster.
pub struct Ranker {
    indexers_path: PathBuf,
    indexer: String,
    model_root: PathBuf,
    blob_prefix: String,
    mapping: ClusterMapping,
    models: BTreeMap<String, ClusterModel>,
    embedder: Option<Box<dyn DocumentEmbedder>>,
}

impl Ranker {
    pub fn new(indexers_path: &Path, indexer: &str, model_root: &Path) -> anyhow::Result<Self> {
        let mapping = ClusterMapping::load(indexers_path, indexer)?;
        std::fs::create_dir_all(model_root.join("ranker"))?;
        Ok(Self {
            indexers_path: indexers_path.to_path_buf(),
            indexer: indexer.to_string(),
            model_root: model_root.to_path_buf(),
            blob_prefix: indexer.to_string(),
            mapping,
            models: BTreeMap::new(),
            embedder: None,
        })
    }

    /// Concatenate dense embeddings from a frozen encoder to the tf-idf
    /// features. A ranker trained with an embedder must be reloaded with
    /// the same embedder configuration; the classifier's feature width
    /// check rejects anything else.
    pub fn with_embedder(mut self, embedder: Box<dyn DocumentEmbedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Override the blob key prefix (defaults to the indexer name).
    pub fn with_blob_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.blob_prefix = prefix.into();
        self
    }

    /// Load every cluster's persisted triple. Missing classifier/tfidf
    /// files yield [`ModelState::Untrained`]; a missing binarizer is an
    /// error since it is always written.
    pub fn load(
        indexers_path: &Path,
        indexer: &str,
        model_root: &Path,
        store: Option<&dyn BlobStore>,
    ) -> anyhow::Result<Self> {
        let mut ranker = Self::new(indexers_path, indexer, model_root)?;
        ranker.load_artifacts(store)?;
        Ok(ranker)
    }

    /// Read every cluster's persisted triple from the local layout, after
    /// an optional blob download.
    pub fn load_artifacts(&mut self, store: Option<&dyn BlobStore>) -> anyhow::Result<()> {
        for cluster in self.mapping.clusters().to_vec() {
            if let Some(store) = store {
                self.download_cluster(store, &cluster)?;
            }
            let binarizer_path = self.cluster_file("label_binarizer", &cluster);
            let raw = std::fs::read_to_string(&binarizer_path)
                .map_err(|_| PipelineError::MissingArtifact(binarizer_path.clone()))?;
            let binarizer: MultiLabelBinarizer = serde_json::from_str(&raw)
                .with_context(|| format!("decoding binarizer for cluster {cluster}"))?;

            let classifier_path = self.cluster_file("classifier", &cluster);
            let tfidf_path = self.cluster_file("tfidf", &cluster);
            let state = if classifier_path.is_file() && tfidf_path.is_file() {
                let classifier: OneVsRestClassifier =
                    serde_json::from_str(&std::fs::read_to_string(&classifier_path)?)
                        .with_context(|| format!("decoding classifier for cluster {cluster}"))?;
                let vectorizer: TfidfVectorizer =
                    serde_json::from_str(&std::fs::read_to_string(&tfidf_path)?)
                        .with_context(|| format!("decoding vectorizer for cluster {cluster}"))?;
                ModelState::Trained { vectorizer, classifier }
            } else {
                ModelState::Untrained
            };
            self.models.insert(cluster, ClusterModel { binarizer, state });
        }
        Ok(())
    }

    fn download_cluster(&self, store: &dyn BlobStore, cluster: &str) -> anyhow::Result<()> {
        download_with_retry(
            store,
            &self.cluster_key("label_binarizer", cluster),
            &self.cluster_file("label_binarizer", cluster),
            RetryPolicy::default(),
        )?;
        // Classifier and vectorizer legitimately may not exist remotely for
        // clusters without training data; only absent blobs skip the retry
        // path, transient failures still get the full backoff.
        for kind in ["classifier", "tfidf"] {
            let key = self.cluster_key(kind, cluster);
            if store.exists(&key)? {
                download_with_retry(
                    store,
                    &key,
                    &self.cluster_file(kind, cluster),
                    RetryPolicy::default(),
                )?;
            } else {
                tracing::debug!(cluster, kind, "cluster artifact not in blob store");
            }
        }
        Ok(())
    }

    fn cluster_file(&self, kind: &str, cluster: &str) -> PathBuf {
        self.model_root.join("ranker").join(format!("{kind}_{cluster}.json"))
    }

    fn cluster_key(&self, kind: &str, cluster: &str) -> String {
        format!("{}/ranker/{kind}_{cluster}.json", self.blob_prefix)
    }

    pub fn mapping(&self) -> &ClusterMapping {
        &self.mapping
    }

    pub fn cluster_model(&self, cluster: &str) -> Option<&ClusterModel> {
        self.models.get(cluster)
    }

    /// Assemble a cluster's sentences from its own corpus splits, the
    /// matcher's hard negatives (train-only) and augmentation corpora.
    fn read_sentences(
        &self,
        cluster: &str,
        split_types: &[Split],
        augmentation: &[Augmentation],
        use_incorrect_matcher_predictions: bool,
        subset: usize,
    ) -> anyhow::Result<Vec<Document>> {
        let name = format!("ranker_{cluster}");
        let corpus = read_corpus(&self.indexers_path.join(&self.indexer).join("ranker"), &name, false)?;
        let mut corpora = vec![corpus];
        let incorrect_dir = self.model_root.join("incorrect-matcher");
        if use_incorrect_matcher_predictions && incorrect_dir.exists() {
            corpora.push(read_corpus(&incorrect_dir, &format!("incorrect_{cluster}"), true)?);
        }
        corpora.extend(read_augmentation_corpora(
            augmentation,
            &self.indexers_path,
            &self.indexer,
            &name,
        )?);
        let merged = Corpus::merge(corpora);
        let mut sentences = Vec::new();
        for split in split_types {
            sentences.extend_from_slice(merged.split(*split));
        }
        if subset > 0 && sentences.len() > subset {
            sentences.truncate(subset);
        }
        Ok(sentences)
    }

    /// Feature rows for a cluster: tf-idf, plus dense embeddings when an
    /// encoder is configured. Always reuses the fitted vectorizer.
    fn features(
        &self,
        vectorizer: &TfidfVectorizer,
        texts: &[&str],
    ) -> anyhow::Result<Vec<Vec<f32>>> {
        let mut rows = vectorizer.transform(texts);
        if let Some(embedder) = &self.embedder {
            let dense = embed_chunked(embedder.as_ref(), texts, EMBEDDING_CHUNK_SIZE)?;
            for (row, embedding) in rows.iter_mut().zip(dense) {
                row.extend(embedding);
            }
        }
        Ok(rows)
    }

    /// Train one sub-model per cluster and persist the whole set.
    pub fn train(
        &mut self,
        config: &RankerTrainConfig,
        store: Option<&dyn BlobStore>,
    ) -> anyhow::Result<()> {
        let clusters = self.mapping.clusters().to_vec();
        for (i, cluster) in clusters.iter().enumerate() {
            tracing::info!(cluster, progress = format!("{}/{}", i + 1, clusters.len()), "training ranker cluster");
            let mut labels = self.mapping.labels_of_cluster(cluster);
            labels.push(INCORRECT_MATCHER_LABEL.to_string());
            let binarizer = MultiLabelBinarizer::fit(labels);

            let sentences = self.read_sentences(
                cluster,
                &config.split_types,
                &config.augmentation,
                config.use_incorrect_matcher_predictions,
                config.subset,
            )?;
            if sentences.is_empty() {
                tracing::info!(cluster, "cluster has no sentences");
                self.models
                    .insert(cluster.clone(), ClusterModel { binarizer, state: ModelState::Untrained });
                continue;
            }

            // The vectorizer sees train+dev plus augmentation, matching
            // the texts the classifier can be fitted on.
            let vectorizer_sentences =
                self.read_sentences(cluster, &[Split::Train, Split::Dev], &config.augmentation, false, 0)?;
            let vectorizer =
                TfidfVectorizer::fit(vectorizer_sentences.iter().map(|d| d.text()));

            let texts: Vec<&str> = sentences.iter().map(|d| d.text()).collect();
            let features = self.features(&vectorizer, &texts)?;
            let label_sets: Vec<Vec<String>> =
                sentences.iter().map(|d| d.gold_labels().to_vec()).collect();
            let label_matrix = binarizer.transform(&label_sets);
            let classifier = OneVsRestClassifier::fit(&features, &label_matrix, &config.gbdt);
            self.models.insert(
                cluster.clone(),
                ClusterModel { binarizer, state: ModelState::Trained { vectorizer, classifier } },
            );
        }
        tracing::info!("ranker training complete");
        self.save()?;
        if let Some(store) = store {
            self.upload(store)?;
        }
        Ok(())
    }

    /// Annotate documents with fine-label predictions, accumulating across
    /// clusters on a shared channel. Probability mode writes every class
    /// score under [`ChannelId::RankerProba`]; hard mode writes positive
    /// labels with score 1.0 under [`ChannelId::Ranker`]. Untrained
    /// clusters contribute 0.0 for each of their classes.
    pub fn predict(&self, docs: &mut [Document], return_probabilities: bool) -> anyhow::Result<()> {
        tracing::debug!(documents = docs.len(), return_probabilities, "predicting ranker");
        for doc in docs.iter_mut() {
            doc.clear_channel(&ChannelId::Ranker);
            doc.clear_channel(&ChannelId::RankerProba);
        }
        // Owned copies, so the documents stay mutable while every cluster
        // reuses the same text batch.
        let texts: Vec<String> = docs.iter().map(|d| d.text().to_string()).collect();
        let texts: Vec<&str> = texts.iter().map(String::as_str).collect();
        for (cluster, model) in &self.models {
            tracing::debug!(cluster, "ranking");
            match &model.state {
                ModelState::Untrained => {
                    for doc in docs.iter_mut() {
                        for class in model.classes() {
                            doc.add_prediction(
                                ChannelId::RankerProba,
                                Prediction::new(class.clone(), 0.0),
                            );
                        }
                    }
                }
                ModelState::Trained { vectorizer, classifier } => {
                    let features = self.features(vectorizer, &texts)?;
                    if return_probabilities {
                        let scores = classifier.predict_proba(&features)?;
                        for (doc, row) in docs.iter_mut().zip(scores) {
                            for (class, &score) in model.classes().iter().zip(&row) {
                                doc.add_prediction(
                                    ChannelId::RankerProba,
                                    Prediction::new(class.clone(), score as f64),
                                );
                            }
                        }
                    } else {
                        let decisions = classifier.predict(&features)?;
                        for (doc, row) in docs.iter_mut().zip(decisions) {
                            for (class, &decision) in model.classes().iter().zip(&row) {
                                if decision > 0.0 {
                                    doc.add_prediction(
                                        ChannelId::Ranker,
                                        Prediction::new(class.clone(), 1.0),
                                    );
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Per-cluster evaluation aggregated by support.
    ///
    /// The requested splits are pooled into one evaluation set per
    /// cluster. The score is MAP (mean per-text average precision) or
    /// micro-F1 over that set; support is the number of evaluation texts
    /// the cluster saw, regardless of whether it has a classifier.
    /// Clusters without evaluation texts are skipped; untrained clusters
    /// evaluate against all-zero predictions.
    pub fn eval_weighted(
        &self,
        split_types: &[Split],
        metrics: &[Metric],
    ) -> anyhow::Result<BTreeMap<String, WeightedEvaluation>> {
        let mut results = BTreeMap::new();
        for metric in metrics {
            tracing::info!(metric = metric.as_str(), ?split_types, "weighted ranker evaluation");
            let mut per_cluster: BTreeMap<String, ClusterScore> = BTreeMap::new();
            for cluster in self.mapping.clusters() {
                let sentences = self.read_sentences(cluster, split_types, &[], false, 0)?;
                if sentences.is_empty() {
                    continue;
                }
                let Some(model) = self.models.get(cluster) else {
                    continue;
                };
                let label_sets: Vec<Vec<String>> =
                    sentences.iter().map(|d| d.gold_labels().to_vec()).collect();
                let truth = model.binarizer.transform(&label_sets);
                let texts: Vec<&str> = sentences.iter().map(|d| d.text()).collect();
                let predictions = match (&model.state, metric) {
                    (ModelState::Untrained, _) => {
                        vec![vec![0.0; model.classes().len()]; sentences.len()]
                    }
                    (ModelState::Trained { vectorizer, classifier }, Metric::Map) => {
                        classifier.predict_proba(&self.features(vectorizer, &texts)?)?
                    }
                    (ModelState::Trained { vectorizer, classifier }, Metric::Summary) => {
                        classifier.predict(&self.features(vectorizer, &texts)?)?
                    }
                };
                let score = match metric {
                    Metric::Map => {
                        let aps: Vec<f64> = truth
                            .iter()
                            .zip(&predictions)
                            .filter_map(|(y, p)| average_precision_binary(y, p))
                            .collect();
                        if aps.is_empty() {
                            0.0
                        } else {
                            aps.iter().sum::<f64>() / aps.len() as f64
                        }
                    }
                    Metric::Summary => micro_f1(&truth, &predictions),
                };
                // Support is the number of evaluation texts, independent
                // of classifier presence.
                per_cluster.insert(cluster.clone(), ClusterScore { score, support: sentences.len() });
            }
            let total_support: usize = per_cluster.values().map(|c| c.support).sum();
            let weighted = if total_support == 0 {
                0.0
            } else {
                per_cluster
                    .values()
                    .map(|c| c.score * c.support as f64)
                    .sum::<f64>()
                    / total_support as f64
            };
            tracing::info!(metric = metric.as_str(), weighted, "weighted ranker evaluation done");
            results.insert(metric.as_str().to_string(), WeightedEvaluation { per_cluster, weighted });
        }
        Ok(results)
    }

    /// Persist every cluster's triple. Untrained clusters only write their
    /// binarizer; absent classifier/tfidf files mark them untrained.
    pub fn save(&self) -> anyhow::Result<()> {
        tracing::info!("saving ranker");
        for (cluster, model) in &self.models {
            write_json(&self.cluster_file("label_binarizer", cluster), &model.binarizer)?;
            if let ModelState::Trained { vectorizer, classifier } = &model.state {
                write_json(&self.cluster_file("classifier", cluster), classifier)?;
                write_json(&self.cluster_file("tfidf", cluster), vectorizer)?;
            }
        }
        Ok(())
    }

    pub fn upload(&self, store: &dyn BlobStore) -> anyhow::Result<()> {
        for (cluster, model) in &self.models {
            upload_with_retry(
                store,
                &self.cluster_file("label_binarizer", cluster),
                &self.cluster_key("label_binarizer", cluster),
                RetryPolicy::default(),
            )?;
            if model.is_trained() {
                for kind in ["classifier", "tfidf"] {
                    upload_with_retry(
                        store,
                        &self.cluster_file(kind, cluster),
                        &self.cluster_key(kind, cluster),
                        RetryPolicy::default(),
                    )?;
                }
            }
        }
        Ok(())
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string(value)?)
        .with_context(|| format!("writing artifact {}", path.display()))?;
    Ok(())
}

fn micro_f1(truth: &[Vec<f32>], predictions: &[Vec<f32>]) -> f64 {
    let mut true_positives = 0usize;
    let mut false_positives = 0usize;
    let mut false_negatives = 0usize;
    for (truth_row, prediction_row) in truth.iter().zip(predictions) {
        for (&t, &p) in truth_row.iter().zip(prediction_row) {
            match (t > 0.0, p > 0.0) {
                (true, true) => true_positives += 1,
                (false, true) => false_positives += 1,
                (true, false) => false_negatives += 1,
                (false, false) => {}
            }
        }
    }
    let denominator = 2 * true_positives + false_positives + false_negatives;
    if denominator == 0 {
        0.0
    } else {
        2.0 * true_positives as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use super::micro_f1;

    #[test]
    fn test_micro_f1_counts_elementwise() {
        let truth = vec![vec![1.0, 0.0, 1.0], vec![0.0, 1.0, 0.0]];
        let predictions = vec![vec![1.0, 1.0, 0.0], vec![0.0, 1.0, 0.0]];
        // tp = 2, fp = 1, fn = 1 -> f1 = 2*2 / (4+1+1)
        assert!((micro_f1(&truth, &predictions) - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_micro_f1_empty_is_zero() {
        assert_eq!(micro_f1(&[], &[]), 0.0);
    }
}
