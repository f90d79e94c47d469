//! Coarse cluster classifier, the first stage of the pipeline.
//!
//! The matcher is trained on the cluster-labeled `matcher` corpus (targets
//! are cluster ids, not fine codes) and routes each text to its candidate
//! cluster(s). Its misrouted dev texts feed back into ranker training as
//! hard negatives.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::Context;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::core::{ChannelId, Document, PipelineError, Prediction};
use crate::corpus::{
    read_augmentation_corpora, read_corpus, write_fasttext_file, Augmentation, Corpus,
};
use crate::mapping::{ClusterMapping, UNKNOWN_CLUSTER};
use crate::metrics::{calculate_mean_average_precision, calculate_summary, Metric};
use crate::ml::{GbdtParams, MultiLabelBinarizer, OneVsRestClassifier, TfidfVectorizer};
use crate::storage::{download_with_retry, upload_with_retry, BlobStore, RetryPolicy};

/// Synthetic label attached to hard-negative augmentation examples.
pub const INCORRECT_MATCHER_LABEL: &str = "incorrect-matcher";

/// Training configuration for the matcher.
#[derive(Debug, Clone)]
pub struct MatcherTrainConfig {
    pub augmentation: Vec<Augmentation>,
    pub gbdt: GbdtParams,
    /// Fraction of training documents to keep; 0.0 disables downsampling.
    pub downsample: f64,
    /// Fold the dev split into training, as the original pipeline does.
    pub train_with_dev: bool,
    pub seed: u64,
}

impl Default for MatcherTrainConfig {
    fn default() -> Self {
        Self {
            augmentation: vec![Augmentation::NerSentence, Augmentation::DescriptionsLabels],
            gbdt: GbdtParams::default(),
            downsample: 0.0,
            train_with_dev: true,
            seed: 42,
        }
    }
}

/// Multi-class text classifier over a fixed class set: tf-idf features fed
/// into one-vs-rest boosted stumps. Serves as the matcher's underlying
/// classifier artifact (`matcher/final-model.json`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BoostedTextClassifier {
    classes: Vec<String>,
    vectorizer: TfidfVectorizer,
    classifier: OneVsRestClassifier,
}

impl BoostedTextClassifier {
    pub fn fit(texts: &[&str], label_sets: &[Vec<String>], params: &GbdtParams) -> Self {
        let binarizer = MultiLabelBinarizer::fit(label_sets.iter().flatten().cloned());
        let vectorizer = TfidfVectorizer::fit(texts.iter().copied());
        let features = vectorizer.transform(texts);
        let label_matrix = binarizer.transform(label_sets);
        let classifier = OneVsRestClassifier::fit(&features, &label_matrix, params);
        Self { classes: binarizer.classes().to_vec(), vectorizer, classifier }
    }

    /// Per-text scores over all classes, aligned with [`Self::classes`].
    pub fn predict_proba(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, PipelineError> {
        let features = self.vectorizer.transform(texts);
        self.classifier.predict_proba(&features)
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string(self)?)
            .with_context(|| format!("saving classifier to {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|_| PipelineError::MissingArtifact(path.to_path_buf()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("decoding classifier at {}", path.display()))
    }
}

/// First-stage model: predicts candidate clusters for each text.
pub struct Matcher {
    indexers_path: PathBuf,
    indexer: String,
    model_root: PathBuf,
    blob_prefix: String,
    mapping: ClusterMapping,
    classifier: Option<BoostedTextClassifier>,
}

impl Matcher {
    /// Create an untrained matcher rooted at `model_root`, loading the
    /// cluster mapping for `indexer`.
    pub fn new(indexers_path: &Path, indexer: &str, model_root: &Path) -> anyhow::Result<Self> {
        let mapping = ClusterMapping::load(indexers_path, indexer)?;
        std::fs::create_dir_all(model_root.join("matcher"))?;
        std::fs::create_dir_all(model_root.join("incorrect-matcher"))?;
        Ok(Self {
            indexers_path: indexers_path.to_path_buf(),
            indexer: indexer.to_string(),
            model_root: model_root.to_path_buf(),
            blob_prefix: indexer.to_string(),
            mapping,
            classifier: None,
        })
    }

    /// Override the blob key prefix (defaults to the indexer name).
    pub fn with_blob_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.blob_prefix = prefix.into();
        self
    }

    /// Load a trained matcher, optionally fetching the artifact from a
    /// blob store into the local layout first.
    pub fn load(
        indexers_path: &Path,
        indexer: &str,
        model_root: &Path,
        store: Option<&dyn BlobStore>,
    ) -> anyhow::Result<Self> {
        let mut matcher = Self::new(indexers_path, indexer, model_root)?;
        matcher.load_artifacts(store)?;
        Ok(matcher)
    }

    /// Read the classifier artifact from the local layout, after an
    /// optional blob download. Missing artifact is fatal for the matcher.
    pub fn load_artifacts(&mut self, store: Option<&dyn BlobStore>) -> anyhow::Result<()> {
        let path = self.artifact_path();
        if let Some(store) = store {
            download_with_retry(store, &self.artifact_key(), &path, RetryPolicy::default())?;
        }
        self.classifier = Some(BoostedTextClassifier::load(&path)?);
        Ok(())
    }

    fn artifact_path(&self) -> PathBuf {
        self.model_root.join("matcher").join("final-model.json")
    }

    fn artifact_key(&self) -> String {
        format!("{}/matcher/final-model.json", self.blob_prefix)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let classifier = self.classifier.as_ref().ok_or(PipelineError::ModelNotTrained)?;
        classifier.save(&self.artifact_path())
    }

    pub fn upload(&self, store: &dyn BlobStore) -> anyhow::Result<()> {
        upload_with_retry(store, &self.artifact_path(), &self.artifact_key(), RetryPolicy::default())
    }

    pub fn mapping(&self) -> &ClusterMapping {
        &self.mapping
    }

    /// Train against the cluster-labeled corpus plus configured
    /// augmentation corpora, persist the artifact, then evaluate on the
    /// dev and test splits (silently skipped when empty).
    pub fn train(
        &mut self,
        config: &MatcherTrainConfig,
        store: Option<&dyn BlobStore>,
    ) -> anyhow::Result<()> {
        tracing::info!(indexer = %self.indexer, "training matcher");
        let corpus = read_corpus(&self.indexers_path.join(&self.indexer).join("matcher"), "matcher", false)?;
        let mut corpora = vec![corpus.clone()];
        corpora.extend(read_augmentation_corpora(
            &config.augmentation,
            &self.indexers_path,
            &self.indexer,
            "matcher",
        )?);
        let merged = Corpus::merge(corpora);

        let mut training: Vec<&Document> = merged.train.iter().collect();
        if config.train_with_dev {
            training.extend(merged.dev.iter());
        }
        if config.downsample > 0.0 && config.downsample < 1.0 {
            let mut rng = rand::rngs::StdRng::seed_from_u64(config.seed);
            training.shuffle(&mut rng);
            let keep = ((training.len() as f64) * config.downsample).ceil() as usize;
            training.truncate(keep.max(1));
        }

        let texts: Vec<&str> = training.iter().map(|d| d.text()).collect();
        let label_sets: Vec<Vec<String>> =
            training.iter().map(|d| d.gold_labels().to_vec()).collect();
        self.classifier = Some(BoostedTextClassifier::fit(&texts, &label_sets, &config.gbdt));
        self.save()?;
        if let Some(store) = store {
            self.upload(store)?;
        }

        let mut dev = corpus.dev.clone();
        self.eval(&mut dev, &[Metric::Map])?;
        let mut test = corpus.test.clone();
        self.eval(&mut test, &[Metric::Map])?;
        Ok(())
    }

    /// Annotate each document with cluster predictions: the full score
    /// distribution under [`ChannelId::MatcherProba`], or the argmax
    /// decision under [`ChannelId::Matcher`]. Gold labels are untouched.
    pub fn predict(&self, docs: &mut [Document], return_probabilities: bool) -> anyhow::Result<()> {
        let classifier = self.classifier.as_ref().ok_or(PipelineError::ModelNotTrained)?;
        tracing::debug!(documents = docs.len(), return_probabilities, "predicting matcher");
        let texts: Vec<&str> = docs.iter().map(|d| d.text()).collect();
        let scores = classifier.predict_proba(&texts)?;
        for (doc, row) in docs.iter_mut().zip(scores) {
            if return_probabilities {
                let predictions = classifier
                    .classes()
                    .iter()
                    .zip(&row)
                    .map(|(cluster, &score)| Prediction::new(cluster.clone(), score as f64))
                    .collect();
                doc.set_predictions(ChannelId::MatcherProba, predictions);
            } else {
                let best = row
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))
                    .map(|(i, _)| classifier.classes()[i].clone())
                    .unwrap_or_else(|| UNKNOWN_CLUSTER.to_string());
                doc.set_predictions(ChannelId::Matcher, vec![Prediction::new(best, 1.0)]);
            }
        }
        Ok(())
    }

    /// Evaluate against gold cluster labels. Returns scores keyed by
    /// metric name; an empty document list is a silent no-op.
    pub fn eval(
        &self,
        docs: &mut [Document],
        metrics: &[Metric],
    ) -> anyhow::Result<BTreeMap<String, f64>> {
        let mut scores = BTreeMap::new();
        if docs.is_empty() {
            return Ok(scores);
        }
        for metric in metrics {
            match metric {
                Metric::Map => {
                    self.predict(docs, true)?;
                    let map = calculate_mean_average_precision(
                        &*docs,
                        self.mapping.clusters(),
                        &ChannelId::MatcherProba,
                    );
                    tracing::info!(map, "matcher evaluation");
                    scores.insert("map".to_string(), map);
                }
                Metric::Summary => {
                    self.predict(docs, false)?;
                    let summary = calculate_summary(
                        &*docs,
                        self.mapping.clusters(),
                        &ChannelId::Matcher,
                        0,
                    );
                    tracing::info!(f1 = summary.f1, "matcher evaluation");
                    scores.insert("f1".to_string(), summary.f1);
                    scores.insert("precision".to_string(), summary.precision);
                    scores.insert("recall".to_string(), summary.recall);
                }
            }
        }
        Ok(scores)
    }

    /// Hard-predict the raw `corpus` dev split and write every text whose
    /// predicted cluster covers none of its gold clusters into a
    /// per-cluster hard-negative training file, labeled
    /// [`INCORRECT_MATCHER_LABEL`]. Texts routed to the unknown cluster
    /// are excluded from the feedback set.
    pub fn create_corpus_of_incorrectly_predicted(&self) -> anyhow::Result<()> {
        let corpus = read_corpus(&self.indexers_path.join(&self.indexer).join("corpus"), "corpus", false)?;
        let mut docs = corpus.dev;
        self.predict(&mut docs, false)?;
        let mut misrouted: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for doc in &docs {
            for prediction in doc.predictions(&ChannelId::Matcher) {
                if prediction.label == UNKNOWN_CLUSTER {
                    continue;
                }
                let gold_clusters: BTreeSet<&str> = doc
                    .gold_labels()
                    .iter()
                    .flat_map(|label| match self.mapping.clusters_of(label) {
                        Some(clusters) => clusters.iter().map(String::as_str).collect::<Vec<_>>(),
                        None => vec![UNKNOWN_CLUSTER],
                    })
                    .collect();
                if !gold_clusters.contains(prediction.label.as_str()) {
                    misrouted
                        .entry(prediction.label.clone())
                        .or_default()
                        .push(doc.text().to_string());
                }
            }
        }
        for (cluster, texts) in &misrouted {
            tracing::debug!(cluster, count = texts.len(), "writing hard-negative corpus");
            let labels = vec![vec![INCORRECT_MATCHER_LABEL.to_string()]; texts.len()];
            write_fasttext_file(
                texts,
                &labels,
                &self
                    .model_root
                    .join("incorrect-matcher")
                    .join(format!("incorrect_{cluster}_train.txt")),
            )?;
        }
        Ok(())
    }
}
