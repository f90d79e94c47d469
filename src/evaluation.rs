//! Reproducibility orchestration: cross-seed statistics, seed ensembling
//! and per-cluster component analysis over sets of trained model pairs.
//!
//! Every entry point takes parallel `transformers`/`seeds` lists naming
//! the model identities to load and fails fast on a length mismatch
//! before touching any artifact.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;

use crate::core::{ChannelId, Document, PipelineError};
use crate::corpus::{read_corpus, Split};
use crate::dac::DacModel;
use crate::mapping::ClusterMapping;
use crate::metrics::{
    calculate_mean_average_precision, calculate_summary, ensemble_predictions, mean_stdev,
    EnsembleStrategy, Metric,
};
use crate::ml::DocumentEmbedder;
use crate::ranker::WeightedEvaluation;
use crate::storage::BlobStore;

/// Shared parameters of the orchestration entry points.
pub struct EvalConfig<'a> {
    pub indexers_path: &'a Path,
    pub models_path: &'a Path,
    pub indexer: &'a str,
    /// Base transformer name of each model identity.
    pub transformers: &'a [String],
    /// Random seed of each model identity, parallel to `transformers`.
    pub seeds: &'a [u64],
    pub metrics: Vec<Metric>,
    /// Truncate labels to this many leading characters in summaries.
    pub first_n_digits: usize,
    pub matcher_store: Option<&'a dyn BlobStore>,
    pub ranker_store: Option<&'a dyn BlobStore>,
    /// Builds the frozen encoder each loaded ranker was trained with.
    pub embedder_factory: Option<&'a dyn Fn() -> Box<dyn DocumentEmbedder>>,
}

impl<'a> EvalConfig<'a> {
    pub fn new(
        indexers_path: &'a Path,
        models_path: &'a Path,
        indexer: &'a str,
        transformers: &'a [String],
        seeds: &'a [u64],
    ) -> Self {
        Self {
            indexers_path,
            models_path,
            indexer,
            transformers,
            seeds,
            metrics: vec![Metric::Map, Metric::Summary],
            first_n_digits: 0,
            matcher_store: None,
            ranker_store: None,
            embedder_factory: None,
        }
    }

    fn check_pairs(&self) -> Result<(), PipelineError> {
        if self.transformers.len() != self.seeds.len() {
            return Err(PipelineError::MismatchedPairs {
                transformers: self.transformers.len(),
                seeds: self.seeds.len(),
            });
        }
        Ok(())
    }

    fn pairs(&self) -> impl Iterator<Item = (&String, u64)> {
        self.transformers.iter().zip(self.seeds.iter().copied())
    }

    fn load_pair(&self, transformer: &str, seed: u64) -> anyhow::Result<DacModel> {
        DacModel::load(
            self.indexers_path,
            self.models_path,
            self.indexer,
            transformer,
            seed,
            self.matcher_store,
            self.ranker_store,
            self.embedder_factory.map(|factory| factory()),
        )
        .with_context(|| format!("loading model {}", DacModel::model_name(transformer, seed)))
    }

    /// The shared evaluation split: the raw corpus test set with
    /// fine-grained gold labels.
    fn test_docs(&self) -> anyhow::Result<Vec<Document>> {
        let corpus = read_corpus(
            &self.indexers_path.join(self.indexer).join("corpus"),
            "corpus",
            false,
        )?;
        Ok(corpus.test)
    }
}

/// Scores of one metric across seeds, with their mean and sample stdev.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ScoreStats {
    pub scores: Vec<f64>,
    pub mean: f64,
    pub stdev: f64,
}

/// Evaluate every (transformer, seed) pair independently and summarize
/// each metric across pairs. Needs at least two pairs, since the sample
/// standard deviation is undefined below that.
pub fn eval_mean(config: &EvalConfig<'_>) -> anyhow::Result<BTreeMap<String, ScoreStats>> {
    config.check_pairs()?;
    let mut docs = config.test_docs()?;
    let mut collected: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for (transformer, seed) in config.pairs() {
        let dac = config.load_pair(transformer, seed)?;
        let scores = dac.eval(&mut docs, &config.metrics, config.first_n_digits)?;
        for (key, score) in scores {
            collected.entry(key).or_default().push(score);
        }
    }
    let mut stats = BTreeMap::new();
    for (key, scores) in collected {
        let (mean, stdev) = mean_stdev(&scores)?;
        tracing::info!(metric = %key, ?scores, mean, stdev, "cross-seed statistics");
        stats.insert(key, ScoreStats { scores, mean, stdev });
    }
    Ok(stats)
}

/// Predict with every pair under its own namespaced channel, fuse scores
/// per label, then score the ensemble as if it were a single model.
pub fn eval_ensemble(
    config: &EvalConfig<'_>,
    strategy: EnsembleStrategy,
) -> anyhow::Result<BTreeMap<String, f64>> {
    config.check_pairs()?;
    let mapping = ClusterMapping::load(config.indexers_path, config.indexer)?;
    let mut docs = config.test_docs()?;
    let names: Vec<String> = config
        .pairs()
        .map(|(transformer, seed)| DacModel::model_name(transformer, seed))
        .collect();

    let mut results = BTreeMap::new();
    for metric in &config.metrics {
        let probabilistic = metric.needs_probabilities();
        for (transformer, seed) in config.pairs() {
            let dac = config.load_pair(transformer, seed)?;
            dac.predict(&mut docs, Some(ChannelId::Model(dac.name())), probabilistic)?;
        }
        ensemble_predictions(&mut docs, &names, strategy, probabilistic);
        match metric {
            Metric::Map => {
                let map = calculate_mean_average_precision(
                    &docs,
                    mapping.labels(),
                    &ChannelId::PredictedProba,
                );
                results.insert("map".to_string(), map);
            }
            Metric::Summary => {
                let summary = calculate_summary(
                    &docs,
                    mapping.labels(),
                    &ChannelId::Predicted,
                    config.first_n_digits,
                );
                results.insert("f1".to_string(), summary.f1);
                results.insert("precision".to_string(), summary.precision);
                results.insert("recall".to_string(), summary.recall);
            }
        }
    }
    tracing::info!(?results, "ensemble evaluation");
    Ok(results)
}

/// Per-pair, per-cluster weighted score breakdowns, persisted as
/// `component_analysis.json` under the indexer's model root.
pub fn component_analysis(
    config: &EvalConfig<'_>,
) -> anyhow::Result<BTreeMap<String, BTreeMap<String, WeightedEvaluation>>> {
    config.check_pairs()?;
    let mut all_scores = BTreeMap::new();
    for (transformer, seed) in config.pairs() {
        let dac = config.load_pair(transformer, seed)?;
        let breakdown = dac.component_scores(&[Split::Test], &config.metrics)?;
        all_scores.insert(dac.name(), breakdown);
    }
    let output_dir = config.models_path.join(config.indexer);
    std::fs::create_dir_all(&output_dir)?;
    let path = output_dir.join("component_analysis.json");
    std::fs::write(&path, serde_json::to_string_pretty(&all_scores)?)
        .with_context(|| format!("writing {}", path.display()))?;
    tracing::info!(path = %path.display(), "component analysis written");
    Ok(all_scores)
}
