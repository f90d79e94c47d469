//! Evaluation metrics and score aggregation.
//!
//! Mean average precision over probability-ranked predictions, micro
//! precision/recall/F1 over hard label sets, score fusion across model
//! identities (ensembling) and mean/stdev statistics across seeds.

use std::collections::{BTreeMap, HashSet};

use crate::core::{ChannelId, Document, PipelineError, Prediction};

/// The two evaluation modes of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Metric {
    /// Mean average precision, needs probability predictions.
    Map,
    /// Micro precision/recall/F1, needs hard predictions.
    Summary,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Map => "map",
            Metric::Summary => "summary",
        }
    }

    /// Whether this metric consumes probability (rather than hard) output.
    pub fn needs_probabilities(&self) -> bool {
        matches!(self, Metric::Map)
    }
}

/// How per-label scores from independently trained models are fused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsembleStrategy {
    Max,
    Sum,
}

/// Micro-averaged hard-label comparison result.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Summary {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Average precision of one ranked prediction list against a gold set.
///
/// Gold labels that are never predicted still count in the denominator.
fn average_precision(gold: &HashSet<&str>, ranked: &[(&str, f64)]) -> f64 {
    if gold.is_empty() {
        return 0.0;
    }
    let mut hits = 0usize;
    let mut precision_sum = 0.0;
    for (rank, (label, _)) in ranked.iter().enumerate() {
        if gold.contains(label) {
            hits += 1;
            precision_sum += hits as f64 / (rank + 1) as f64;
        }
    }
    precision_sum / gold.len() as f64
}

/// Average precision for one binarized row, as the ranker's weighted
/// evaluation consumes it. `None` when the row has no positive label.
///
/// A zero score means the label was never predicted: it counts in the
/// denominator but cannot be a hit, so an all-zero row scores 0.0. Tied
/// scores count at the bottom of their tie group; a constant scorer gets
/// no credit for the tie-broken order.
pub fn average_precision_binary(y_true: &[f32], scores: &[f32]) -> Option<f64> {
    let positives: usize = y_true.iter().filter(|&&v| v > 0.0).count();
    if positives == 0 {
        return None;
    }
    let mut ranked: Vec<usize> = (0..scores.len()).filter(|&i| scores[i] > 0.0).collect();
    ranked.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    let mut hits = 0usize;
    let mut precision_sum = 0.0;
    let mut start = 0;
    while start < ranked.len() {
        let mut end = start;
        while end < ranked.len() && scores[ranked[end]] == scores[ranked[start]] {
            end += 1;
        }
        let group_hits = ranked[start..end].iter().filter(|&&i| y_true[i] > 0.0).count();
        for offset in 0..group_hits {
            hits += 1;
            precision_sum += hits as f64 / (end - group_hits + offset + 1) as f64;
        }
        start = end;
    }
    Some(precision_sum / positives as f64)
}

/// Mean average precision over all documents with at least one gold label
/// inside the evaluated universe.
pub fn calculate_mean_average_precision<'a, I>(
    docs: &[Document],
    universe: I,
    channel: &ChannelId,
) -> f64
where
    I: IntoIterator<Item = &'a String>,
{
    let universe: HashSet<&str> = universe.into_iter().map(String::as_str).collect();
    let mut total = 0.0;
    let mut counted = 0usize;
    for doc in docs {
        let gold: HashSet<&str> = doc
            .gold_labels()
            .iter()
            .map(String::as_str)
            .filter(|label| universe.contains(label))
            .collect();
        if gold.is_empty() {
            continue;
        }
        // Keep the best score per label, then rank descending.
        let mut best: BTreeMap<&str, f64> = BTreeMap::new();
        for prediction in doc.predictions(channel) {
            if !universe.contains(prediction.label.as_str()) {
                continue;
            }
            let entry = best.entry(prediction.label.as_str()).or_insert(f64::MIN);
            *entry = entry.max(prediction.score);
        }
        let mut ranked: Vec<(&str, f64)> = best.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        total += average_precision(&gold, &ranked);
        counted += 1;
    }
    if counted == 0 {
        0.0
    } else {
        total / counted as f64
    }
}

/// Micro precision/recall/F1 between hard predicted and gold label sets.
///
/// With `first_n_digits > 0` both sides are truncated to that many leading
/// characters before comparison, which scores at a coarser code granularity.
pub fn calculate_summary<'a, I>(
    docs: &[Document],
    universe: I,
    channel: &ChannelId,
    first_n_digits: usize,
) -> Summary
where
    I: IntoIterator<Item = &'a String>,
{
    let universe: HashSet<&str> = universe.into_iter().map(String::as_str).collect();
    let truncate = |label: &str| -> String {
        if first_n_digits == 0 {
            label.to_string()
        } else {
            label.chars().take(first_n_digits).collect()
        }
    };
    let mut true_positives = 0usize;
    let mut false_positives = 0usize;
    let mut false_negatives = 0usize;
    for doc in docs {
        let gold: HashSet<String> = doc
            .gold_labels()
            .iter()
            .filter(|label| universe.contains(label.as_str()))
            .map(|label| truncate(label))
            .collect();
        let predicted: HashSet<String> = doc
            .predictions(channel)
            .iter()
            .filter(|p| universe.contains(p.label.as_str()))
            .map(|p| truncate(&p.label))
            .collect();
        true_positives += predicted.intersection(&gold).count();
        false_positives += predicted.difference(&gold).count();
        false_negatives += gold.difference(&predicted).count();
    }
    let precision = ratio(true_positives, true_positives + false_positives);
    let recall = ratio(true_positives, true_positives + false_negatives);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    Summary { precision, recall, f1 }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Fuse the per-label scores of several namespaced model channels into one
/// combined channel: [`ChannelId::PredictedProba`] with the fused score, or
/// [`ChannelId::Predicted`] with score 1.0 for hard (summary) ensembling.
pub fn ensemble_predictions(
    docs: &mut [Document],
    model_names: &[String],
    strategy: EnsembleStrategy,
    probabilistic: bool,
) {
    let target = if probabilistic {
        ChannelId::PredictedProba
    } else {
        ChannelId::Predicted
    };
    for doc in docs.iter_mut() {
        let mut scores: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for name in model_names {
            for prediction in doc.predictions(&ChannelId::Model(name.clone())) {
                scores
                    .entry(prediction.label.clone())
                    .or_default()
                    .push(prediction.score);
            }
        }
        let fused: Vec<Prediction> = scores
            .into_iter()
            .map(|(label, scores)| {
                let combined = match strategy {
                    EnsembleStrategy::Max => scores.iter().cloned().fold(f64::MIN, f64::max),
                    EnsembleStrategy::Sum => scores.iter().sum(),
                };
                let score = if probabilistic { combined } else { 1.0 };
                Prediction::new(label, score)
            })
            .collect();
        doc.set_predictions(target.clone(), fused);
    }
}

/// Mean and sample standard deviation (N-1 denominator) of scalar scores.
///
/// Fails below two samples; cross-seed statistics need at least two seeds.
pub fn mean_stdev(scores: &[f64]) -> Result<(f64, f64), PipelineError> {
    if scores.len() < 2 {
        return Err(PipelineError::InsufficientSamples(scores.len()));
    }
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Ok((mean, variance.sqrt()))
}
