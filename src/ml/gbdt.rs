use crate::core::PipelineError;

/// Hyperparameters for gradient-boosted stump training.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GbdtParams {
    /// Number of boosting rounds per binary problem.
    pub rounds: usize,
    /// Shrinkage applied to every leaf value.
    pub learning_rate: f32,
    /// Upper bound on candidate split thresholds per feature.
    pub max_bins: usize,
}

impl Default for GbdtParams {
    fn default() -> Self {
        Self { rounds: 50, learning_rate: 0.3, max_bins: 8 }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct Stump {
    feature: usize,
    threshold: f32,
    /// Leaf values with the learning rate already applied.
    left: f32,
    right: f32,
}

/// Binary classifier: logistic-loss gradient boosting over decision stumps.
///
/// Small and dependency-free on purpose; the pipeline treats the boosting
/// implementation as swappable, the orchestration only relies on
/// `fit` / `predict_proba` semantics.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GradientBoostedStumps {
    base_score: f32,
    stumps: Vec<Stump>,
}

const LEAF_CLAMP: f32 = 4.0;
const HESSIAN_REGULARIZATION: f32 = 1.0;

impl GradientBoostedStumps {
    /// Fit against binary targets (0.0 / 1.0). Constant targets degenerate
    /// to the prior log-odds with no stumps.
    pub fn fit(features: &[Vec<f32>], targets: &[f32], params: &GbdtParams) -> Self {
        debug_assert_eq!(features.len(), targets.len());
        let n = targets.len() as f32;
        let positive_rate = (targets.iter().sum::<f32>() / n).clamp(1e-4, 1.0 - 1e-4);
        let base_score = (positive_rate / (1.0 - positive_rate)).ln();

        let n_features = features.first().map(Vec::len).unwrap_or(0);
        let thresholds: Vec<Vec<f32>> = (0..n_features)
            .map(|j| candidate_thresholds(features, j, params.max_bins))
            .collect();

        let mut scores = vec![base_score; targets.len()];
        let mut stumps = Vec::with_capacity(params.rounds);
        for _ in 0..params.rounds {
            let gradients: Vec<f32> = scores
                .iter()
                .zip(targets)
                .map(|(&f, &y)| y - sigmoid(f))
                .collect();
            let hessians: Vec<f32> = scores
                .iter()
                .map(|&f| {
                    let p = sigmoid(f);
                    p * (1.0 - p)
                })
                .collect();

            let Some(stump) = best_stump(features, &thresholds, &gradients, &hessians, params)
            else {
                break;
            };
            for (i, row) in features.iter().enumerate() {
                scores[i] += if row[stump.feature] <= stump.threshold {
                    stump.left
                } else {
                    stump.right
                };
            }
            stumps.push(stump);
        }
        Self { base_score, stumps }
    }

    /// Probability of the positive class for one feature row.
    pub fn predict_proba(&self, row: &[f32]) -> f32 {
        let mut score = self.base_score;
        for stump in &self.stumps {
            score += if row[stump.feature] <= stump.threshold {
                stump.left
            } else {
                stump.right
            };
        }
        sigmoid(score)
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Up to `max_bins` midpoints between evenly spaced distinct values.
fn candidate_thresholds(features: &[Vec<f32>], feature: usize, max_bins: usize) -> Vec<f32> {
    let mut values: Vec<f32> = features.iter().map(|row| row[feature]).collect();
    values.sort_by(f32::total_cmp);
    values.dedup();
    if values.len() < 2 {
        return Vec::new();
    }
    let step = (values.len() - 1).div_ceil(max_bins).max(1);
    values
        .windows(2)
        .step_by(step)
        .map(|pair| (pair[0] + pair[1]) / 2.0)
        .collect()
}

fn best_stump(
    features: &[Vec<f32>],
    thresholds: &[Vec<f32>],
    gradients: &[f32],
    hessians: &[f32],
    params: &GbdtParams,
) -> Option<Stump> {
    let total_gradient: f32 = gradients.iter().sum();
    let total_hessian: f32 = hessians.iter().sum();
    let root_objective =
        total_gradient * total_gradient / (total_hessian + HESSIAN_REGULARIZATION);

    let mut best: Option<(f32, Stump)> = None;
    for (feature, candidates) in thresholds.iter().enumerate() {
        for &threshold in candidates {
            let mut left_gradient = 0.0;
            let mut left_hessian = 0.0;
            for (i, row) in features.iter().enumerate() {
                if row[feature] <= threshold {
                    left_gradient += gradients[i];
                    left_hessian += hessians[i];
                }
            }
            let right_gradient = total_gradient - left_gradient;
            let right_hessian = total_hessian - left_hessian;
            let gain = left_gradient * left_gradient / (left_hessian + HESSIAN_REGULARIZATION)
                + right_gradient * right_gradient / (right_hessian + HESSIAN_REGULARIZATION)
                - root_objective;
            if gain <= 1e-6 {
                continue;
            }
            if best.as_ref().is_none_or(|(best_gain, _)| gain > *best_gain) {
                let leaf = |g: f32, h: f32| {
                    (params.learning_rate * g / (h + HESSIAN_REGULARIZATION))
                        .clamp(-LEAF_CLAMP, LEAF_CLAMP)
                };
                best = Some((
                    gain,
                    Stump {
                        feature,
                        threshold,
                        left: leaf(left_gradient, left_hessian),
                        right: leaf(right_gradient, right_hessian),
                    },
                ));
            }
        }
    }
    best.map(|(_, stump)| stump)
}

/// One independent binary classifier per label, over a shared feature
/// matrix, as the ranker needs for its multi-label targets.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OneVsRestClassifier {
    n_features: usize,
    models: Vec<GradientBoostedStumps>,
}

impl OneVsRestClassifier {
    /// Fit one binary model per column of `label_matrix`.
    pub fn fit(features: &[Vec<f32>], label_matrix: &[Vec<f32>], params: &GbdtParams) -> Self {
        let n_features = features.first().map(Vec::len).unwrap_or(0);
        let n_classes = label_matrix.first().map(Vec::len).unwrap_or(0);
        let models = (0..n_classes)
            .map(|class| {
                let targets: Vec<f32> = label_matrix.iter().map(|row| row[class]).collect();
                GradientBoostedStumps::fit(features, &targets, params)
            })
            .collect();
        Self { n_features, models }
    }

    /// Per-row, per-class probabilities, aligned with the fitted class order.
    pub fn predict_proba(&self, features: &[Vec<f32>]) -> Result<Vec<Vec<f32>>, PipelineError> {
        self.check_width(features)?;
        Ok(features
            .iter()
            .map(|row| self.models.iter().map(|m| m.predict_proba(row)).collect())
            .collect())
    }

    /// Hard multi-label decisions at the 0.5 threshold.
    pub fn predict(&self, features: &[Vec<f32>]) -> Result<Vec<Vec<f32>>, PipelineError> {
        let probabilities = self.predict_proba(features)?;
        Ok(probabilities
            .into_iter()
            .map(|row| row.into_iter().map(|p| if p >= 0.5 { 1.0 } else { 0.0 }).collect())
            .collect())
    }

    pub fn n_classes(&self) -> usize {
        self.models.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    fn check_width(&self, features: &[Vec<f32>]) -> Result<(), PipelineError> {
        match features.first() {
            Some(row) if row.len() != self.n_features => Err(PipelineError::FeatureWidthMismatch {
                expected: self.n_features,
                actual: row.len(),
            }),
            _ => Ok(()),
        }
    }
}
