use std::path::PathBuf;
use thiserror::Error;

/// Domain failures of the classification pipeline.
///
/// Anything recoverable (a cluster without training data, a missing corpus
/// split) is modelled in the types that own it; these variants are the hard
/// failures a caller has to handle.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A persisted artifact that is required for operation does not exist.
    #[error("missing artifact: {0}")]
    MissingArtifact(PathBuf),

    /// The mapping artifact exists but could not be decoded.
    #[error("malformed mapping artifact {path}: {reason}")]
    MalformedMapping { path: PathBuf, reason: String },

    /// `transformers` and `seeds` must be parallel lists of equal length.
    #[error("transformers and seeds must pair up: got {transformers} transformers and {seeds} seeds")]
    MismatchedPairs { transformers: usize, seeds: usize },

    /// Sample standard deviation is undefined below two samples.
    #[error("cross-seed statistics require at least 2 scores, got {0}")]
    InsufficientSamples(usize),

    /// Prediction was requested before the model was trained or loaded.
    #[error("model has not been trained or loaded")]
    ModelNotTrained,

    /// The feature matrix does not line up with what the classifier was
    /// fitted on, usually a ranker reloaded with a different embedder.
    #[error("feature width mismatch: classifier was fitted on {expected} features, got {actual}")]
    FeatureWidthMismatch { expected: usize, actual: usize },
}
