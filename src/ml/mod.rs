//! Learning primitives behind the matcher and the ranker.
//!
//! Sparse lexical features ([`TfidfVectorizer`]), multi-hot targets
//! ([`MultiLabelBinarizer`]), gradient-boosted stump classifiers
//! ([`GradientBoostedStumps`], [`OneVsRestClassifier`]) and the frozen
//! encoder seam ([`DocumentEmbedder`]).

pub mod binarizer;
pub mod embedding;
pub mod gbdt;
pub mod tfidf;

pub use binarizer::MultiLabelBinarizer;
pub use embedding::{embed_chunked, DocumentEmbedder, HashingEmbedder, EMBEDDING_CHUNK_SIZE};
pub use gbdt::{GbdtParams, GradientBoostedStumps, OneVsRestClassifier};
pub use tfidf::TfidfVectorizer;
