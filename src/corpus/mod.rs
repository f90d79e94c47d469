//! Labeled-text corpus I/O.
//!
//! Corpora live on disk as fastText-format files (`__label__X __label__Y
//! text`), one file per split, grouped in per-indexer directories. The
//! matcher reads `matcher/`, each cluster's ranker reads
//! `ranker/ranker_<cluster>_*`, and evaluation reads the raw `corpus/`
//! split with fine-grained gold labels.

pub mod augmentation;
pub mod reader;
pub mod writer;

pub use augmentation::{read_augmentation_corpora, Augmentation};
pub use reader::{read_corpus, Corpus, Split};
pub use writer::write_fasttext_file;
