use std::path::Path;

use crate::corpus::{read_corpus, Corpus};

/// Synthetic training corpora merged into a model's own split at train time.
///
/// Each variant names a sibling directory under the indexer that holds
/// train-only fastText files keyed by the consuming corpus name
/// (`matcher` or `ranker_<cluster>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Augmentation {
    /// Isolated entity mentions as pseudo-examples.
    NerMention,
    /// Full sentences that contain an entity mention.
    NerSentence,
    /// Sentences with the entity mention stripped out.
    NerStripped,
    /// Label descriptions turned into pseudo-examples.
    DescriptionsLabels,
}

impl Augmentation {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Augmentation::NerMention => "ner_mention",
            Augmentation::NerSentence => "ner_sentence",
            Augmentation::NerStripped => "ner_stripped",
            Augmentation::DescriptionsLabels => "descriptions_labels",
        }
    }
}

/// Read the train-only augmentation corpora configured for `name`.
///
/// Augmentation directories or files that do not exist contribute nothing;
/// not every cluster has synthetic examples for every source.
pub fn read_augmentation_corpora(
    augmentations: &[Augmentation],
    indexers_path: &Path,
    indexer: &str,
    name: &str,
) -> anyhow::Result<Vec<Corpus>> {
    let mut corpora = Vec::new();
    for augmentation in augmentations {
        let dir = indexers_path.join(indexer).join(augmentation.dir_name());
        let corpus = read_corpus(&dir, name, true)?;
        if !corpus.is_empty() {
            corpora.push(corpus);
        }
    }
    Ok(corpora)
}
