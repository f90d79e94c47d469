use std::path::Path;

use anyhow::Context;

use crate::core::Document;

/// Corpus split names, mirroring the on-disk `<name>_<split>.txt` layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Split {
    Train,
    Dev,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Dev => "dev",
            Split::Test => "test",
        }
    }
}

/// A labeled-text corpus with its three conventional splits.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    pub train: Vec<Document>,
    pub dev: Vec<Document>,
    pub test: Vec<Document>,
}

impl Corpus {
    pub fn split(&self, split: Split) -> &[Document] {
        match split {
            Split::Train => &self.train,
            Split::Dev => &self.dev,
            Split::Test => &self.test,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.train.is_empty() && self.dev.is_empty() && self.test.is_empty()
    }

    /// Concatenate several corpora split-wise, preserving order.
    pub fn merge(corpora: Vec<Corpus>) -> Corpus {
        let mut merged = Corpus::default();
        for corpus in corpora {
            merged.train.extend(corpus.train);
            merged.dev.extend(corpus.dev);
            merged.test.extend(corpus.test);
        }
        merged
    }
}

/// Read a fastText-format corpus named `<name>_<split>.txt` under `dir`.
///
/// Missing split files yield empty splits rather than errors; evaluation on
/// an absent split is silently skipped further up.
pub fn read_corpus(dir: &Path, name: &str, only_train: bool) -> anyhow::Result<Corpus> {
    let mut corpus = Corpus {
        train: read_split_file(dir, name, Split::Train)?,
        ..Corpus::default()
    };
    if !only_train {
        corpus.dev = read_split_file(dir, name, Split::Dev)?;
        corpus.test = read_split_file(dir, name, Split::Test)?;
    }
    Ok(corpus)
}

fn read_split_file(dir: &Path, name: &str, split: Split) -> anyhow::Result<Vec<Document>> {
    let path = dir.join(format!("{name}_{}.txt", split.as_str()));
    if !path.is_file() {
        tracing::debug!(path = %path.display(), "corpus split absent, treating as empty");
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading corpus split {}", path.display()))?;
    Ok(raw
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_fasttext_line)
        .collect())
}

/// Parse one `__label__a __label__b some text` line.
pub(crate) fn parse_fasttext_line(line: &str) -> Document {
    const PREFIX: &str = "__label__";
    let mut rest = line.trim_start();
    let mut labels = Vec::new();
    while let Some(tail) = rest.strip_prefix(PREFIX) {
        let end = tail.find(char::is_whitespace).unwrap_or(tail.len());
        labels.push(tail[..end].to_string());
        rest = tail[end..].trim_start();
    }
    Document::new(rest, labels)
}
