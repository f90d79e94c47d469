use std::io::Write;
use std::path::Path;

use anyhow::Context;

/// Write texts with their label sets as one fastText-format file.
///
/// `texts` and `labels` must be parallel; each line comes out as
/// `__label__a __label__b text`.
pub fn write_fasttext_file(
    texts: &[String],
    labels: &[Vec<String>],
    path: &Path,
) -> anyhow::Result<()> {
    debug_assert_eq!(texts.len(), labels.len());
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("creating fastText file {}", path.display()))?;
    for (text, label_set) in texts.iter().zip(labels) {
        for label in label_set {
            write!(file, "__label__{label} ")?;
        }
        writeln!(file, "{text}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::write_fasttext_file;
    use crate::corpus::read_corpus;

    #[test]
    fn test_written_file_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let texts = vec!["dolor toracico".to_string(), "lesion cutanea".to_string()];
        let labels = vec![
            vec!["a01.1".to_string(), "a02.2".to_string()],
            vec!["b10.0".to_string()],
        ];
        write_fasttext_file(&texts, &labels, &dir.path().join("out_train.txt")).unwrap();
        let corpus = read_corpus(dir.path(), "out", true).unwrap();
        assert_eq!(corpus.train.len(), 2);
        assert_eq!(corpus.train[0].text(), "dolor toracico");
        assert_eq!(corpus.train[0].gold_labels().len(), 2);
        assert_eq!(corpus.train[1].gold_labels(), ["b10.0".to_string()]);
    }
}
