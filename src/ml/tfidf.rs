use std::collections::BTreeMap;

/// Sparse lexical features: term frequency weighted by smoothed inverse
/// document frequency, rows L2-normalized.
///
/// Fitted once per cluster on its assembled training texts and persisted
/// next to the cluster's classifier; prediction always reuses the fitted
/// vocabulary, never refits.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TfidfVectorizer {
    vocabulary: BTreeMap<String, usize>,
    idf: Vec<f32>,
}

impl TfidfVectorizer {
    /// Fit vocabulary and document frequencies over a text collection.
    pub fn fit<'a, I>(texts: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut vocabulary: BTreeMap<String, usize> = BTreeMap::new();
        let mut document_frequency: Vec<u32> = Vec::new();
        let mut n_documents: u32 = 0;
        for text in texts {
            n_documents += 1;
            let mut seen = std::collections::BTreeSet::new();
            for token in tokenize(text) {
                let next_index = vocabulary.len();
                let index = *vocabulary.entry(token).or_insert(next_index);
                if index == document_frequency.len() {
                    document_frequency.push(0);
                }
                if seen.insert(index) {
                    document_frequency[index] += 1;
                }
            }
        }
        // Smoothed idf, as if one extra document contained every term.
        let idf = document_frequency
            .iter()
            .map(|&df| (((1 + n_documents) as f32) / ((1 + df) as f32)).ln() + 1.0)
            .collect();
        Self { vocabulary, idf }
    }

    /// Dense tf-idf rows, aligned positionally with `texts`.
    pub fn transform(&self, texts: &[&str]) -> Vec<Vec<f32>> {
        texts.iter().map(|text| self.transform_one(text)).collect()
    }

    fn transform_one(&self, text: &str) -> Vec<f32> {
        let mut row = vec![0.0f32; self.vocabulary.len()];
        for token in tokenize(text) {
            if let Some(&index) = self.vocabulary.get(&token) {
                row[index] += 1.0;
            }
        }
        for (index, value) in row.iter_mut().enumerate() {
            *value *= self.idf[index];
        }
        let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in row.iter_mut() {
                *value /= norm;
            }
        }
        row
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }
}

/// Lowercased alphanumeric tokens of length >= 2.
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() >= 2)
        .map(|token| token.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabulary_covers_training_tokens() {
        let tfidf = TfidfVectorizer::fit(["dolor toracico agudo", "dolor abdominal"]);
        assert_eq!(tfidf.vocabulary_len(), 4);
    }

    #[test]
    fn test_rows_align_with_inputs_and_are_normalized() {
        let tfidf = TfidfVectorizer::fit(["fiebre alta", "tos seca", "fiebre y tos"]);
        let rows = tfidf.transform(&["fiebre alta", "palabra desconocida"]);
        assert_eq!(rows.len(), 2);
        let norm: f32 = rows[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        // Out-of-vocabulary text maps to the zero vector.
        assert!(rows[1].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_rarer_terms_weigh_more() {
        let tfidf = TfidfVectorizer::fit(["comun raro", "comun otra", "comun cosa"]);
        let row = tfidf.transform(&["comun raro"]);
        let values: Vec<f32> = row[0].iter().copied().filter(|&v| v > 0.0).collect();
        assert_eq!(values.len(), 2);
        // "raro" appears in one document, "comun" in all three.
        assert!(values.iter().cloned().fold(f32::MIN, f32::max) > values.iter().cloned().fold(f32::MAX, f32::min));
    }
}
