use std::collections::BTreeMap;

/// Fixed, ordered label vocabulary with multi-hot encoding.
///
/// Defines exactly which labels a cluster's classifier may predict; the
/// class order is frozen at fit time and shared between the target matrix
/// and the prediction columns.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MultiLabelBinarizer {
    classes: Vec<String>,
    index: BTreeMap<String, usize>,
}

impl MultiLabelBinarizer {
    /// Fit over the union of the given labels, sorted and deduplicated.
    pub fn fit<I>(labels: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut classes: Vec<String> = labels.into_iter().collect();
        classes.sort();
        classes.dedup();
        let index = classes
            .iter()
            .enumerate()
            .map(|(i, label)| (label.clone(), i))
            .collect();
        Self { classes, index }
    }

    /// Multi-hot rows for the given label sets. Labels outside the fitted
    /// vocabulary are ignored.
    pub fn transform(&self, label_sets: &[Vec<String>]) -> Vec<Vec<f32>> {
        label_sets
            .iter()
            .map(|labels| {
                let mut row = vec![0.0f32; self.classes.len()];
                for label in labels {
                    if let Some(&i) = self.index.get(label) {
                        row[i] = 1.0;
                    }
                }
                row
            })
            .collect()
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classes_are_sorted_and_deduplicated() {
        let mlb = MultiLabelBinarizer::fit(
            ["b".to_string(), "a".to_string(), "b".to_string()],
        );
        assert_eq!(mlb.classes(), ["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_transform_ignores_unknown_labels() {
        let mlb = MultiLabelBinarizer::fit(["a".to_string(), "b".to_string()]);
        let rows = mlb.transform(&[vec!["b".to_string(), "z".to_string()], vec![]]);
        assert_eq!(rows, vec![vec![0.0, 1.0], vec![0.0, 0.0]]);
    }
}
