use std::collections::BTreeMap;

/// Identifier of a prediction channel on a [`Document`].
///
/// Every stage of the pipeline writes its output under its own channel so
/// that the matcher, the ranker and the combined model never clobber each
/// other. Ensembling keeps one `Model` channel per (transformer, seed)
/// identity until the scores are fused.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChannelId {
    /// Hard cluster decision of the matcher.
    Matcher,
    /// Full probability distribution over clusters from the matcher.
    MatcherProba,
    /// Hard label decisions of the ranker.
    Ranker,
    /// Per-label probabilities of the ranker.
    RankerProba,
    /// Final hard label decisions of the combined model.
    Predicted,
    /// Final per-label scores of the combined model.
    PredictedProba,
    /// Namespaced channel of one model identity, e.g. `"roberta-base-1"`.
    Model(String),
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelId::Matcher => write!(f, "matcher"),
            ChannelId::MatcherProba => write!(f, "matcher_proba"),
            ChannelId::Ranker => write!(f, "ranker"),
            ChannelId::RankerProba => write!(f, "ranker_proba"),
            ChannelId::Predicted => write!(f, "label_predicted"),
            ChannelId::PredictedProba => write!(f, "label_predicted_proba"),
            ChannelId::Model(name) => write!(f, "{name}"),
        }
    }
}

/// A single predicted label with its confidence score.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Prediction {
    pub label: String,
    pub score: f64,
}

impl Prediction {
    pub fn new(label: impl Into<String>, score: f64) -> Self {
        Self { label: label.into(), score }
    }
}

/// One input text with its gold labels and per-channel predictions.
///
/// Gold labels are fixed at construction; predictions accumulate additively
/// per channel and never touch gold.
#[derive(Debug, Clone)]
pub struct Document {
    text: String,
    gold: Vec<String>,
    channels: BTreeMap<ChannelId, Vec<Prediction>>,
}

impl Document {
    pub fn new(text: impl Into<String>, gold: Vec<String>) -> Self {
        Self {
            text: text.into(),
            gold,
            channels: BTreeMap::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn gold_labels(&self) -> &[String] {
        &self.gold
    }

    /// Append one prediction to a channel.
    pub fn add_prediction(&mut self, channel: ChannelId, prediction: Prediction) {
        self.channels.entry(channel).or_default().push(prediction);
    }

    /// Replace the contents of a channel.
    pub fn set_predictions(&mut self, channel: ChannelId, predictions: Vec<Prediction>) {
        self.channels.insert(channel, predictions);
    }

    /// Predictions under a channel; empty if the channel was never written.
    pub fn predictions(&self, channel: &ChannelId) -> &[Prediction] {
        self.channels.get(channel).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn clear_channel(&mut self, channel: &ChannelId) {
        self.channels.remove(channel);
    }

    /// Highest-scoring prediction under a channel, if any.
    pub fn top_prediction(&self, channel: &ChannelId) -> Option<&Prediction> {
        self.predictions(channel)
            .iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gold_labels_survive_prediction() {
        let mut doc = Document::new("fiebre y tos", vec!["a01.1".to_string()]);
        doc.add_prediction(ChannelId::MatcherProba, Prediction::new("a", 0.9));
        doc.set_predictions(ChannelId::Ranker, vec![Prediction::new("a01.1", 1.0)]);
        assert_eq!(doc.gold_labels(), ["a01.1".to_string()]);
        assert_eq!(doc.predictions(&ChannelId::MatcherProba).len(), 1);
    }

    #[test]
    fn test_unwritten_channel_is_empty() {
        let doc = Document::new("texto", vec![]);
        assert!(doc.predictions(&ChannelId::RankerProba).is_empty());
        assert!(doc.top_prediction(&ChannelId::Ranker).is_none());
    }

    #[test]
    fn test_top_prediction() {
        let mut doc = Document::new("texto", vec![]);
        doc.add_prediction(ChannelId::MatcherProba, Prediction::new("a", 0.2));
        doc.add_prediction(ChannelId::MatcherProba, Prediction::new("b", 0.7));
        doc.add_prediction(ChannelId::MatcherProba, Prediction::new("c", 0.1));
        let top = doc.top_prediction(&ChannelId::MatcherProba).unwrap();
        assert_eq!(top.label, "b");
    }
}
