//! Bag-of-words features over an explicit, ordered vocabulary.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::text::tokenize;

/// Ordered token -> index mapping, built once from historical text.
///
/// Serialized as the ordered token list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Vocabulary {
    tokens: Vec<String>,
    index: BTreeMap<String, usize>,
}

impl From<Vec<String>> for Vocabulary {
    fn from(tokens: Vec<String>) -> Self {
        let mut vocab = Vocabulary::default();
        for token in tokens {
            if !vocab.index.contains_key(&token) {
                vocab.index.insert(token.clone(), vocab.tokens.len());
                vocab.tokens.push(token);
            }
        }
        vocab
    }
}

impl From<Vocabulary> for Vec<String> {
    fn from(vocab: Vocabulary) -> Self {
        vocab.tokens
    }
}

impl Vocabulary {
    /// Keep the `max_size` most frequent tokens across `blobs`. Frequency
    /// ties are broken alphabetically so the result is deterministic.
    pub fn build<'a, I>(blobs: I, max_size: usize) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for blob in blobs {
            for token in tokenize(blob) {
                *counts.entry(token).or_default() += 1;
            }
        }
        let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
            .into_iter()
            .take(max_size)
            .map(|(token, _)| token.to_string())
            .collect::<Vec<_>>()
            .into()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn index_of(&self, token: &str) -> Option<usize> {
        self.index.get(token).copied()
    }

    pub fn token(&self, index: usize) -> Option<&str> {
        self.tokens.get(index).map(String::as_str)
    }

    /// Presence vector: 1.0 for every vocabulary token found in `blob`.
    pub fn featurize(&self, blob: &str) -> FeatureVector {
        let mut values = vec![0.0; self.len()];
        for token in tokenize(blob) {
            if let Some(i) = self.index_of(token) {
                values[i] = 1.0;
            }
        }
        FeatureVector { values }
    }
}

/// Fixed-width numeric features, positions named by the vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: Vec<f64>,
}

impl FeatureVector {
    #[cfg(test)]
    pub(crate) fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Non-zero features with their token names.
    #[cfg(test)]
    fn named<'a>(&'a self, vocab: &'a Vocabulary) -> impl Iterator<Item = (&'a str, f64)> + 'a {
        self.values
            .iter()
            .enumerate()
            .filter(|(_, v)| **v != 0.0)
            .filter_map(move |(i, v)| vocab.token(i).map(|t| (t, *v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_ranks_by_frequency_then_alpha() {
        let vocab = Vocabulary::build(["darkrp fr", "darkrp ttt", "ttt zz", "aa"], 3);
        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.index_of("darkrp"), Some(0));
        assert_eq!(vocab.index_of("ttt"), Some(1));
        assert_eq!(vocab.index_of("aa"), Some(2));
        assert_eq!(vocab.index_of("zz"), None);
    }

    #[test]
    fn test_featurize_presence() {
        let vocab = Vocabulary::from(vec!["darkrp".to_string(), "fr".to_string(), "ttt".to_string()]);
        let features = vocab.featurize("[fr] darkrp darkrp unknown");
        assert_eq!(features.values(), &[1.0, 1.0, 0.0]);
        let named: Vec<_> = features.named(&vocab).collect();
        assert_eq!(named, vec![("darkrp", 1.0), ("fr", 1.0)]);
    }

    #[test]
    fn test_serializes_as_ordered_list() {
        let vocab = Vocabulary::from(vec!["b".to_string(), "a".to_string(), "b".to_string()]);
        let json = serde_json::to_string(&vocab).unwrap();
        assert_eq!(json, r#"["b","a"]"#);
        let back: Vocabulary = serde_json::from_str(&json).unwrap();
        assert_eq!(back.index_of("a"), Some(1));
    }
}
