// src/classifier/vocabulary.rs - Word index loading and fixed-length encoding

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::classifier::{ModelStoreError, SequenceEncoder};
use crate::types::EncodedSequence;

/// Which end of an over-long token list is cut off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Truncation {
    /// Drop leading tokens, keep the tail
    #[default]
    Pre,
    /// Drop trailing tokens, keep the head
    Post,
}

// On-disk layouts. The tokenizer export nests its config and stores
// `word_index` as a JSON-encoded string; the plain layout is flat.
#[derive(Deserialize)]
#[serde(untagged)]
enum VocabularyFile {
    TokenizerExport {
        #[allow(dead_code)]
        class_name: String,
        config: WordIndexConfig,
    },
    Plain(WordIndexConfig),
}

#[derive(Deserialize)]
struct WordIndexConfig {
    word_index: WordIndexField,
    #[serde(default)]
    oov_token: Option<String>,
    #[serde(default)]
    num_words: Option<usize>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WordIndexField {
    Encoded(String),
    Map(HashMap<String, u32>),
}

/// Immutable word to token id mapping shared by all encoders
#[derive(Debug, Clone)]
pub struct Vocabulary {
    word_index: HashMap<String, u32>,
    oov_id: Option<u32>,
    num_words: Option<usize>,
}

impl Vocabulary {
    pub fn new(
        word_index: HashMap<String, u32>,
        oov_token: Option<&str>,
        num_words: Option<usize>,
    ) -> Result<Self, ModelStoreError> {
        if let Some((word, _)) = word_index.iter().find(|(_, id)| **id == EncodedSequence::PADDING_ID) {
            return Err(ModelStoreError::InvalidVocabulary(format!(
                "word '{}' uses id 0, which is reserved for padding",
                word
            )));
        }

        let oov_id = match oov_token {
            Some(token) => Some(*word_index.get(token).ok_or_else(|| {
                ModelStoreError::InvalidVocabulary(format!(
                    "oov token '{}' is declared but missing from word_index",
                    token
                ))
            })?),
            None => None,
        };

        if num_words == Some(0) {
            return Err(ModelStoreError::InvalidVocabulary(
                "num_words must be positive when set".to_string(),
            ));
        }

        Ok(Self {
            word_index,
            oov_id,
            num_words,
        })
    }

    pub fn from_json_str(content: &str) -> Result<Self, ModelStoreError> {
        let file: VocabularyFile = serde_json::from_str(content)
            .map_err(|e| ModelStoreError::InvalidVocabulary(e.to_string()))?;

        let config = match file {
            VocabularyFile::TokenizerExport { config, .. } => config,
            VocabularyFile::Plain(config) => config,
        };

        let word_index = match config.word_index {
            WordIndexField::Map(map) => map,
            WordIndexField::Encoded(encoded) => serde_json::from_str(&encoded).map_err(|e| {
                ModelStoreError::InvalidVocabulary(format!("word_index is not a valid mapping: {}", e))
            })?,
        };

        Self::new(word_index, config.oov_token.as_deref(), config.num_words)
    }

    pub fn load(path: &Path) -> Result<Self, ModelStoreError> {
        let content = std::fs::read_to_string(path).map_err(|source| ModelStoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let vocabulary = Self::from_json_str(&content)?;

        info!(
            "Loaded vocabulary from {}: {} words, oov id {:?}, num_words {:?}",
            path.display(),
            vocabulary.len(),
            vocabulary.oov_id,
            vocabulary.num_words
        );
        Ok(vocabulary)
    }

    /// Token id for a word, after the out-of-vocabulary convention is applied.
    /// `None` means the word is dropped.
    pub fn lookup(&self, word: &str) -> Option<u32> {
        match self.word_index.get(word) {
            Some(&id) if self.within_limit(id) => Some(id),
            _ => self.oov_id,
        }
    }

    fn within_limit(&self, id: u32) -> bool {
        self.num_words.map_or(true, |limit| (id as usize) < limit)
    }

    /// Largest id `lookup` can ever return
    pub fn max_encodable_id(&self) -> u32 {
        let known = self
            .word_index
            .values()
            .copied()
            .filter(|&id| self.within_limit(id))
            .max()
            .unwrap_or(EncodedSequence::PADDING_ID);
        known.max(self.oov_id.unwrap_or(EncodedSequence::PADDING_ID))
    }

    pub fn oov_id(&self) -> Option<u32> {
        self.oov_id
    }

    pub fn num_words(&self) -> Option<usize> {
        self.num_words
    }

    pub fn len(&self) -> usize {
        self.word_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.word_index.is_empty()
    }
}

/// Whitespace tokenizer + vocabulary lookup + post padding
pub struct VocabularyEncoder {
    vocabulary: Arc<Vocabulary>,
    max_len: usize,
    truncation: Truncation,
}

impl VocabularyEncoder {
    pub fn new(vocabulary: Arc<Vocabulary>, max_len: usize, truncation: Truncation) -> Self {
        Self {
            vocabulary,
            max_len,
            truncation,
        }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn truncation(&self) -> Truncation {
        self.truncation
    }
}

impl SequenceEncoder for VocabularyEncoder {
    fn encode(&self, text: &str) -> EncodedSequence {
        let mut ids: Vec<u32> = text
            .split_whitespace()
            .filter_map(|word| self.vocabulary.lookup(word))
            .collect();

        if ids.len() > self.max_len {
            debug!(
                "Truncating {} tokens to {} ({:?})",
                ids.len(),
                self.max_len,
                self.truncation
            );
            match self.truncation {
                Truncation::Pre => {
                    let excess = ids.len() - self.max_len;
                    ids.drain(..excess);
                }
                Truncation::Post => ids.truncate(self.max_len),
            }
        }

        ids.resize(self.max_len, EncodedSequence::PADDING_ID);
        EncodedSequence::new(ids)
    }

    fn max_len(&self) -> usize {
        self.max_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word_index(words: &[(&str, u32)]) -> HashMap<String, u32> {
        words.iter().map(|(w, id)| (w.to_string(), *id)).collect()
    }

    fn encoder(vocabulary: Vocabulary, max_len: usize, truncation: Truncation) -> VocabularyEncoder {
        VocabularyEncoder::new(Arc::new(vocabulary), max_len, truncation)
    }

    #[test]
    fn test_tokenizer_export_with_encoded_word_index() {
        let json = r#"{
            "class_name": "Tokenizer",
            "config": {
                "num_words": null,
                "filters": "",
                "lower": true,
                "oov_token": "<OOV>",
                "word_counts": "{\"slot\": 10}",
                "word_index": "{\"<OOV>\": 1, \"slot\": 2, \"gacor\": 3}"
            }
        }"#;
        let vocabulary = Vocabulary::from_json_str(json).unwrap();
        assert_eq!(vocabulary.len(), 3);
        assert_eq!(vocabulary.oov_id(), Some(1));
        assert_eq!(vocabulary.lookup("gacor"), Some(3));
        assert_eq!(vocabulary.lookup("pagi"), Some(1));
    }

    #[test]
    fn test_plain_format_without_oov_drops_unknown_words() {
        let json = r#"{"word_index": {"slot": 1, "gacor": 2}}"#;
        let vocabulary = Vocabulary::from_json_str(json).unwrap();
        assert_eq!(vocabulary.oov_id(), None);
        assert_eq!(vocabulary.lookup("pagi"), None);

        let encoded = encoder(vocabulary, 5, Truncation::Pre).encode("pagi slot gacor pagi");
        assert_eq!(encoded.as_slice(), &[1, 2, 0, 0, 0]);
    }

    #[test]
    fn test_num_words_limit_treats_rare_ids_as_unknown() {
        let index = word_index(&[("<OOV>", 1), ("slot", 2), ("gacor", 3), ("maxwin", 9)]);
        let with_oov = Vocabulary::new(index.clone(), Some("<OOV>"), Some(5)).unwrap();
        assert_eq!(with_oov.lookup("maxwin"), Some(1));
        assert_eq!(with_oov.lookup("gacor"), Some(3));
        assert_eq!(with_oov.max_encodable_id(), 3);

        let without_oov = Vocabulary::new(index, None, Some(5)).unwrap();
        assert_eq!(without_oov.lookup("maxwin"), None);
    }

    #[test]
    fn test_validation_errors() {
        assert!(Vocabulary::new(word_index(&[("slot", 0)]), None, None).is_err());
        assert!(Vocabulary::new(word_index(&[("slot", 1)]), Some("<OOV>"), None).is_err());
        assert!(Vocabulary::new(word_index(&[("slot", 1)]), None, Some(0)).is_err());
        assert!(Vocabulary::from_json_str("[1, 2, 3]").is_err());
        assert!(Vocabulary::from_json_str(r#"{"word_index": "not json"}"#).is_err());
    }

    #[test]
    fn test_length_invariant() {
        let vocabulary = Vocabulary::new(word_index(&[("a", 1), ("b", 2)]), None, None).unwrap();
        let encoder = encoder(vocabulary, 4, Truncation::Pre);
        for text in ["", "a", "a b a b", "a b a b a b a b a", "zzz yyy", "   "] {
            assert_eq!(encoder.encode(text).len(), 4, "length for {:?}", text);
        }
    }

    #[test]
    fn test_empty_text_is_all_padding() {
        let vocabulary = Vocabulary::new(word_index(&[("a", 1)]), None, None).unwrap();
        let encoded = encoder(vocabulary, 6, Truncation::Pre).encode("");
        assert_eq!(encoded.as_slice(), &[0; 6]);
        assert!(encoded.is_all_padding());
    }

    #[test]
    fn test_truncation_sides() {
        let index = word_index(&[("a", 1), ("b", 2), ("c", 3), ("d", 4)]);
        let vocabulary = Arc::new(Vocabulary::new(index, None, None).unwrap());

        let pre = VocabularyEncoder::new(vocabulary.clone(), 2, Truncation::Pre);
        assert_eq!(pre.encode("a b c d").as_slice(), &[3, 4]);

        let post = VocabularyEncoder::new(vocabulary, 2, Truncation::Post);
        assert_eq!(post.encode("a b c d").as_slice(), &[1, 2]);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let index = word_index(&[("<OOV>", 1), ("slot", 2), ("gacor", 3), ("klik", 4)]);
        let vocabulary = Vocabulary::new(index, Some("<OOV>"), None).unwrap();
        let encoder = encoder(vocabulary, 8, Truncation::Pre);
        let first = encoder.encode("free slot gacor klik");
        let second = encoder.encode("free slot gacor klik");
        assert_eq!(first, second);
        assert_eq!(first.as_slice(), &[1, 2, 3, 4, 0, 0, 0, 0]);
    }

    #[test]
    fn test_truncation_config_names() {
        let pre: Truncation = serde_yaml::from_str("pre").unwrap();
        let post: Truncation = serde_yaml::from_str("post").unwrap();
        assert_eq!(pre, Truncation::Pre);
        assert_eq!(post, Truncation::Post);
        assert_eq!(Truncation::default(), Truncation::Pre);
    }
}
