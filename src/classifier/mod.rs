// src/classifier/mod.rs - Message classification pipeline

pub mod model;
pub mod normalizer;
pub mod pipeline;
pub mod stemmer;
pub mod stopwords;
pub mod vocabulary;

use std::path::PathBuf;
use thiserror::Error;

use crate::types::{EncodedSequence, Score};

pub use model::{LstmClassifier, ModelConfig};
pub use normalizer::StandardNormalizer;
pub use pipeline::{ClassificationPipeline, ModelStore};
pub use stemmer::{IndonesianStemmer, RootDictionary, Stemmer};
pub use stopwords::StopwordSet;
pub use vocabulary::{Truncation, Vocabulary, VocabularyEncoder};

/// Turns raw message text into the form the vocabulary was built from
pub trait TextNormalizer: Send + Sync {
    fn normalize(&self, text: &str) -> String;
}

/// Maps normalized text to a fixed-length id sequence. Never fails.
pub trait SequenceEncoder: Send + Sync {
    fn encode(&self, text: &str) -> EncodedSequence;

    fn max_len(&self) -> usize;
}

/// Frozen scoring function, safe to call from many threads at once
pub trait Classifier: Send + Sync {
    fn score(&self, sequence: &EncodedSequence) -> anyhow::Result<Score>;

    /// Sequence length the classifier accepts (MAX_LEN)
    fn input_width(&self) -> usize;

    fn name(&self) -> &str {
        "classifier"
    }
}

/// Artifacts that cannot be loaded or do not fit together
#[derive(Debug, Error)]
pub enum ModelStoreError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid model config: {0}")]
    InvalidConfig(String),

    #[error("invalid vocabulary: {0}")]
    InvalidVocabulary(String),

    #[error("root dictionary {path} has no words")]
    EmptyDictionary { path: PathBuf },

    #[error("weights do not match the model config: {0}")]
    Weights(#[from] candle_core::Error),

    #[error("artifacts are incompatible: {0}")]
    Incompatible(String),

    #[error("smoke inference failed: {0}")]
    SmokeTest(String),
}
