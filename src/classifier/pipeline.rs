// src/classifier/pipeline.rs - Startup assembly of the classification context

use anyhow::{Context, Result};
use log::{debug, info};
use std::sync::Arc;

use crate::bot::moderation::DecisionPolicy;
use crate::classifier::{
    Classifier, IndonesianStemmer, LstmClassifier, ModelStoreError, RootDictionary, SequenceEncoder,
    StandardNormalizer, StopwordSet, TextNormalizer, Vocabulary, VocabularyEncoder,
};
use crate::config::ModelSettings;
use crate::types::Classification;

/// Immutable context shared by every message handler.
///
/// Built once at startup; cloning only bumps reference counts.
#[derive(Clone)]
pub struct ClassificationPipeline {
    normalizer: Arc<dyn TextNormalizer>,
    encoder: Arc<dyn SequenceEncoder>,
    classifier: Arc<dyn Classifier>,
    policy: DecisionPolicy,
}

impl ClassificationPipeline {
    pub fn new(
        normalizer: Arc<dyn TextNormalizer>,
        encoder: Arc<dyn SequenceEncoder>,
        classifier: Arc<dyn Classifier>,
        policy: DecisionPolicy,
    ) -> Result<Self, ModelStoreError> {
        if encoder.max_len() != classifier.input_width() {
            return Err(ModelStoreError::Incompatible(format!(
                "encoder produces {} ids but {} expects {}",
                encoder.max_len(),
                classifier.name(),
                classifier.input_width()
            )));
        }

        Ok(Self {
            normalizer,
            encoder,
            classifier,
            policy,
        })
    }

    /// normalize -> encode -> score -> decide
    pub fn classify(&self, text: &str) -> Result<Classification> {
        let normalized = self.normalizer.normalize(text);
        let sequence = self.encoder.encode(&normalized);
        let score = self
            .classifier
            .score(&sequence)
            .with_context(|| format!("{} failed to score sequence", self.classifier.name()))?;
        let decision = self.policy.decide(score);

        debug!(
            "Classified '{}' ({} tokens) -> {} {:?}",
            normalized,
            sequence.token_count(),
            score,
            decision
        );

        Ok(Classification {
            normalized,
            sequence,
            score,
            decision,
        })
    }

    pub fn max_len(&self) -> usize {
        self.encoder.max_len()
    }

    pub fn policy(&self) -> DecisionPolicy {
        self.policy
    }
}

/// Loads and cross-checks the frozen artifacts under the model directory
pub struct ModelStore {
    settings: ModelSettings,
}

impl ModelStore {
    pub fn new(settings: ModelSettings) -> Self {
        Self { settings }
    }

    pub fn load_pipeline(&self, policy: DecisionPolicy) -> Result<ClassificationPipeline> {
        info!("Loading model store from {}", self.settings.model_dir.display());

        let classifier = LstmClassifier::load(&self.settings.config_path(), &self.settings.weights_path())?;
        let vocabulary = Vocabulary::load(&self.settings.vocabulary_path())?;

        let vocab_size = classifier.config().vocab_size;
        let max_id = vocabulary.max_encodable_id();
        if max_id as usize >= vocab_size {
            return Err(ModelStoreError::Incompatible(format!(
                "vocabulary can emit id {} but the embedding has only {} rows",
                max_id, vocab_size
            ))
            .into());
        }

        let smoke = classifier.smoke_test()?;
        info!("Smoke inference on empty input scored {}", smoke);

        let stopwords = match self.settings.stopwords_path() {
            Some(path) => StopwordSet::from_file(&path)?,
            None => StopwordSet::indonesian(),
        };

        // Without roots the stemmer is the identity, which no longer matches training
        let dictionary_path = self.settings.root_dictionary_path();
        if !dictionary_path.exists() {
            return Err(ModelStoreError::Io {
                path: dictionary_path,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "root dictionary not found"),
            }
            .into());
        }
        let dictionary = RootDictionary::from_file(&dictionary_path)?;
        if dictionary.is_empty() {
            return Err(ModelStoreError::EmptyDictionary { path: dictionary_path }.into());
        }

        let stemmer = Arc::new(IndonesianStemmer::new(dictionary)?);
        let normalizer = StandardNormalizer::new(stopwords, stemmer)?;
        let encoder = VocabularyEncoder::new(
            Arc::new(vocabulary),
            classifier.input_width(),
            self.settings.truncation,
        );

        let pipeline = ClassificationPipeline::new(
            Arc::new(normalizer),
            Arc::new(encoder),
            Arc::new(classifier),
            policy,
        )?;

        info!(
            "Classification pipeline ready: max_len {}, threshold {}",
            pipeline.max_len(),
            policy.threshold()
        );
        Ok(pipeline)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::types::{EncodedSequence, Score};
    use std::collections::HashMap;

    /// Scores `hit` when any listed id occurs in the sequence, `miss` otherwise
    pub struct KeywordClassifier {
        pub width: usize,
        pub spam_ids: Vec<u32>,
        pub hit: f32,
        pub miss: f32,
    }

    impl Classifier for KeywordClassifier {
        fn score(&self, sequence: &EncodedSequence) -> Result<Score> {
            let hit = sequence.as_slice().iter().any(|id| self.spam_ids.contains(id));
            Score::new(if hit { self.hit } else { self.miss }).map_err(anyhow::Error::msg)
        }

        fn input_width(&self) -> usize {
            self.width
        }
    }

    pub fn gambling_vocabulary() -> Vocabulary {
        let words = [("<OOV>", 1), ("slot", 2), ("gacor", 3), ("klik", 4), ("main", 5), ("selamat", 6), ("pagi", 7)];
        let index: HashMap<String, u32> = words.iter().map(|(w, id)| (w.to_string(), *id)).collect();
        Vocabulary::new(index, Some("<OOV>"), None).unwrap()
    }

    /// Pipeline whose classifier flags "slot" and "gacor"
    pub fn keyword_pipeline(threshold: f32) -> ClassificationPipeline {
        let stemmer = IndonesianStemmer::new(RootDictionary::from_words(["main"])).unwrap();
        let normalizer = StandardNormalizer::new(StopwordSet::indonesian(), Arc::new(stemmer)).unwrap();
        let encoder = VocabularyEncoder::new(Arc::new(gambling_vocabulary()), 8, Default::default());
        let classifier = KeywordClassifier {
            width: 8,
            spam_ids: vec![2, 3],
            hit: 0.93,
            miss: 0.04,
        };
        ClassificationPipeline::new(
            Arc::new(normalizer),
            Arc::new(encoder),
            Arc::new(classifier),
            DecisionPolicy::new(threshold).unwrap(),
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::classifier::{ModelConfig, Truncation};
    use crate::types::Decision;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};
    use std::path::Path;

    fn zero_pipeline() -> ClassificationPipeline {
        let config = ModelConfig {
            input_width: 8,
            vocab_size: 8,
            embedding_dim: 4,
            hidden_dim: 4,
            dense_units: vec![],
        };
        let classifier =
            LstmClassifier::from_var_builder(config, VarBuilder::zeros(DType::F32, &Device::Cpu)).unwrap();
        let stemmer = IndonesianStemmer::new(RootDictionary::empty()).unwrap();
        let normalizer = StandardNormalizer::new(StopwordSet::indonesian(), Arc::new(stemmer)).unwrap();
        let encoder = VocabularyEncoder::new(Arc::new(gambling_vocabulary()), 8, Truncation::Pre);
        ClassificationPipeline::new(
            Arc::new(normalizer),
            Arc::new(encoder),
            Arc::new(classifier),
            DecisionPolicy::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_gambling_promo_is_suppressed() {
        let pipeline = keyword_pipeline(0.5);
        let result = pipeline.classify("FREE SLOT GACOR klik http://bit.ly/x").unwrap();
        assert_eq!(result.normalized, "free slot gacor klik");
        assert_eq!(result.sequence.as_slice(), &[1, 2, 3, 4, 0, 0, 0, 0]);
        assert_eq!(result.decision, Decision::Suppress);
    }

    #[test]
    fn test_greeting_is_allowed() {
        let pipeline = zero_pipeline();
        let result = pipeline.classify("selamat pagi semua").unwrap();
        assert!(result.score.value() <= 0.5);
        assert_eq!(result.decision, Decision::Allow);
        assert_eq!(result.sequence.len(), 8);
    }

    #[test]
    fn test_empty_message() {
        let pipeline = zero_pipeline();
        let result = pipeline.classify("").unwrap();
        assert_eq!(result.normalized, "");
        assert!(result.sequence.is_all_padding());
        assert_eq!(result.sequence.len(), pipeline.max_len());
        assert!((0.0..=1.0).contains(&result.score.value()));
    }

    #[test]
    fn test_width_mismatch_rejected() {
        let stemmer = IndonesianStemmer::new(RootDictionary::empty()).unwrap();
        let normalizer = StandardNormalizer::new(StopwordSet::empty(), Arc::new(stemmer)).unwrap();
        let encoder = VocabularyEncoder::new(Arc::new(gambling_vocabulary()), 10, Truncation::Pre);
        let classifier = KeywordClassifier {
            width: 8,
            spam_ids: vec![],
            hit: 1.0,
            miss: 0.0,
        };
        let result = ClassificationPipeline::new(
            Arc::new(normalizer),
            Arc::new(encoder),
            Arc::new(classifier),
            DecisionPolicy::default(),
        );
        assert!(matches!(result, Err(ModelStoreError::Incompatible(_))));
    }

    fn write_store(dir: &Path, vocab_size: usize, vocabulary_json: &str) {
        let config = ModelConfig {
            input_width: 6,
            vocab_size,
            embedding_dim: 4,
            hidden_dim: 3,
            dense_units: vec![2],
        };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        LstmClassifier::from_var_builder(config.clone(), vb).unwrap();
        varmap.save(dir.join("model.safetensors")).unwrap();
        std::fs::write(dir.join("model.json"), serde_json::to_string(&config).unwrap()).unwrap();
        std::fs::write(dir.join("vocabulary.json"), vocabulary_json).unwrap();
        std::fs::write(dir.join("kata-dasar.txt"), "main\nmenang\n").unwrap();
    }

    #[test]
    fn test_model_store_loads_complete_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        write_store(dir.path(), 8, r#"{"word_index": {"<OOV>": 1, "slot": 2, "main": 3}, "oov_token": "<OOV>"}"#);

        let store = ModelStore::new(ModelSettings {
            model_dir: dir.path().to_path_buf(),
            ..ModelSettings::default()
        });
        let pipeline = store.load_pipeline(DecisionPolicy::default()).unwrap();
        assert_eq!(pipeline.max_len(), 6);

        let result = pipeline.classify("Ayo bermain slot").unwrap();
        assert_eq!(result.normalized, "ayo main slot");
        assert_eq!(result.sequence.as_slice(), &[1, 3, 2, 0, 0, 0]);
    }

    #[test]
    fn test_model_store_rejects_ids_beyond_embedding() {
        let dir = tempfile::tempdir().unwrap();
        write_store(dir.path(), 4, r#"{"word_index": {"slot": 2, "gacor": 7}}"#);

        let store = ModelStore::new(ModelSettings {
            model_dir: dir.path().to_path_buf(),
            ..ModelSettings::default()
        });
        let error = store.load_pipeline(DecisionPolicy::default()).err().unwrap();
        assert!(matches!(
            error.downcast_ref::<ModelStoreError>(),
            Some(ModelStoreError::Incompatible(_))
        ));
    }

    #[test]
    fn test_model_store_requires_root_dictionary() {
        let dir = tempfile::tempdir().unwrap();
        write_store(dir.path(), 8, r#"{"word_index": {"<OOV>": 1, "main": 2, "menang": 3}, "oov_token": "<OOV>"}"#);
        let settings = ModelSettings {
            model_dir: dir.path().to_path_buf(),
            ..ModelSettings::default()
        };

        std::fs::remove_file(dir.path().join("kata-dasar.txt")).unwrap();
        let error = ModelStore::new(settings.clone())
            .load_pipeline(DecisionPolicy::default())
            .err()
            .unwrap();
        assert!(matches!(
            error.downcast_ref::<ModelStoreError>(),
            Some(ModelStoreError::Io { .. })
        ));

        std::fs::write(dir.path().join("kata-dasar.txt"), "\n  \n").unwrap();
        let error = ModelStore::new(settings.clone())
            .load_pipeline(DecisionPolicy::default())
            .err()
            .unwrap();
        assert!(matches!(
            error.downcast_ref::<ModelStoreError>(),
            Some(ModelStoreError::EmptyDictionary { .. })
        ));

        std::fs::write(dir.path().join("kata-dasar.txt"), "main\nmenang\n").unwrap();
        let pipeline = ModelStore::new(settings).load_pipeline(DecisionPolicy::default()).unwrap();
        let result = pipeline.classify("bermain kemenangan").unwrap();
        assert_eq!(result.normalized, "main menang");
        assert_eq!(result.sequence.as_slice(), &[2, 3, 0, 0, 0, 0]);
    }

    #[test]
    fn test_model_store_missing_directory() {
        let store = ModelStore::new(ModelSettings {
            model_dir: "/nonexistent/model".into(),
            ..ModelSettings::default()
        });
        assert!(store.load_pipeline(DecisionPolicy::default()).is_err());
    }
}
