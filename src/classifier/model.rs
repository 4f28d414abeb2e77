// src/classifier/model.rs - Frozen LSTM spam classifier running on candle

use anyhow::{bail, Result};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::rnn::{LSTMConfig, LSTM, RNN};
use candle_nn::{Embedding, Linear, VarBuilder};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::classifier::{Classifier, ModelStoreError};
use crate::types::{EncodedSequence, Score};

/// Architecture description stored next to the weights as `model.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Sequence length the network was trained on (MAX_LEN)
    pub input_width: usize,
    pub vocab_size: usize,
    pub embedding_dim: usize,
    pub hidden_dim: usize,
    /// Hidden ReLU layers between the LSTM and the sigmoid unit
    #[serde(default)]
    pub dense_units: Vec<usize>,
}

impl ModelConfig {
    pub fn load(path: &Path) -> Result<Self, ModelStoreError> {
        let content = std::fs::read_to_string(path).map_err(|source| ModelStoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ModelConfig = serde_json::from_str(&content)
            .map_err(|e| ModelStoreError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ModelStoreError> {
        let dimensions = [
            ("input_width", self.input_width),
            ("vocab_size", self.vocab_size),
            ("embedding_dim", self.embedding_dim),
            ("hidden_dim", self.hidden_dim),
        ];
        for (name, value) in dimensions {
            if value == 0 {
                return Err(ModelStoreError::InvalidConfig(format!("{} must be positive", name)));
            }
        }
        if let Some(position) = self.dense_units.iter().position(|&units| units == 0) {
            return Err(ModelStoreError::InvalidConfig(format!(
                "dense layer {} has zero units",
                position
            )));
        }
        Ok(())
    }
}

/// Embedding -> LSTM (last hidden state) -> ReLU dense stack -> sigmoid.
///
/// Weight names follow the `torch.nn` convention: `embedding.weight`,
/// `lstm.{weight_ih_l0,weight_hh_l0,bias_ih_l0,bias_hh_l0}` with gates ordered
/// input, forget, cell, output; `dense.{i}.{weight,bias}`; `output.{weight,bias}`.
/// Padding positions run through the LSTM like any other token.
pub struct LstmClassifier {
    config: ModelConfig,
    embedding: Embedding,
    lstm: LSTM,
    dense: Vec<Linear>,
    output: Linear,
    device: Device,
}

impl LstmClassifier {
    pub fn from_var_builder(config: ModelConfig, vb: VarBuilder) -> Result<Self, ModelStoreError> {
        config.validate()?;
        let device = vb.device().clone();

        let embedding = candle_nn::embedding(config.vocab_size, config.embedding_dim, vb.pp("embedding"))?;
        let lstm = candle_nn::rnn::lstm(
            config.embedding_dim,
            config.hidden_dim,
            LSTMConfig::default(),
            vb.pp("lstm"),
        )?;

        let mut dense = Vec::with_capacity(config.dense_units.len());
        let mut width = config.hidden_dim;
        for (index, &units) in config.dense_units.iter().enumerate() {
            dense.push(candle_nn::linear(width, units, vb.pp(format!("dense.{}", index)))?);
            width = units;
        }
        let output = candle_nn::linear(width, 1, vb.pp("output"))?;

        Ok(Self {
            config,
            embedding,
            lstm,
            dense,
            output,
            device,
        })
    }

    /// Load `model.json` + `model.safetensors` on the CPU
    pub fn load(config_path: &Path, weights_path: &Path) -> Result<Self, ModelStoreError> {
        let config = ModelConfig::load(config_path)?;
        if !weights_path.exists() {
            return Err(ModelStoreError::Io {
                path: weights_path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "weights file not found"),
            });
        }

        let device = Device::Cpu;
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, &device)? };
        let classifier = Self::from_var_builder(config, vb)?;

        info!(
            "Loaded LSTM classifier from {} (input width {}, vocab {}, embedding {}, hidden {}, dense {:?})",
            weights_path.display(),
            classifier.config.input_width,
            classifier.config.vocab_size,
            classifier.config.embedding_dim,
            classifier.config.hidden_dim,
            classifier.config.dense_units
        );
        Ok(classifier)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Score an all-padding sequence; a corrupt artifact shows up here
    /// rather than on the first real message.
    pub fn smoke_test(&self) -> Result<Score, ModelStoreError> {
        let padding = EncodedSequence::new(vec![EncodedSequence::PADDING_ID; self.config.input_width]);
        let probability = self.forward(padding.as_slice())?;
        let score = Score::new(probability).map_err(ModelStoreError::SmokeTest)?;
        debug!("Smoke inference on padding scored {}", score);
        Ok(score)
    }

    fn forward(&self, ids: &[u32]) -> candle_core::Result<f32> {
        let input = Tensor::new(ids, &self.device)?.unsqueeze(0)?;
        let embedded = self.embedding.forward(&input)?;

        let states = self.lstm.seq(&embedded)?;
        let last = states
            .last()
            .ok_or_else(|| candle_core::Error::Msg("empty input sequence".to_string()))?;

        let mut hidden = last.h().clone();
        for layer in &self.dense {
            hidden = layer.forward(&hidden)?.relu()?;
        }

        let logit = self.output.forward(&hidden)?;
        candle_nn::ops::sigmoid(&logit)?.reshape(())?.to_scalar::<f32>()
    }
}

impl Classifier for LstmClassifier {
    fn score(&self, sequence: &EncodedSequence) -> Result<Score> {
        if sequence.len() != self.config.input_width {
            bail!(
                "sequence length {} does not match model input width {}",
                sequence.len(),
                self.config.input_width
            );
        }
        let probability = self.forward(sequence.as_slice())?;
        Score::new(probability).map_err(anyhow::Error::msg)
    }

    fn input_width(&self) -> usize {
        self.config.input_width
    }

    fn name(&self) -> &str {
        "lstm"
    }
}
