//! # Model Configuration
//!
//! Hyperparameters for the bidirectional LSTM and the discrete candidate
//! sets random search draws from.

use std::path::{Path, PathBuf};

use oorandom::Rand32;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpanLstmError};

/// Gradient descent algorithm used to fit the network.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerConfig {
    Adam { learning_rate: f64 },
    Sgd { learning_rate: f64 },
}

impl OptimizerConfig {
    pub fn learning_rate(&self) -> f64 {
        match self {
            Self::Adam { learning_rate } | Self::Sgd { learning_rate } => *learning_rate,
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::Adam {
            learning_rate: 0.001,
        }
    }
}

/// Network and training hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Hidden width of each stacked LSTM layer (applied to both directions).
    pub layers: Vec<usize>,
    /// Embedding dimension.
    pub embed_dim: usize,
    /// Mini-batch size.
    pub batch_size: usize,
    /// Optimizer and its learning rate.
    pub optimizer: OptimizerConfig,
    /// L2 coefficient on the recurrent input and hidden kernels.
    pub regularizer: Option<f64>,
    /// Safetensors file holding a `(vocab_size, embed_dim)` embedding matrix.
    pub embedding_weights: Option<PathBuf>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            layers: vec![100],
            embed_dim: 100,
            batch_size: 64,
            optimizer: OptimizerConfig::default(),
            regularizer: None,
            embedding_weights: None,
        }
    }
}

impl ModelConfig {
    /// Load a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn with_layers(mut self, layers: Vec<usize>) -> Self {
        self.layers = layers;
        self
    }

    pub fn with_embed_dim(mut self, embed_dim: usize) -> Self {
        self.embed_dim = embed_dim;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_regularizer(mut self, l2: Option<f64>) -> Self {
        self.regularizer = l2;
        self
    }

    /// Reject configurations no network can be built from.
    pub fn validate(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(SpanLstmError::EmptyLayers);
        }
        if self.layers.contains(&0) {
            return Err(SpanLstmError::InvalidConfig("layer width must be positive".into()));
        }
        if self.embed_dim == 0 {
            return Err(SpanLstmError::InvalidConfig("embed_dim must be positive".into()));
        }
        if self.batch_size == 0 {
            return Err(SpanLstmError::InvalidConfig("batch_size must be positive".into()));
        }
        Ok(())
    }
}

/// Candidate values random search samples from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub layers: Vec<Vec<usize>>,
    pub embed_dims: Vec<usize>,
    pub batch_sizes: Vec<usize>,
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self {
            layers: vec![vec![50], vec![100], vec![200], vec![500], vec![1000]],
            embed_dims: vec![10, 25, 50, 100, 200],
            batch_sizes: vec![32, 64, 128, 256],
        }
    }
}

impl SearchSpace {
    /// Draw one configuration, choosing uniformly from each candidate set.
    ///
    /// Fields without candidates keep their [`ModelConfig::default`] values.
    pub fn sample(&self, rng: &mut Rand32) -> ModelConfig {
        let defaults = ModelConfig::default();
        ModelConfig {
            layers: choose(rng, &self.layers).unwrap_or(defaults.layers),
            embed_dim: choose(rng, &self.embed_dims).unwrap_or(defaults.embed_dim),
            batch_size: choose(rng, &self.batch_sizes).unwrap_or(defaults.batch_size),
            ..defaults
        }
    }
}

fn choose<T: Clone>(rng: &mut Rand32, options: &[T]) -> Option<T> {
    if options.is_empty() {
        return None;
    }
    let idx = rng.rand_range(0..options.len() as u32) as usize;
    options.get(idx).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ModelConfig::default();
        assert_eq!(config.layers, vec![100]);
        assert_eq!(config.embed_dim, 100);
        assert_eq!(config.batch_size, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_layers_rejected() {
        let config = ModelConfig::default().with_layers(vec![]);
        assert!(matches!(config.validate(), Err(SpanLstmError::EmptyLayers)));
    }

    #[test]
    fn test_sample_draws_from_candidates() {
        let space = SearchSpace::default();
        let mut rng = Rand32::new(7);
        for _ in 0..50 {
            let config = space.sample(&mut rng);
            assert!(space.layers.contains(&config.layers));
            assert!(space.embed_dims.contains(&config.embed_dim));
            assert!(space.batch_sizes.contains(&config.batch_size));
        }
    }

    #[test]
    fn test_sample_is_seeded() {
        let space = SearchSpace::default();
        let a: Vec<_> = {
            let mut rng = Rand32::new(11);
            (0..5).map(|_| space.sample(&mut rng)).collect()
        };
        let b: Vec<_> = {
            let mut rng = Rand32::new(11);
            (0..5).map(|_| space.sample(&mut rng)).collect()
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_candidate_set_keeps_default() {
        let space = SearchSpace {
            layers: vec![],
            embed_dims: vec![16],
            batch_sizes: vec![],
        };
        let config = space.sample(&mut Rand32::new(1));
        assert_eq!(config.layers, vec![100]);
        assert_eq!(config.embed_dim, 16);
        assert_eq!(config.batch_size, 64);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ModelConfig =
            serde_json::from_str(r#"{"layers": [32, 16], "optimizer": {"kind": "sgd", "learning_rate": 0.1}}"#)
                .unwrap();
        assert_eq!(config.layers, vec![32, 16]);
        assert_eq!(config.embed_dim, 100);
        assert_eq!(config.optimizer, OptimizerConfig::Sgd { learning_rate: 0.1 });
    }
}
