//! # Bidirectional LSTM Network
//!
//! Embedding lookup, a stack of forward LSTMs and a stack of backward LSTMs
//! (reading the time-reversed sequence), concatenation of both final hidden
//! states and a dense output layer. Uses candle for all tensor work.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use candle_core::{D, DType, Device, Module, Tensor, Var};
use candle_nn::rnn::{LSTM, LSTMConfig, RNN};
use candle_nn::{Embedding, Linear, VarBuilder, VarMap};
use oorandom::Rand32;
use tracing::{debug, info};

use crate::config::ModelConfig;
use crate::error::{Result, SpanLstmError};

const EMBEDDING_PREFIX: &str = "embedding";
const FORWARD_PREFIX: &str = "forward_lstm";
const BACKWARD_PREFIX: &str = "backward_lstm";
const OUTPUT_PREFIX: &str = "dense_output";

/// Activation applied to the output layer at prediction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputActivation {
    Sigmoid,
    Softmax,
}

/// Training objective, chosen by output arity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    BinaryCrossEntropy,
    CategoricalCrossEntropy,
}

/// Bidirectional LSTM classifier over feature id sequences.
pub struct BiLstmNetwork {
    embedding: Embedding,
    forward_layers: Vec<LSTM>,
    backward_layers: Vec<LSTM>,
    output: Linear,
    recurrent_kernels: Vec<Tensor>,
    varmap: VarMap,
    vocab_size: usize,
    embed_dim: usize,
    layers: Vec<usize>,
    num_outputs: usize,
    device: Device,
}

impl BiLstmNetwork {
    /// Build a freshly initialized network.
    ///
    /// # Arguments
    /// * `vocab_size` - Number of embedding rows; must exceed every feature id fed in
    /// * `num_outputs` - 1 for a binary outcome, otherwise the number of classes
    /// * `config` - Layer widths and embedding dimension
    /// * `device` - Where the weights live
    ///
    /// # Errors
    /// [`SpanLstmError::EmptyLayers`] when `config.layers` is empty, and
    /// [`SpanLstmError::InvalidConfig`] for zero sizes.
    pub fn build(
        vocab_size: usize,
        num_outputs: usize,
        config: &ModelConfig,
        device: &Device,
    ) -> Result<Self> {
        config.validate()?;
        if vocab_size == 0 || num_outputs == 0 {
            return Err(SpanLstmError::InvalidConfig(format!(
                "vocab_size ({vocab_size}) and num_outputs ({num_outputs}) must be positive"
            )));
        }

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let embedding = candle_nn::embedding(vocab_size, config.embed_dim, vb.pp(EMBEDDING_PREFIX))?;

        let mut forward_layers = Vec::with_capacity(config.layers.len());
        let mut backward_layers = Vec::with_capacity(config.layers.len());
        let mut in_dim = config.embed_dim;
        for (i, &width) in config.layers.iter().enumerate() {
            forward_layers.push(candle_nn::lstm(
                in_dim,
                width,
                LSTMConfig::default(),
                vb.pp(format!("{FORWARD_PREFIX}.{i}")),
            )?);
            backward_layers.push(candle_nn::lstm(
                in_dim,
                width,
                LSTMConfig::default(),
                vb.pp(format!("{BACKWARD_PREFIX}.{i}")),
            )?);
            in_dim = width;
        }

        // Concatenated final states of both directions.
        let output = candle_nn::linear(2 * in_dim, num_outputs, vb.pp(OUTPUT_PREFIX))?;

        let recurrent_kernels = {
            let vars = lock_vars(&varmap)?;
            let mut kernels: Vec<_> = vars
                .iter()
                .filter(|(name, _)| is_recurrent_kernel(name))
                .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
                .collect();
            kernels.sort_by(|a, b| a.0.cmp(&b.0));
            kernels.into_iter().map(|(_, t)| t).collect()
        };

        debug!(
            "Built BiLSTM: vocab={} embed={} layers={:?} outputs={}",
            vocab_size, config.embed_dim, config.layers, num_outputs
        );

        Ok(Self {
            embedding,
            forward_layers,
            backward_layers,
            output,
            recurrent_kernels,
            varmap,
            vocab_size,
            embed_dim: config.embed_dim,
            layers: config.layers.clone(),
            num_outputs,
            device: device.clone(),
        })
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn embed_dim(&self) -> usize {
        self.embed_dim
    }

    pub fn layers(&self) -> &[usize] {
        &self.layers
    }

    /// Width of the dense output layer.
    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn output_activation(&self) -> OutputActivation {
        if self.num_outputs == 1 {
            OutputActivation::Sigmoid
        } else {
            OutputActivation::Softmax
        }
    }

    pub fn objective(&self) -> Objective {
        match self.output_activation() {
            OutputActivation::Sigmoid => Objective::BinaryCrossEntropy,
            OutputActivation::Softmax => Objective::CategoricalCrossEntropy,
        }
    }

    /// Embedding matrix of shape `[vocab_size, embed_dim]`.
    pub fn embeddings(&self) -> &Tensor {
        self.embedding.embeddings()
    }

    /// Trainable variables, for the optimizer.
    pub fn all_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    /// Raw output scores of shape `[batch, num_outputs]`.
    ///
    /// `ids` is a `u32` tensor of shape `[batch, seq_len]`.
    pub fn forward(&self, ids: &Tensor) -> Result<Tensor> {
        let embedded = self.embedding.forward(ids)?;
        let forward = final_hidden_state(&self.forward_layers, &embedded)?;
        let backward = final_hidden_state(&self.backward_layers, &reverse_time(&embedded)?)?;
        let merged = Tensor::cat(&[&forward, &backward], 1)?;
        Ok(self.output.forward(&merged)?)
    }

    /// Output probabilities after the sigmoid or softmax activation.
    pub fn predict_proba(&self, ids: &Tensor) -> Result<Tensor> {
        let logits = self.forward(ids)?;
        let probs = match self.output_activation() {
            OutputActivation::Sigmoid => candle_nn::ops::sigmoid(&logits)?,
            OutputActivation::Softmax => candle_nn::ops::softmax(&logits, D::Minus1)?,
        };
        Ok(probs)
    }

    /// Target tensor for the network's objective: `f32` for binary, `u32` class ids otherwise.
    pub fn targets(&self, outcomes: &[u32]) -> Result<Tensor> {
        let targets = match self.objective() {
            Objective::BinaryCrossEntropy => {
                let values: Vec<f32> = outcomes.iter().map(|&y| y as f32).collect();
                Tensor::new(values.as_slice(), &self.device)?
            }
            Objective::CategoricalCrossEntropy => Tensor::new(outcomes, &self.device)?,
        };
        Ok(targets)
    }

    /// Mean loss of `logits` against `targets` built by [`Self::targets`].
    pub fn loss(&self, logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
        let loss = match self.objective() {
            Objective::BinaryCrossEntropy => binary_cross_entropy_with_logits(&logits.squeeze(1)?, targets)?,
            Objective::CategoricalCrossEntropy => candle_nn::loss::cross_entropy(logits, targets)?,
        };
        Ok(loss)
    }

    /// L2 penalty `l2 * sum(w^2)` over the recurrent input and hidden kernels.
    pub fn l2_penalty(&self, l2: f64) -> Result<Tensor> {
        let mut total = Tensor::zeros((), DType::F32, &self.device)?;
        for kernel in &self.recurrent_kernels {
            total = (total + kernel.sqr()?.sum_all()?)?;
        }
        Ok(total.affine(l2, 0.0)?)
    }

    /// Overwrite every weight with values drawn from `seed`.
    ///
    /// Matrices get Glorot-uniform values (embeddings uniform in ±0.05), biases
    /// zero except the LSTM forget gate, which starts at 1.
    pub fn initialize_weights(&self, seed: u64) -> Result<()> {
        let vars = lock_vars(&self.varmap)?;
        let mut names: Vec<&String> = vars.keys().collect();
        names.sort();

        let mut rng = Rand32::new(seed);
        for name in names {
            let var = &vars[name];
            let dims = var.dims().to_vec();
            let count = var.elem_count();

            let values: Vec<f32> = if dims.len() < 2 {
                let mut bias = vec![0.0f32; count];
                if name.contains("bias_ih") {
                    let hidden = count / 4;
                    bias[hidden..2 * hidden].fill(1.0);
                }
                bias
            } else {
                let limit = if name.starts_with(EMBEDDING_PREFIX) {
                    0.05
                } else {
                    let fan_out = dims[0];
                    let fan_in: usize = dims[1..].iter().product();
                    (6.0 / (fan_in + fan_out) as f32).sqrt()
                };
                (0..count).map(|_| (rng.rand_float() * 2.0 - 1.0) * limit).collect()
            };

            var.set(&Tensor::from_vec(values, dims, &self.device)?)?;
        }
        Ok(())
    }

    /// Replace the embedding matrix with pretrained weights from a safetensors file.
    ///
    /// The file must contain a tensor named `weight`, or exactly one tensor.
    pub fn load_embedding_weights(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut tensors = candle_core::safetensors::load(path, &self.device)?;
        let weights = match tensors.remove("weight") {
            Some(t) => t,
            None if tensors.len() == 1 => tensors.into_values().next().ok_or_else(|| {
                SpanLstmError::InvalidConfig(format!("no tensors in {}", path.display()))
            })?,
            None => {
                return Err(SpanLstmError::InvalidConfig(format!(
                    "{} has no 'weight' tensor",
                    path.display()
                )));
            }
        };

        let expected = vec![self.vocab_size, self.embed_dim];
        if weights.dims() != expected.as_slice() {
            return Err(SpanLstmError::EmbeddingShape {
                found: weights.dims().to_vec(),
                expected,
            });
        }

        let vars = lock_vars(&self.varmap)?;
        let name = format!("{EMBEDDING_PREFIX}.weight");
        let var = vars
            .get(&name)
            .ok_or_else(|| SpanLstmError::InvalidConfig(format!("network has no variable {name}")))?;
        var.set(&weights.to_dtype(DType::F32)?)?;
        info!("Using pre-trained embeddings from {:?}", path);
        Ok(())
    }

    /// Write all weights to a safetensors file.
    pub fn save_weights(&self, path: impl AsRef<Path>) -> Result<()> {
        self.varmap.save(path)?;
        Ok(())
    }

    /// Load weights from safetensors bytes written by [`Self::save_weights`].
    pub fn load_weights(&self, data: &[u8]) -> Result<()> {
        let tensors = candle_core::safetensors::load_buffer(data, &self.device)?;
        let vars = lock_vars(&self.varmap)?;
        for (name, var) in vars.iter() {
            let tensor = tensors.get(name).ok_or_else(|| {
                SpanLstmError::InvalidConfig(format!("weights have no tensor named {name}"))
            })?;
            if tensor.dims() != var.dims() {
                return Err(SpanLstmError::InvalidConfig(format!(
                    "tensor {name} has shape {:?}, expected {:?}",
                    tensor.dims(),
                    var.dims()
                )));
            }
            var.set(&tensor.to_dtype(DType::F32)?)?;
        }
        Ok(())
    }
}

fn lock_vars(varmap: &VarMap) -> Result<MutexGuard<'_, HashMap<String, Var>>> {
    lock(varmap.data())
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|e| SpanLstmError::Candle(candle_core::Error::Msg(format!("weights lock poisoned: {e}"))))
}

fn is_recurrent_kernel(name: &str) -> bool {
    (name.starts_with(FORWARD_PREFIX) || name.starts_with(BACKWARD_PREFIX)) && name.contains(".weight_")
}

/// Run a stack of LSTMs and return the last hidden state of the top layer.
fn final_hidden_state(layers: &[LSTM], input: &Tensor) -> candle_core::Result<Tensor> {
    let mut x = input.clone();
    for (i, layer) in layers.iter().enumerate() {
        let states = layer.seq(&x)?;
        if i + 1 == layers.len() {
            let Some(last) = states.last() else {
                candle_core::bail!("cannot run an LSTM over an empty sequence");
            };
            return Ok(last.h().clone());
        }
        x = layer.states_to_tensor(&states)?;
    }
    candle_core::bail!("no recurrent layers")
}

/// Reverse a `[batch, seq_len, features]` tensor along the time axis.
fn reverse_time(x: &Tensor) -> candle_core::Result<Tensor> {
    let seq_len = x.dim(1)? as u32;
    let idx: Vec<u32> = (0..seq_len).rev().collect();
    let idx = Tensor::new(idx.as_slice(), x.device())?;
    x.index_select(&idx, 1)
}

/// Numerically stable `mean(max(x, 0) - x * t + ln(1 + e^-|x|))`.
fn binary_cross_entropy_with_logits(logits: &Tensor, targets: &Tensor) -> candle_core::Result<Tensor> {
    let positive = logits.relu()?;
    let overlap = (logits * targets)?;
    let softplus = logits.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    ((positive - overlap)? + softplus)?.mean_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> ModelConfig {
        ModelConfig::default().with_layers(vec![6]).with_embed_dim(4)
    }

    fn ids(rows: &[&[u32]]) -> Tensor {
        let seq_len = rows[0].len();
        let flat: Vec<u32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Tensor::from_vec(flat, (rows.len(), seq_len), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_single_output_uses_sigmoid() {
        let config = ModelConfig::default().with_layers(vec![100]).with_embed_dim(100);
        let net = BiLstmNetwork::build(20, 1, &config, &Device::Cpu).unwrap();

        assert_eq!(net.num_outputs(), 1);
        assert_eq!(net.output_activation(), OutputActivation::Sigmoid);
        assert_eq!(net.objective(), Objective::BinaryCrossEntropy);

        let out = net.predict_proba(&ids(&[&[0, 3, 4, 0]])).unwrap();
        assert_eq!(out.dims(), &[1, 1]);
    }

    #[test]
    fn test_multi_output_uses_softmax() {
        let net = BiLstmNetwork::build(20, 4, &small_config(), &Device::Cpu).unwrap();
        assert_eq!(net.num_outputs(), 4);
        assert_eq!(net.output_activation(), OutputActivation::Softmax);
        assert_eq!(net.objective(), Objective::CategoricalCrossEntropy);

        let out = net.predict_proba(&ids(&[&[2, 3, 4], &[5, 6, 0]])).unwrap();
        assert_eq!(out.dims(), &[2, 4]);
        let sums: Vec<f32> = out.sum(1).unwrap().to_vec1().unwrap();
        for s in sums {
            assert!((s - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_empty_layers_fail() {
        let config = ModelConfig::default().with_layers(vec![]);
        let result = BiLstmNetwork::build(10, 1, &config, &Device::Cpu);
        assert!(matches!(result, Err(SpanLstmError::EmptyLayers)));
    }

    #[test]
    fn test_stacked_layers_forward() {
        let config = small_config().with_layers(vec![5, 3]);
        let net = BiLstmNetwork::build(12, 3, &config, &Device::Cpu).unwrap();
        let logits = net.forward(&ids(&[&[1, 2, 3, 4, 5]])).unwrap();
        assert_eq!(logits.dims(), &[1, 3]);
    }

    #[test]
    fn test_initialize_weights_is_deterministic() {
        let a = BiLstmNetwork::build(15, 1, &small_config(), &Device::Cpu).unwrap();
        let b = BiLstmNetwork::build(15, 1, &small_config(), &Device::Cpu).unwrap();
        a.initialize_weights(3).unwrap();
        b.initialize_weights(3).unwrap();

        let input = ids(&[&[0, 7, 8, 9, 0]]);
        let pa: Vec<f32> = a.predict_proba(&input).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        let pb: Vec<f32> = b.predict_proba(&input).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(pa, pb);
    }

    #[test]
    fn test_binary_loss_matches_reference() {
        let net = BiLstmNetwork::build(5, 1, &small_config(), &Device::Cpu).unwrap();
        let logits = Tensor::new(&[[0.0f32], [2.0]], &Device::Cpu).unwrap();
        let targets = net.targets(&[1, 0]).unwrap();
        let loss: f32 = net.loss(&logits, &targets).unwrap().to_scalar().unwrap();

        // ln 2 for logit 0, ln(1 + e^2) for a wrong confident prediction.
        let expected = (2f32.ln() + (1.0 + 2f32.exp()).ln()) / 2.0;
        assert!((loss - expected).abs() < 1e-5);
    }

    #[test]
    fn test_weights_round_trip_through_safetensors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.safetensors");

        let a = BiLstmNetwork::build(9, 2, &small_config(), &Device::Cpu).unwrap();
        a.initialize_weights(17).unwrap();
        a.save_weights(&path).unwrap();

        let b = BiLstmNetwork::build(9, 2, &small_config(), &Device::Cpu).unwrap();
        b.load_weights(&std::fs::read(&path).unwrap()).unwrap();

        let input = ids(&[&[2, 3, 4, 5]]);
        let pa: Vec<f32> = a.predict_proba(&input).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        let pb: Vec<f32> = b.predict_proba(&input).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(pa, pb);
    }

    #[test]
    fn test_pretrained_embedding_shape_checked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embeddings.safetensors");
        let wrong = Tensor::zeros((3, 4), DType::F32, &Device::Cpu).unwrap();
        candle_core::safetensors::save(&HashMap::from([("weight".to_string(), wrong)]), &path).unwrap();

        let net = BiLstmNetwork::build(9, 1, &small_config(), &Device::Cpu).unwrap();
        let err = net.load_embedding_weights(&path).unwrap_err();
        assert!(matches!(err, SpanLstmError::EmbeddingShape { .. }));
    }

    #[test]
    fn test_l2_penalty_is_positive_after_init() {
        let net = BiLstmNetwork::build(9, 1, &small_config(), &Device::Cpu).unwrap();
        net.initialize_weights(5).unwrap();
        let penalty: f32 = net.l2_penalty(0.01).unwrap().to_scalar().unwrap();
        assert!(penalty > 0.0);
    }
}
