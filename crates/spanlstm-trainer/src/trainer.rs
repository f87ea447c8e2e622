//! Training loop for the BiLSTM network.

use anyhow::Context;
use candle_core::{D, Device, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, SGD};
use oorandom::Rand32;
use spanlstm_core::{BiLstmNetwork, ModelConfig, OptimizerConfig, OutputActivation, decide_class};
use tracing::{debug, info, warn};

use crate::data::{Dataset, shuffle};

/// Settings shared by every training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainerSettings {
    /// Seed for weight initialization and batch order.
    pub seed: u64,
    /// Fraction of rows (taken from the end) used for validation.
    pub validation_split: f64,
    /// Epochs without validation improvement before stopping.
    pub patience: usize,
}

impl Default for TrainerSettings {
    fn default() -> Self {
        Self {
            seed: 42,
            validation_split: 0.1,
            patience: 2,
        }
    }
}

impl TrainerSettings {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_validation_split(mut self, fraction: f64) -> Self {
        self.validation_split = fraction.clamp(0.0, 1.0);
        self
    }

    pub fn with_patience(mut self, patience: usize) -> Self {
        self.patience = patience;
        self
    }
}

/// Loss and accuracy over a dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub loss: f32,
    pub accuracy: f32,
}

/// Result of a single training epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochResult {
    /// Epoch number (1-indexed).
    pub epoch: usize,
    /// Mean training loss over the epoch's batches.
    pub train_loss: f32,
    /// Validation metrics, when a validation split exists.
    pub validation: Option<Evaluation>,
}

/// Per-epoch results of one training run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochResult>,
    pub early_stopped: bool,
}

impl TrainingHistory {
    /// Lowest validation loss seen.
    pub fn best_validation_loss(&self) -> Option<f32> {
        self.epochs
            .iter()
            .filter_map(|e| e.validation.map(|v| v.loss))
            .min_by(f32::total_cmp)
    }

    pub fn last(&self) -> Option<&EpochResult> {
        self.epochs.last()
    }
}

/// Stops training once the monitored loss has not improved for `patience` epochs.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best: f32,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: f32::INFINITY,
            wait: 0,
        }
    }

    /// Record this epoch's loss; true when training should stop.
    pub fn should_stop(&mut self, loss: f32) -> bool {
        if loss < self.best {
            self.best = loss;
            self.wait = 0;
            return false;
        }
        self.wait += 1;
        self.wait >= self.patience
    }
}

enum StepOptimizer {
    Adam(AdamW),
    Sgd(SGD),
}

impl StepOptimizer {
    fn new(config: &OptimizerConfig, vars: Vec<Var>) -> candle_core::Result<Self> {
        match *config {
            OptimizerConfig::Adam { learning_rate } => {
                let params = ParamsAdamW {
                    lr: learning_rate,
                    weight_decay: 0.0,
                    ..Default::default()
                };
                AdamW::new(vars, params).map(Self::Adam)
            }
            OptimizerConfig::Sgd { learning_rate } => SGD::new(vars, learning_rate).map(Self::Sgd),
        }
    }

    fn backward_step(&mut self, loss: &Tensor) -> candle_core::Result<()> {
        match self {
            Self::Adam(opt) => opt.backward_step(loss),
            Self::Sgd(opt) => opt.backward_step(loss),
        }
    }
}

/// Build a network sized for `data` and fit it.
///
/// The vocabulary size and output arity are inferred from the data. The last
/// `settings.validation_split` of the rows are held out for validation and
/// early stopping; the rest are visited in a seeded random order each epoch.
pub fn train_model_for_data(
    data: &Dataset,
    epochs: usize,
    config: &ModelConfig,
    settings: &TrainerSettings,
) -> anyhow::Result<(BiLstmNetwork, TrainingHistory)> {
    if data.is_empty() {
        anyhow::bail!("cannot train on an empty dataset");
    }

    let network = BiLstmNetwork::build(data.vocab_size(), data.num_outputs(), config, &Device::Cpu)?;
    network.initialize_weights(settings.seed)?;
    if let Some(path) = &config.embedding_weights {
        network
            .load_embedding_weights(path)
            .with_context(|| format!("loading embeddings from {}", path.display()))?;
    }

    let (train, valid) = data.split_tail(settings.validation_split);
    if train.is_empty() {
        anyhow::bail!("validation split {} leaves no training rows", settings.validation_split);
    }
    info!(
        "Training on {} instances, validating on {} (vocab {}, outputs {}, config {:?})",
        train.len(),
        valid.len(),
        network.vocab_size(),
        network.num_outputs(),
        config
    );

    let mut optimizer = StepOptimizer::new(&config.optimizer, network.all_vars())?;
    let mut rng = Rand32::new(settings.seed);
    let mut stopper = EarlyStopping::new(settings.patience);
    let mut history = TrainingHistory::default();
    let mut order: Vec<usize> = (0..train.len()).collect();

    for epoch in 1..=epochs {
        shuffle(&mut order, &mut rng);

        let mut loss_sum = 0.0f64;
        for (step, batch) in order.chunks(config.batch_size).enumerate() {
            let (ids, targets) = train.batch(batch, &network)?;
            let logits = network.forward(&ids)?;
            let mut loss = network.loss(&logits, &targets)?;
            if let Some(l2) = config.regularizer {
                loss = (loss + network.l2_penalty(l2)?)?;
            }
            optimizer.backward_step(&loss)?;

            let batch_loss = loss.to_scalar::<f32>()?;
            loss_sum += f64::from(batch_loss) * batch.len() as f64;
            debug!("epoch {} step {} loss {:.4}", epoch, step + 1, batch_loss);
        }
        let train_loss = (loss_sum / train.len() as f64) as f32;

        let validation = if valid.is_empty() {
            None
        } else {
            Some(evaluate(&network, &valid, config.batch_size)?)
        };

        match validation {
            Some(v) => info!(
                "Epoch {}/{} - loss: {:.4} - val_loss: {:.4} - val_acc: {:.2}%",
                epoch,
                epochs,
                train_loss,
                v.loss,
                v.accuracy * 100.0
            ),
            None => info!("Epoch {}/{} - loss: {:.4}", epoch, epochs, train_loss),
        }

        history.epochs.push(EpochResult {
            epoch,
            train_loss,
            validation,
        });

        if let Some(v) = validation {
            if stopper.should_stop(v.loss) {
                warn!("Early stopping at epoch {}: val_loss has not improved", epoch);
                history.early_stopped = true;
                break;
            }
        }
    }

    Ok((network, history))
}

/// Mean loss and accuracy of `network` over `data`, in batches of `batch_size`.
pub fn evaluate(network: &BiLstmNetwork, data: &Dataset, batch_size: usize) -> anyhow::Result<Evaluation> {
    if data.is_empty() {
        anyhow::bail!("cannot evaluate on an empty dataset");
    }

    let indices: Vec<usize> = (0..data.len()).collect();
    let mut loss_sum = 0.0f64;
    let mut correct = 0usize;

    for batch in indices.chunks(batch_size.max(1)) {
        let (ids, targets) = data.batch(batch, network)?;
        let logits = network.forward(&ids)?.detach();
        let loss = network.loss(&logits, &targets)?.to_scalar::<f32>()?;
        loss_sum += f64::from(loss) * batch.len() as f64;

        let probs = match network.output_activation() {
            OutputActivation::Sigmoid => candle_nn::ops::sigmoid(&logits)?,
            OutputActivation::Softmax => candle_nn::ops::softmax(&logits, D::Minus1)?,
        };
        let probs = probs.to_vec2::<f32>()?;
        correct += probs
            .iter()
            .zip(batch)
            .filter(|&(row, &i)| decide_class(row) == data.outcomes()[i] as usize)
            .count();
    }

    Ok(Evaluation {
        loss: (loss_sum / data.len() as f64) as f32,
        accuracy: correct as f32 / data.len() as f32,
    })
}
