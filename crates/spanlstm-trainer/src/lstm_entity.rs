//! The bidirectional LSTM entity classifier as a trainable, optimizable model.

use std::path::{Path, PathBuf};

use anyhow::Context;
use candle_core::Device;
use oorandom::Rand32;
use spanlstm_core::{
    BiLstmNetwork, EntityModel, ModelConfig, SearchSpace, Vocabulary, read_token_sequence_data,
};
use tracing::info;

use crate::data::Dataset;
use crate::search::OptimizableModel;
use crate::trainer::{self, TrainerSettings, TrainingHistory};

/// Trains BiLSTM entity classifiers from a working directory.
#[derive(Debug, Clone, Default)]
pub struct LstmEntityModel {
    search_space: SearchSpace,
    settings: TrainerSettings,
}

impl LstmEntityModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search_space(mut self, search_space: SearchSpace) -> Self {
        self.search_space = search_space;
        self
    }

    pub fn with_settings(mut self, settings: TrainerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &TrainerSettings {
        &self.settings
    }

    /// Read `training-data.liblinear` from `working_dir`.
    pub fn read_training_instances(&self, working_dir: impl AsRef<Path>) -> anyhow::Result<(Dataset, Vocabulary)> {
        let working_dir = working_dir.as_ref();
        let data = read_token_sequence_data(working_dir)
            .with_context(|| format!("reading training data from {}", working_dir.display()))?;
        Ok((Dataset::from_token_sequences(&data), data.vocabulary))
    }

    /// An untrained network for the given vocabulary size and output width.
    pub fn get_model(&self, vocab_size: usize, num_outputs: usize, config: &ModelConfig) -> anyhow::Result<BiLstmNetwork> {
        Ok(BiLstmNetwork::build(vocab_size, num_outputs, config, &Device::Cpu)?)
    }

    pub fn train_model_for_data(
        &self,
        data: &Dataset,
        epochs: usize,
        config: &ModelConfig,
    ) -> anyhow::Result<(BiLstmNetwork, TrainingHistory)> {
        trainer::train_model_for_data(data, epochs, config, &self.settings)
    }

    pub fn write_model(&self, working_dir: impl AsRef<Path>, model: &EntityModel) -> anyhow::Result<PathBuf> {
        let working_dir = working_dir.as_ref();
        model
            .write(working_dir)
            .with_context(|| format!("writing model bundle to {}", working_dir.display()))
    }

    /// Read the training data in `working_dir`, fit a network and bundle it
    /// with the vocabulary.
    pub fn train(&self, working_dir: impl AsRef<Path>, epochs: usize, config: &ModelConfig) -> anyhow::Result<EntityModel> {
        let (data, vocabulary) = self.read_training_instances(working_dir)?;
        let (network, history) = self.train_model_for_data(&data, epochs, config)?;
        if let Some(best) = history.best_validation_loss() {
            info!("Best validation loss {:.4} after {} epochs", best, history.epochs.len());
        }
        Ok(EntityModel::new(config.clone(), vocabulary, network))
    }
}

impl OptimizableModel for LstmEntityModel {
    fn random_config(&self, rng: &mut Rand32) -> ModelConfig {
        self.search_space.sample(rng)
    }

    fn default_config(&self) -> ModelConfig {
        ModelConfig::default()
    }

    fn run_one_eval(
        &self,
        train: &Dataset,
        valid: &Dataset,
        epochs: usize,
        config: &ModelConfig,
    ) -> anyhow::Result<f32> {
        let settings = self.settings.clone().with_validation_split(0.1);
        let (network, _) = trainer::train_model_for_data(train, epochs, config, &settings)?;
        let evaluation = trainer::evaluate(&network, valid, config.batch_size)?;
        Ok(evaluation.loss)
    }
}
