//! Random-search hyperparameter optimization.

use oorandom::Rand32;
use serde::Serialize;
use spanlstm_core::ModelConfig;
use tracing::{info, warn};

use crate::data::Dataset;

/// What random search needs from a model family.
pub trait OptimizableModel {
    /// Draw a configuration from the model's search space.
    fn random_config(&self, rng: &mut Rand32) -> ModelConfig;

    /// The configuration used when no search is run.
    fn default_config(&self) -> ModelConfig;

    /// Train on `train` for up to `epochs` epochs and return the loss on `valid`.
    fn run_one_eval(
        &self,
        train: &Dataset,
        valid: &Dataset,
        epochs: usize,
        config: &ModelConfig,
    ) -> anyhow::Result<f32>;
}

/// Search budget and reproducibility settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSettings {
    /// Number of sampled configurations to evaluate.
    pub trials: usize,
    /// Epoch budget for each trial.
    pub epochs: usize,
    /// Fraction of the data held out to score trials.
    pub holdout: f64,
    /// Seed for the split and for sampling.
    pub seed: u64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            trials: 10,
            epochs: 10,
            holdout: 0.1,
            seed: 42,
        }
    }
}

impl SearchSettings {
    pub fn with_trials(mut self, trials: usize) -> Self {
        self.trials = trials;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// One evaluated configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trial {
    pub number: usize,
    pub config: ModelConfig,
    pub loss: f32,
}

/// Every completed trial and the best of them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub best: Trial,
    pub trials: Vec<Trial>,
}

/// Uniform random search over an [`OptimizableModel`]'s configurations.
pub struct RandomSearch<'a, M: OptimizableModel> {
    model: &'a M,
    data: &'a Dataset,
    settings: SearchSettings,
}

impl<'a, M: OptimizableModel> RandomSearch<'a, M> {
    pub fn new(model: &'a M, data: &'a Dataset, settings: SearchSettings) -> Self {
        Self { model, data, settings }
    }

    /// Evaluate `trials` sampled configurations and return the lowest-loss one.
    ///
    /// A trial that fails is logged and skipped. If none succeeds, the last
    /// failure is returned.
    pub fn optimize(&self) -> anyhow::Result<SearchOutcome> {
        if self.settings.trials == 0 {
            anyhow::bail!("random search needs at least one trial");
        }

        let (train, valid) = self.data.shuffled_split(self.settings.holdout, self.settings.seed);
        if train.is_empty() || valid.is_empty() {
            anyhow::bail!(
                "cannot split {} instances into training and {:.0}% held-out data",
                self.data.len(),
                self.settings.holdout * 100.0
            );
        }

        let mut rng = Rand32::new(self.settings.seed);
        let mut trials: Vec<Trial> = Vec::with_capacity(self.settings.trials);
        let mut last_error = None;

        for number in 1..=self.settings.trials {
            let config = self.model.random_config(&mut rng);
            info!("Trial {}/{}: {:?}", number, self.settings.trials, config);

            match self.model.run_one_eval(&train, &valid, self.settings.epochs, &config) {
                Ok(loss) => {
                    info!("Trial {} held-out loss {:.4}", number, loss);
                    trials.push(Trial { number, config, loss });
                }
                Err(e) => {
                    warn!("Trial {} failed: {:#}", number, e);
                    last_error = Some(e);
                }
            }
        }

        let best = trials
            .iter()
            .filter(|t| t.loss.is_finite())
            .min_by(|a, b| a.loss.total_cmp(&b.loss))
            .cloned();

        match (best, last_error) {
            (Some(best), _) => {
                info!("Best trial {} with loss {:.4}", best.number, best.loss);
                Ok(SearchOutcome { best, trials })
            }
            (None, Some(e)) => Err(e.context("every random search trial failed")),
            (None, None) => anyhow::bail!("no trial produced a finite loss"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::testing::toy_dataset;

    /// Scores configurations by embedding size, so the search has a known optimum.
    struct ScriptedModel {
        seen: RefCell<Vec<usize>>,
        fail_on: Option<usize>,
    }

    impl ScriptedModel {
        fn new(fail_on: Option<usize>) -> Self {
            Self {
                seen: RefCell::new(Vec::new()),
                fail_on,
            }
        }
    }

    impl OptimizableModel for ScriptedModel {
        fn random_config(&self, rng: &mut Rand32) -> ModelConfig {
            ModelConfig::default().with_embed_dim(1 + rng.rand_range(0..100) as usize)
        }

        fn default_config(&self) -> ModelConfig {
            ModelConfig::default()
        }

        fn run_one_eval(
            &self,
            train: &Dataset,
            valid: &Dataset,
            _epochs: usize,
            config: &ModelConfig,
        ) -> anyhow::Result<f32> {
            assert_eq!(train.len() + valid.len(), 40);
            self.seen.borrow_mut().push(config.embed_dim);
            if Some(config.embed_dim) == self.fail_on || self.fail_on == Some(0) {
                anyhow::bail!("scripted failure");
            }
            Ok(config.embed_dim as f32)
        }
    }

    #[test]
    fn test_picks_lowest_loss() {
        let data = toy_dataset();
        let model = ScriptedModel::new(None);
        let outcome = RandomSearch::new(&model, &data, SearchSettings::default().with_trials(6))
            .optimize()
            .unwrap();

        assert_eq!(outcome.trials.len(), 6);
        let min = model.seen.borrow().iter().copied().min().unwrap();
        assert_eq!(outcome.best.config.embed_dim, min);
        assert_eq!(outcome.best.loss, min as f32);
    }

    #[test]
    fn test_all_trials_failing_is_error() {
        let data = toy_dataset();
        let model = ScriptedModel::new(Some(0));
        let result = RandomSearch::new(&model, &data, SearchSettings::default().with_trials(3)).optimize();
        assert!(result.is_err());
        assert_eq!(model.seen.borrow().len(), 3);
    }

    #[test]
    fn test_same_seed_same_trials() {
        let data = toy_dataset();
        let a = ScriptedModel::new(None);
        let b = ScriptedModel::new(None);
        let settings = SearchSettings::default().with_trials(4).with_seed(5);
        RandomSearch::new(&a, &data, settings.clone()).optimize().unwrap();
        RandomSearch::new(&b, &data, settings).optimize().unwrap();
        assert_eq!(*a.seen.borrow(), *b.seen.borrow());
    }

    #[test]
    fn test_zero_trials_rejected() {
        let data = toy_dataset();
        let model = ScriptedModel::new(None);
        let result = RandomSearch::new(&model, &data, SearchSettings::default().with_trials(0)).optimize();
        assert!(result.is_err());
    }
}
