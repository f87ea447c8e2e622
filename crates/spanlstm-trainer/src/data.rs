//! Encoded training data, splits and mini-batches.

use candle_core::Tensor;
use oorandom::Rand32;
use spanlstm_core::{BiLstmNetwork, TokenSequenceData, num_outputs_for};

/// Padded feature id sequences with their class ids.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    instances: Vec<Vec<u32>>,
    outcomes: Vec<u32>,
    num_classes: usize,
    num_features: usize,
}

impl Dataset {
    /// # Arguments
    /// * `instances` - Feature id sequences, all of the same length
    /// * `outcomes` - Class id of each sequence
    /// * `num_classes` - Size of the label alphabet
    /// * `num_features` - Size of the feature alphabet
    pub fn new(instances: Vec<Vec<u32>>, outcomes: Vec<u32>, num_classes: usize, num_features: usize) -> Self {
        debug_assert_eq!(instances.len(), outcomes.len());
        Self {
            instances,
            outcomes,
            num_classes,
            num_features,
        }
    }

    pub fn from_token_sequences(data: &TokenSequenceData) -> Self {
        Self::new(
            data.instances.clone(),
            data.outcomes.clone(),
            data.vocabulary.num_classes(),
            data.vocabulary.features.len(),
        )
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn instances(&self) -> &[Vec<u32>] {
        &self.instances
    }

    pub fn outcomes(&self) -> &[u32] {
        &self.outcomes
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Output width of a network trained on this data.
    pub fn num_outputs(&self) -> usize {
        num_outputs_for(self.num_classes)
    }

    /// Largest feature id present in the instances.
    pub fn max_feature_id(&self) -> u32 {
        self.instances.iter().flatten().copied().max().unwrap_or(0)
    }

    /// Embedding rows needed: one past the largest id seen, and never fewer
    /// than the feature alphabet so held-out splits stay in range.
    pub fn vocab_size(&self) -> usize {
        (self.max_feature_id() as usize + 1).max(self.num_features)
    }

    /// Copy of the rows at `indices`.
    pub fn subset(&self, indices: &[usize]) -> Self {
        Self {
            instances: indices.iter().map(|&i| self.instances[i].clone()).collect(),
            outcomes: indices.iter().map(|&i| self.outcomes[i]).collect(),
            num_classes: self.num_classes,
            num_features: self.num_features,
        }
    }

    /// Hold out the last `fraction` of rows, without shuffling.
    pub fn split_tail(&self, fraction: f64) -> (Self, Self) {
        let split_at = ((self.len() as f64) * (1.0 - fraction.clamp(0.0, 1.0))) as usize;
        let head: Vec<usize> = (0..split_at).collect();
        let tail: Vec<usize> = (split_at..self.len()).collect();
        (self.subset(&head), self.subset(&tail))
    }

    /// Shuffle rows with `seed`, then hold out `fraction` of them.
    pub fn shuffled_split(&self, fraction: f64, seed: u64) -> (Self, Self) {
        let mut order: Vec<usize> = (0..self.len()).collect();
        shuffle(&mut order, &mut Rand32::new(seed));
        let holdout = ((self.len() as f64) * fraction.clamp(0.0, 1.0)).round() as usize;
        let (valid, train) = order.split_at(holdout.min(self.len()));
        (self.subset(train), self.subset(valid))
    }

    /// Input ids `[batch, seq_len]` and targets for the rows at `indices`.
    pub fn batch(&self, indices: &[usize], network: &BiLstmNetwork) -> spanlstm_core::Result<(Tensor, Tensor)> {
        let seq_len = self.instances.first().map_or(0, Vec::len);
        let flat: Vec<u32> = indices
            .iter()
            .flat_map(|&i| self.instances[i].iter().copied())
            .collect();
        let ids = Tensor::from_vec(flat, (indices.len(), seq_len), network.device())?;

        let outcomes: Vec<u32> = indices.iter().map(|&i| self.outcomes[i]).collect();
        let targets = network.targets(&outcomes)?;
        Ok((ids, targets))
    }
}

/// Fisher-Yates shuffle driven by `rng`.
pub fn shuffle<T>(items: &mut [T], rng: &mut Rand32) {
    for i in (1..items.len()).rev() {
        let j = rng.rand_range(0..(i as u32 + 1)) as usize;
        items.swap(i, j);
    }
}
