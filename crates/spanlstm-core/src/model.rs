//! # Entity Model
//!
//! A trained network together with the configuration and frozen alphabets
//! needed to classify raw text lines.

use candle_core::{Device, Tensor};

use crate::alphabet::Vocabulary;
use crate::config::ModelConfig;
use crate::error::Result;
use crate::io::fix_instance_len;
use crate::network::BiLstmNetwork;

/// Padding added around every classified line.
pub const EXTRA_LEN: usize = 2;

/// Threshold a binary output must exceed to select class 1.
pub const BINARY_THRESHOLD: f32 = 0.5;

/// Trained entity classifier.
pub struct EntityModel {
    config: ModelConfig,
    vocabulary: Vocabulary,
    network: BiLstmNetwork,
}

impl EntityModel {
    pub fn new(config: ModelConfig, vocabulary: Vocabulary, network: BiLstmNetwork) -> Self {
        Self {
            config,
            vocabulary,
            network,
        }
    }

    /// Build an untrained model whose weights are drawn from `seed`.
    ///
    /// The vocabulary size is taken from the feature alphabet and the output
    /// arity from the label alphabet.
    pub fn untrained(config: ModelConfig, vocabulary: Vocabulary, seed: u64, device: &Device) -> Result<Self> {
        let num_outputs = num_outputs_for(vocabulary.num_classes());
        let network = BiLstmNetwork::build(vocabulary.features.len(), num_outputs, &config, device)?;
        network.initialize_weights(seed)?;
        Ok(Self::new(config, vocabulary, network))
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn network(&self) -> &BiLstmNetwork {
        &self.network
    }

    /// Feature ids for a line: whitespace tokens mapped through the frozen
    /// alphabet, centered in `len + EXTRA_LEN` slots.
    pub fn encode_line(&self, line: &str) -> Vec<u32> {
        let mut ids = self.vocabulary.feature_ids(line.split_whitespace());
        let len = ids.len() + EXTRA_LEN;
        fix_instance_len(&mut ids, len);
        ids
    }

    /// Output probabilities for one line.
    pub fn predict_line(&self, line: &str) -> Result<Vec<f32>> {
        let ids = self.encode_line(line);
        let input = Tensor::new(ids.as_slice(), self.network.device())?.unsqueeze(0)?;
        let probs = self.network.predict_proba(&input)?.squeeze(0)?.to_vec1::<f32>()?;
        Ok(probs)
    }

    /// Predict the label of the entity marked in `line`.
    pub fn classify_line(&self, line: &str) -> Result<String> {
        let probs = self.predict_line(line)?;
        let class = decide_class(&probs);
        Ok(self.vocabulary.label(class)?.to_string())
    }
}

/// Output width for a label set: one sigmoid unit for up to two labels.
pub fn num_outputs_for(num_classes: usize) -> usize {
    if num_classes <= 2 { 1 } else { num_classes }
}

/// Pick the class index from output probabilities.
///
/// A single output selects class 1 only when strictly above
/// [`BINARY_THRESHOLD`]; several outputs select the arg-max (first on ties).
pub fn decide_class(probs: &[f32]) -> usize {
    match probs {
        [p] => usize::from(*p > BINARY_THRESHOLD),
        _ => probs
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, &p)| if p > best.1 { (i, p) } else { best })
            .0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::{AlphabetBuilder, PAD_ID, UNK_ID};

    fn vocabulary(labels: &[&str]) -> Vocabulary {
        let mut features = AlphabetBuilder::for_features();
        for token in ["foo", "<e>", "bar", "</e>", "baz"] {
            features.intern(token);
        }
        let mut label_alphabet = AlphabetBuilder::new();
        for label in labels {
            label_alphabet.intern(label);
        }
        Vocabulary::new(features.freeze(), label_alphabet.freeze())
    }

    fn small_config() -> ModelConfig {
        ModelConfig::default().with_layers(vec![4]).with_embed_dim(3)
    }

    #[test]
    fn test_decide_class_binary_threshold_is_strict() {
        assert_eq!(decide_class(&[0.5]), 0);
        assert_eq!(decide_class(&[0.500_001]), 1);
        assert_eq!(decide_class(&[0.2]), 0);
    }

    #[test]
    fn test_decide_class_argmax() {
        assert_eq!(decide_class(&[0.1, 0.7, 0.2]), 1);
        assert_eq!(decide_class(&[0.4, 0.4, 0.2]), 0);
    }

    #[test]
    fn test_num_outputs_for() {
        assert_eq!(num_outputs_for(1), 1);
        assert_eq!(num_outputs_for(2), 1);
        assert_eq!(num_outputs_for(5), 5);
    }

    #[test]
    fn test_encode_line_pads_and_maps_unknown() {
        let model = EntityModel::untrained(small_config(), vocabulary(&["neg", "pos"]), 1, &Device::Cpu).unwrap();
        let ids = model.encode_line("foo <e> qux </e>");
        assert_eq!(ids.len(), 6);
        assert_eq!(ids[0], PAD_ID);
        assert_eq!(ids[3], UNK_ID);
        assert_eq!(ids[5], PAD_ID);
    }

    #[test]
    fn test_probability_one_half_selects_first_label() {
        let model = EntityModel::untrained(small_config(), vocabulary(&["neg", "pos"]), 1, &Device::Cpu).unwrap();

        // Zero output weights and bias give a logit of 0, so p is exactly 0.5.
        for var in model.network().all_vars() {
            if var.dims() == [1, 8] || var.dims() == [1] {
                var.set(&var.zeros_like().unwrap()).unwrap();
            }
        }

        let probs = model.predict_line("foo <e> bar </e> baz").unwrap();
        assert_eq!(probs, vec![0.5]);
        assert_eq!(model.classify_line("foo <e> bar </e> baz").unwrap(), "neg");
    }

    #[test]
    fn test_classify_multi_class_returns_known_label() {
        let labels = ["disease", "drug", "procedure"];
        let model = EntityModel::untrained(small_config(), vocabulary(&labels), 9, &Device::Cpu).unwrap();
        let label = model.classify_line("foo <e> bar </e> baz").unwrap();
        assert!(labels.contains(&label.as_str()));
    }

    #[test]
    fn test_single_label_alphabet_can_fail_per_line() {
        let model = EntityModel::untrained(small_config(), vocabulary(&["only"]), 1, &Device::Cpu).unwrap();
        for var in model.network().all_vars() {
            if var.dims() == [1] {
                var.set(&(var.ones_like().unwrap() * 50.0).unwrap()).unwrap();
            }
        }
        // Positive bias pushes p above 0.5 and class 1 has no label.
        assert!(model.classify_line("foo <e> bar </e>").is_err());
    }
}
