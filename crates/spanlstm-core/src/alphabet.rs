//! # Alphabets
//!
//! Bidirectional string/id mappings for feature tokens and outcome labels.
//! An [`AlphabetBuilder`] grows while training data is read; [`Alphabet`] is
//! the frozen form used for inference and stored in model bundles.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpanLstmError};

/// Token used for sequence padding. Always feature id 0.
pub const PAD_TOKEN: &str = "<PAD>";
/// Token substituted for features never seen during training. Always feature id 1.
pub const UNK_TOKEN: &str = "<UNK>";
/// Feature id of [`PAD_TOKEN`].
pub const PAD_ID: u32 = 0;
/// Feature id of [`UNK_TOKEN`].
pub const UNK_ID: u32 = 1;

/// Growable alphabet. Ids are dense and assigned in order of first appearance.
#[derive(Debug, Clone, Default)]
pub struct AlphabetBuilder {
    ids: HashMap<String, u32>,
    symbols: Vec<String>,
}

impl AlphabetBuilder {
    /// Create an empty builder (used for labels).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder with the padding and unknown tokens reserved.
    pub fn for_features() -> Self {
        let mut builder = Self::new();
        builder.intern(PAD_TOKEN);
        builder.intern(UNK_TOKEN);
        builder
    }

    /// Return the id of `symbol`, adding it if it is new.
    pub fn intern(&mut self, symbol: &str) -> u32 {
        if let Some(&id) = self.ids.get(symbol) {
            return id;
        }
        let id = self.symbols.len() as u32;
        self.ids.insert(symbol.to_string(), id);
        self.symbols.push(symbol.to_string());
        id
    }

    /// Number of symbols added so far.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether nothing has been added yet.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Freeze into a read-only alphabet.
    pub fn freeze(self) -> Alphabet {
        Alphabet {
            ids: self.ids,
            symbols: self.symbols,
        }
    }
}

/// Read-only alphabet. Serialized as the list of symbols in id order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Alphabet {
    ids: HashMap<String, u32>,
    symbols: Vec<String>,
}

impl Alphabet {
    /// Id of `symbol`, if known.
    pub fn get(&self, symbol: &str) -> Option<u32> {
        self.ids.get(symbol).copied()
    }

    /// Symbol for `id`, if in range.
    pub fn symbol(&self, id: usize) -> Option<&str> {
        self.symbols.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Symbols in id order.
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }
}

impl From<Vec<String>> for Alphabet {
    fn from(symbols: Vec<String>) -> Self {
        let ids = symbols
            .iter()
            .enumerate()
            .map(|(id, s)| (s.clone(), id as u32))
            .collect();
        Self { ids, symbols }
    }
}

impl From<Alphabet> for Vec<String> {
    fn from(alphabet: Alphabet) -> Self {
        alphabet.symbols
    }
}

/// Frozen feature and label alphabets of a trained model.
///
/// Built once when training data is read and passed by reference into
/// inference; nothing mutates it afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vocabulary {
    pub features: Alphabet,
    pub labels: Alphabet,
}

impl Vocabulary {
    pub fn new(features: Alphabet, labels: Alphabet) -> Self {
        Self { features, labels }
    }

    /// Map tokens to feature ids, using [`UNK_ID`] for unseen tokens.
    pub fn feature_ids<'a, I>(&self, tokens: I) -> Vec<u32>
    where
        I: IntoIterator<Item = &'a str>,
    {
        tokens
            .into_iter()
            .map(|t| self.features.get(t).unwrap_or(UNK_ID))
            .collect()
    }

    /// Label string for a predicted class index.
    pub fn label(&self, class: usize) -> Result<&str> {
        self.labels
            .symbol(class)
            .ok_or(SpanLstmError::UnknownClass(class))
    }

    /// Number of distinct outcome labels.
    pub fn num_classes(&self) -> usize {
        self.labels.len()
    }
}
