//! # Token Sequence I/O
//!
//! Reads the cleartk token-sequence training format:
//!
//! ```text
//! label | token1 token2 <e> entity tokens </e> token3
//! ```
//!
//! and provides the padding used for both training and classification.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::{debug, info};

use crate::alphabet::{AlphabetBuilder, PAD_ID, Vocabulary};
use crate::error::{Result, SpanLstmError};

/// Name of the training data file inside a working directory.
pub const TRAINING_DATA_FILE: &str = "training-data.liblinear";

/// Encoded training instances with the alphabets built while reading them.
#[derive(Debug, Clone)]
pub struct TokenSequenceData {
    /// Feature id sequences, all padded to the same length.
    pub instances: Vec<Vec<u32>>,
    /// Label id of each instance.
    pub outcomes: Vec<u32>,
    /// Frozen feature and label alphabets.
    pub vocabulary: Vocabulary,
}

impl TokenSequenceData {
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Common sequence length after padding.
    pub fn seq_len(&self) -> usize {
        self.instances.first().map_or(0, Vec::len)
    }
}

/// Split a data line into its label and tokens.
///
/// Returns `None` when the `|` separator is missing.
pub fn parse_line(line: &str) -> Option<(&str, Vec<&str>)> {
    let (label, tokens) = line.split_once('|')?;
    Some((label.trim(), tokens.split_whitespace().collect()))
}

/// Read `training-data.liblinear` from `working_dir`.
///
/// Label ids follow first appearance. Feature ids start at 2; 0 and 1 are the
/// padding and unknown tokens. Every sequence is center-padded to the length of
/// the longest one.
pub fn read_token_sequence_data(working_dir: impl AsRef<Path>) -> Result<TokenSequenceData> {
    let path = working_dir.as_ref().join(TRAINING_DATA_FILE);
    let reader = BufReader::new(File::open(&path)?);

    let mut labels = AlphabetBuilder::new();
    let mut features = AlphabetBuilder::for_features();
    let mut instances = Vec::new();
    let mut outcomes = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let malformed = |reason: &str| SpanLstmError::MalformedLine {
            path: path.clone(),
            line: idx + 1,
            reason: reason.to_string(),
        };

        let (label, tokens) = parse_line(line).ok_or_else(|| malformed("missing '|' separator"))?;
        if label.is_empty() {
            return Err(malformed("empty label"));
        }
        if tokens.is_empty() {
            return Err(malformed("no tokens"));
        }

        outcomes.push(labels.intern(label));
        instances.push(tokens.iter().map(|t| features.intern(t)).collect::<Vec<_>>());
    }

    if instances.is_empty() {
        return Err(SpanLstmError::EmptyDataset(path));
    }

    let max_len = instances.iter().map(Vec::len).max().unwrap_or(0);
    for seq in &mut instances {
        fix_instance_len(seq, max_len);
    }

    info!(
        "Loaded {} instances from {:?} ({} labels, {} features, length {})",
        instances.len(),
        path,
        labels.len(),
        features.len(),
        max_len
    );
    debug!("label alphabet size {}", labels.len());

    Ok(TokenSequenceData {
        instances,
        outcomes,
        vocabulary: Vocabulary::new(features.freeze(), labels.freeze()),
    })
}

/// Pad or crop `seq` to exactly `len` ids, keeping it centered.
///
/// Padding uses [`PAD_ID`]; when the difference is odd the extra slot goes to
/// the end. Cropping removes ids from both ends the same way.
pub fn fix_instance_len(seq: &mut Vec<u32>, len: usize) {
    let current = seq.len();
    if current < len {
        let pad = len - current;
        let front = pad / 2;
        seq.splice(0..0, std::iter::repeat_n(PAD_ID, front));
        seq.resize(len, PAD_ID);
    } else if current > len {
        let excess = current - len;
        let front = excess / 2;
        seq.drain(..front);
        seq.truncate(len);
    }
}
