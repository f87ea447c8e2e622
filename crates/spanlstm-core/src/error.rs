use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading data, building networks or handling bundles.
#[derive(Debug, Error)]
pub enum SpanLstmError {
    /// Underlying filesystem or stream failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Model metadata could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The bundle archive is unreadable or could not be written.
    #[error("bundle archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Tensor engine failure.
    #[error("ML inference error: {0}")]
    Candle(#[from] candle_core::Error),

    /// A training data line does not follow `label | tokens`.
    #[error("malformed line {line} in {path:?}: {reason}")]
    MalformedLine {
        /// File that contains the line.
        path: PathBuf,
        /// One-based line number.
        line: usize,
        /// What is wrong with it.
        reason: String,
    },

    /// The training directory yielded no instances.
    #[error("no training instances found in {0:?}")]
    EmptyDataset(PathBuf),

    /// A network was requested without any recurrent layer.
    #[error("model configuration has no recurrent layers")]
    EmptyLayers,

    /// The network predicted a class the label alphabet does not know.
    #[error("predicted class {0} has no label")]
    UnknownClass(usize),

    /// A required file is missing from the bundle archive.
    #[error("bundle {bundle:?} has no entry named {entry}")]
    MissingBundleEntry {
        /// Archive path.
        bundle: PathBuf,
        /// Entry that was expected.
        entry: &'static str,
    },

    /// The bundle was written by an incompatible format version.
    #[error("unsupported bundle format version {found} (expected {expected})")]
    BundleVersion {
        /// Version recorded in the bundle.
        found: u32,
        /// Version this build reads.
        expected: u32,
    },

    /// Pretrained embedding weights do not fit the network.
    #[error("pretrained embeddings have shape {found:?}, expected {expected:?}")]
    EmbeddingShape {
        /// Shape found in the weights file.
        found: Vec<usize>,
        /// `(vocab_size, embed_dim)` of the network.
        expected: Vec<usize>,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for spanlstm operations.
pub type Result<T> = std::result::Result<T, SpanLstmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = SpanLstmError::EmptyLayers;
        assert_eq!(err.to_string(), "model configuration has no recurrent layers");

        let err = SpanLstmError::MalformedLine {
            path: PathBuf::from("training-data.liblinear"),
            line: 7,
            reason: "missing '|' separator".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("line 7"));
        assert!(msg.contains("missing '|' separator"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SpanLstmError>();
    }
}
