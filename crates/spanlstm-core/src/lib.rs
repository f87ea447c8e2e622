//! # spanlstm Core
//!
//! Bidirectional LSTM classification of marked entity spans. Provides the
//! alphabets, the cleartk token-sequence reader, model configuration, the
//! candle network, the inference model and the bundle format.
//!
//! ## Quick Start
//!
//! ```no_run
//! use spanlstm_core::read_model;
//!
//! let model = read_model("work/disorders").unwrap();
//! let label = model.classify_line("patient denies <e> chest pain </e> today").unwrap();
//! println!("{label}");
//! ```
pub mod alphabet;
pub mod bundle;
pub mod config;
pub mod error;
pub mod io;
pub mod model;
pub mod network;

// Re-export primary API
pub use alphabet::{Alphabet, AlphabetBuilder, Vocabulary};
pub use bundle::{BundleMetadata, read_model, write_model};
pub use config::{ModelConfig, OptimizerConfig, SearchSpace};
pub use error::{Result, SpanLstmError};
pub use io::{TokenSequenceData, read_token_sequence_data};
pub use model::{EntityModel, decide_class, num_outputs_for};
pub use network::{BiLstmNetwork, Objective, OutputActivation};
