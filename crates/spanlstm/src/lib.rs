//! # spanlstm
//!
//! Classifies the entity span marked with `<e>` and `</e>` in a line of
//! text using a bidirectional LSTM.
//!
//! - [`spanlstm_core`]: alphabets, network, inference model and bundle format
//! - [`spanlstm_trainer`]: training loop, random search and CLI commands

pub use spanlstm_core;
pub use spanlstm_trainer;

pub use spanlstm_core::{EntityModel, ModelConfig, Result, SpanLstmError, read_model, write_model};
pub use spanlstm_trainer::{LstmEntityModel, OptimizableModel, RandomSearch, TrainerSettings};
