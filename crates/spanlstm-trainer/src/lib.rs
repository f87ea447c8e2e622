//! # spanlstm Trainer
//!
//! Training loop, random hyperparameter search and the commands behind the
//! `spanlstm` binary.

pub mod commands;
pub mod data;
pub mod lstm_entity;
pub mod search;
pub mod trainer;

#[cfg(test)]
pub(crate) mod testing;

pub use commands::{OptimizeOptions, TrainOptions, classify, classify_stream, optimize, train};
pub use data::Dataset;
pub use lstm_entity::LstmEntityModel;
pub use search::{OptimizableModel, RandomSearch, SearchOutcome, SearchSettings, Trial};
pub use trainer::{EarlyStopping, Evaluation, TrainerSettings, TrainingHistory, evaluate, train_model_for_data};
