//! Command-line driver: train, classify and optimize BiLSTM entity classifiers.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use spanlstm_core::{ModelConfig, SearchSpace};
use spanlstm_trainer::commands::{self, DEFAULT_TRAIN_EPOCHS, OptimizeOptions, TrainOptions};
use spanlstm_trainer::{SearchSettings, TrainerSettings};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// CLI arguments
#[derive(Debug, Parser)]
#[command(name = "spanlstm")]
#[command(about = "Train and apply bidirectional LSTM entity-span classifiers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Seed for weight initialization, batch order and search sampling
    #[arg(long, global = true, env = "SPANLSTM_SEED", default_value_t = 42)]
    seed: u64,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Train on <working_dir>/training-data.liblinear and write script.model
    Train {
        working_dir: PathBuf,

        /// Maximum number of epochs
        #[arg(short, long, env = "SPANLSTM_EPOCHS", default_value_t = DEFAULT_TRAIN_EPOCHS)]
        epochs: usize,

        /// JSON file with model hyperparameters
        #[arg(short = 'c', long)]
        model_config: Option<PathBuf>,
    },
    /// Classify stdin lines with the model in <working_dir>
    Classify { working_dir: PathBuf },
    /// Random search for better hyperparameters
    Optimize {
        working_dir: PathBuf,

        /// Number of sampled configurations
        #[arg(short, long, env = "SPANLSTM_TRIALS", default_value_t = 10)]
        trials: usize,

        /// Epoch budget for each trial
        #[arg(long, env = "SPANLSTM_SEARCH_EPOCHS", default_value_t = 10)]
        search_epochs: usize,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let settings = TrainerSettings::default().with_seed(cli.seed);

    match cli.command {
        Commands::Train {
            working_dir,
            epochs,
            model_config,
        } => {
            let config = match model_config {
                Some(path) => ModelConfig::from_json_file(&path)
                    .with_context(|| format!("reading model config {}", path.display()))?,
                None => ModelConfig::default(),
            };
            let options = TrainOptions {
                epochs,
                config,
                settings,
            };
            let bundle = commands::train(&working_dir, &options)?;
            info!("Wrote {:?}", bundle);
        }
        Commands::Classify { working_dir } => {
            let stdin = io::stdin();
            commands::classify(&working_dir, stdin.lock(), io::stdout().lock())?;
        }
        Commands::Optimize {
            working_dir,
            trials,
            search_epochs,
        } => {
            let options = OptimizeOptions {
                space: SearchSpace::default(),
                search: SearchSettings::default()
                    .with_trials(trials)
                    .with_epochs(search_epochs)
                    .with_seed(cli.seed),
                settings,
            };
            let outcome = commands::optimize(&working_dir, &options)?;
            println!("Best config: {}", serde_json::to_string(&outcome.best.config)?);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    ExitCode::from(report(run(cli)))
}

/// Log a failed run once and map it to the process status.
fn report(result: Result<()>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    }
}
