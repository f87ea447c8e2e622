//! The `train`, `classify` and `optimize` commands.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use spanlstm_core::{EntityModel, ModelConfig, SearchSpace, read_model};
use tracing::{debug, info, warn};

use crate::lstm_entity::LstmEntityModel;
use crate::search::{RandomSearch, SearchOutcome, SearchSettings};
use crate::trainer::TrainerSettings;

/// Epochs used by `train` unless overridden.
pub const DEFAULT_TRAIN_EPOCHS: usize = 80;

/// Options for [`train`].
#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub epochs: usize,
    pub config: ModelConfig,
    pub settings: TrainerSettings,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            epochs: DEFAULT_TRAIN_EPOCHS,
            config: ModelConfig::default(),
            settings: TrainerSettings::default(),
        }
    }
}

/// Options for [`optimize`].
#[derive(Debug, Clone, Default)]
pub struct OptimizeOptions {
    pub space: SearchSpace,
    pub search: SearchSettings,
    pub settings: TrainerSettings,
}

/// Train on `working_dir`'s data and write the bundle there.
///
/// Returns the bundle path.
pub fn train(working_dir: &Path, options: &TrainOptions) -> anyhow::Result<PathBuf> {
    options.config.validate().context("invalid model configuration")?;
    info!("Training model in {:?} for up to {} epochs", working_dir, options.epochs);

    let model = LstmEntityModel::new().with_settings(options.settings.clone());
    let trained = model.train(working_dir, options.epochs, &options.config)?;
    model.write_model(working_dir, &trained)
}

/// Classify lines from `input` until a blank line or end of input.
///
/// Each label (or `Exception <message>` when a line fails, including lines
/// that are not valid UTF-8) is written to `output` and flushed before the
/// next line is read. Only read and write failures on the streams themselves
/// end the loop early. Returns the number of lines handled.
pub fn classify_stream<R: BufRead, W: Write>(model: &EntityModel, mut input: R, mut output: W) -> io::Result<usize> {
    let mut handled = 0;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if input.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        if buf.trim_ascii_end().is_empty() {
            break;
        }

        match std::str::from_utf8(&buf) {
            Ok(text) => {
                let line = text.trim_end();
                match model.classify_line(line) {
                    Ok(label) => writeln!(output, "{label}")?,
                    Err(e) => {
                        debug!("failed to classify {:?}: {}", line, e);
                        writeln!(output, "Exception {e}")?;
                    }
                }
            }
            Err(e) => {
                debug!("line {} is not valid UTF-8: {}", handled + 1, e);
                writeln!(output, "Exception {e}")?;
            }
        }
        output.flush()?;
        handled += 1;
    }
    Ok(handled)
}

/// Load the bundle in `working_dir` and classify `input` into `output`.
pub fn classify<R: BufRead, W: Write>(working_dir: &Path, input: R, output: W) -> anyhow::Result<usize> {
    let model = read_model(working_dir).with_context(|| format!("loading model from {}", working_dir.display()))?;
    let handled = classify_stream(&model, input, output).context("reading lines to classify")?;
    info!("Classified {} lines", handled);
    Ok(handled)
}

/// Random search over configurations for `working_dir`'s data.
///
/// The bundle must exist; it is loaded and then dropped in favor of a fresh
/// model built from the re-read training data.
pub fn optimize(working_dir: &Path, options: &OptimizeOptions) -> anyhow::Result<SearchOutcome> {
    let loaded = read_model(working_dir).with_context(|| format!("loading model from {}", working_dir.display()))?;
    info!("Loaded model trained with {:?}", loaded.config());
    drop(loaded);
    warn!("Discarding the loaded model; the search trains fresh networks");

    let model = LstmEntityModel::new()
        .with_search_space(options.space.clone())
        .with_settings(options.settings.clone());
    let (data, _) = model.read_training_instances(working_dir)?;

    RandomSearch::new(&model, &data, options.search.clone()).optimize()
}
