//! # Model Bundle
//!
//! A trained model is persisted as two independent pieces, network weights
//! (safetensors) and metadata (JSON: configuration, alphabets, network shape),
//! packaged together into a single zip archive.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use candle_core::Device;
use serde::{Deserialize, Serialize};
use tracing::info;
use zip::ZipArchive;
use zip::result::ZipError;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::alphabet::Vocabulary;
use crate::config::ModelConfig;
use crate::error::{Result, SpanLstmError};
use crate::model::EntityModel;
use crate::network::BiLstmNetwork;

/// Archive written into the working directory.
pub const BUNDLE_FILE: &str = "script.model";
/// Weights entry inside the archive.
pub const WEIGHTS_ENTRY: &str = "model_weights.safetensors";
/// Metadata entry inside the archive.
pub const METADATA_ENTRY: &str = "model.json";
/// Metadata layout version this build writes and reads.
pub const FORMAT_VERSION: u32 = 1;

/// Everything besides the weights needed to rebuild a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleMetadata {
    pub format_version: u32,
    pub config: ModelConfig,
    pub vocabulary: Vocabulary,
    pub vocab_size: usize,
    pub num_outputs: usize,
}

impl BundleMetadata {
    pub fn for_model(model: &EntityModel) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            config: model.config().clone(),
            vocabulary: model.vocabulary().clone(),
            vocab_size: model.network().vocab_size(),
            num_outputs: model.network().num_outputs(),
        }
    }
}

/// Write weights, metadata and the bundle archive into `working_dir`.
///
/// Returns the archive path.
pub fn write_model(working_dir: impl AsRef<Path>, model: &EntityModel) -> Result<PathBuf> {
    let working_dir = working_dir.as_ref();
    std::fs::create_dir_all(working_dir)?;

    let weights_path = working_dir.join(WEIGHTS_ENTRY);
    model.network().save_weights(&weights_path)?;

    let metadata_path = working_dir.join(METADATA_ENTRY);
    let metadata = BundleMetadata::for_model(model);
    std::fs::write(&metadata_path, serde_json::to_vec_pretty(&metadata)?)?;

    let bundle_path = working_dir.join(BUNDLE_FILE);
    let mut zip = ZipWriter::new(File::create(&bundle_path)?);
    for (entry, path) in [(WEIGHTS_ENTRY, &weights_path), (METADATA_ENTRY, &metadata_path)] {
        zip.start_file(entry, SimpleFileOptions::default())?;
        io::copy(&mut File::open(path)?, &mut zip)?;
    }
    zip.finish()?;

    info!("Model saved to {:?}", bundle_path);
    Ok(bundle_path)
}

/// Load the model bundled in `working_dir` onto the CPU.
pub fn read_model(working_dir: impl AsRef<Path>) -> Result<EntityModel> {
    read_model_on(working_dir, &Device::Cpu)
}

/// Load the model bundled in `working_dir` onto `device`.
pub fn read_model_on(working_dir: impl AsRef<Path>, device: &Device) -> Result<EntityModel> {
    let bundle_path = working_dir.as_ref().join(BUNDLE_FILE);
    let mut archive = ZipArchive::new(File::open(&bundle_path)?)?;

    let metadata_bytes = read_entry(&mut archive, &bundle_path, METADATA_ENTRY)?;
    let weights = read_entry(&mut archive, &bundle_path, WEIGHTS_ENTRY)?;

    let metadata: BundleMetadata = serde_json::from_slice(&metadata_bytes)?;
    if metadata.format_version != FORMAT_VERSION {
        return Err(SpanLstmError::BundleVersion {
            found: metadata.format_version,
            expected: FORMAT_VERSION,
        });
    }

    let network = BiLstmNetwork::build(metadata.vocab_size, metadata.num_outputs, &metadata.config, device)?;
    network.load_weights(&weights)?;

    info!(
        "Loaded model from {:?} ({} labels, {} features)",
        bundle_path,
        metadata.vocabulary.labels.len(),
        metadata.vocabulary.features.len()
    );
    Ok(EntityModel::new(metadata.config, metadata.vocabulary, network))
}

fn read_entry(archive: &mut ZipArchive<File>, bundle: &Path, entry: &'static str) -> Result<Vec<u8>> {
    let mut file = archive.by_name(entry).map_err(|e| match e {
        ZipError::FileNotFound => SpanLstmError::MissingBundleEntry {
            bundle: bundle.to_path_buf(),
            entry,
        },
        other => SpanLstmError::Zip(other),
    })?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

impl EntityModel {
    /// See [`write_model`].
    pub fn write(&self, working_dir: impl AsRef<Path>) -> Result<PathBuf> {
        write_model(working_dir, self)
    }

    /// See [`read_model`].
    pub fn read(working_dir: impl AsRef<Path>) -> Result<Self> {
        read_model(working_dir)
    }
}
