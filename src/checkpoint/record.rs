use anyhow::{Context, Result};
use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::backend::Backend;
use burn_import::safetensors::{AdapterType, LoadArgs, SafetensorsFileRecorder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

use crate::config::T5Config;
use crate::model::T5ForConditionalGeneration;

pub const SAFETENSORS_FILE: &str = "model.safetensors";
/// Stem of the burn record; the recorder appends `.mpk`.
pub const RECORD_STEM: &str = "model";
pub const RECORD_METADATA_FILE: &str = "record.json";

/// Hugging Face parameter names rewritten onto the burn module tree.
const KEY_REMAPS: &[(&str, &str)] = &[
    (
        r"^(encoder|decoder)\.block\.(\d+)\.layer\.0\.SelfAttention\.(.+)$",
        "${1}.block.${2}.self_attention.${3}",
    ),
    (
        r"^(encoder|decoder)\.block\.(\d+)\.layer\.0\.layer_norm\.weight$",
        "${1}.block.${2}.self_attention_norm.gamma",
    ),
    (
        r"^decoder\.block\.(\d+)\.layer\.1\.EncDecAttention\.(.+)$",
        "decoder.block.${1}.cross_attention.${2}",
    ),
    (
        r"^decoder\.block\.(\d+)\.layer\.1\.layer_norm\.weight$",
        "decoder.block.${1}.cross_attention_norm.gamma",
    ),
    (
        r"^encoder\.block\.(\d+)\.layer\.1\.DenseReluDense\.(.+)$",
        "encoder.block.${1}.feed_forward.${2}",
    ),
    (
        r"^encoder\.block\.(\d+)\.layer\.1\.layer_norm\.weight$",
        "encoder.block.${1}.feed_forward_norm.gamma",
    ),
    (
        r"^decoder\.block\.(\d+)\.layer\.2\.DenseReluDense\.(.+)$",
        "decoder.block.${1}.feed_forward.${2}",
    ),
    (
        r"^decoder\.block\.(\d+)\.layer\.2\.layer_norm\.weight$",
        "decoder.block.${1}.feed_forward_norm.gamma",
    ),
    (
        r"^(encoder|decoder)\.final_layer_norm\.weight$",
        "${1}.final_layer_norm.gamma",
    ),
];

/// Written next to a converted burn record so it can be traced back to its source.
#[derive(Debug, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub source: String,
    pub config: T5Config,
    pub record_file: String,
    pub timestamp: u64,
}

fn record_path(model_dir: &Path) -> PathBuf {
    model_dir.join(RECORD_STEM)
}

/// Load pretrained weights from `model_dir`, preferring a converted burn
/// record (`model.mpk`) over the Hugging Face safetensors file.
pub fn load_pretrained<B: Backend>(
    model_dir: &Path,
    config: &T5Config,
    device: &B::Device,
) -> Result<T5ForConditionalGeneration<B>> {
    let model = T5ForConditionalGeneration::<B>::new(config, device);
    let record = record_path(model_dir);

    if record.with_extension("mpk").exists() {
        info!("Loading burn record: {:?}", record.with_extension("mpk"));
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let record = recorder
            .load(record.clone(), device)
            .with_context(|| format!("Failed to load model weights from: {:?}", record))?;
        return Ok(model.load_record(record));
    }

    let safetensors = model_dir.join(SAFETENSORS_FILE);
    if !safetensors.exists() {
        anyhow::bail!(
            "No weights found in {:?}: expected {} or {}.mpk",
            model_dir,
            SAFETENSORS_FILE,
            RECORD_STEM
        );
    }

    info!("Importing safetensors checkpoint: {:?}", safetensors);
    let load_args = KEY_REMAPS
        .iter()
        .fold(LoadArgs::new(safetensors.clone()), |args, (pattern, replacement)| {
            args.with_key_remap(pattern, replacement)
        })
        .with_adapter_type(AdapterType::PyTorch);

    let record = SafetensorsFileRecorder::<FullPrecisionSettings>::default()
        .load(load_args, device)
        .with_context(|| format!("Failed to import weights from: {:?}", safetensors))?;

    Ok(model.load_record(record))
}

/// Save `model` as a burn record in `model_dir`, with metadata alongside.
pub fn save_record<B: Backend>(
    model: &T5ForConditionalGeneration<B>,
    config: &T5Config,
    source: &str,
    model_dir: &Path,
) -> Result<PathBuf> {
    fs::create_dir_all(model_dir)
        .with_context(|| format!("Failed to create model directory: {:?}", model_dir))?;

    let record = record_path(model_dir);
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    recorder
        .record(model.clone().into_record(), record.clone())
        .with_context(|| "Failed to save model weights")?;

    info!("Model weights saved to: {:?}", record.with_extension("mpk"));

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    let metadata = RecordMetadata {
        source: source.to_string(),
        config: config.clone(),
        record_file: format!("{}.mpk", RECORD_STEM),
        timestamp,
    };

    let metadata_path = model_dir.join(RECORD_METADATA_FILE);
    let metadata_json = serde_json::to_string_pretty(&metadata)
        .with_context(|| "Failed to serialize record metadata")?;
    fs::write(&metadata_path, metadata_json)
        .with_context(|| format!("Failed to write record metadata: {:?}", metadata_path))?;

    Ok(record.with_extension("mpk"))
}

/// Import the safetensors checkpoint of `model_dir` and store it as a burn
/// record, so later loads skip the key remapping.
pub fn convert_safetensors<B: Backend>(
    model_dir: &Path,
    config: &T5Config,
    device: &B::Device,
) -> Result<PathBuf> {
    let existing = record_path(model_dir).with_extension("mpk");
    if existing.exists() {
        warn!("Overwriting existing burn record: {:?}", existing);
        fs::remove_file(&existing)
            .with_context(|| format!("Failed to remove stale record: {:?}", existing))?;
    }

    let model = load_pretrained::<B>(model_dir, config, device)?;
    save_record(&model, config, SAFETENSORS_FILE, model_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::t5::tests::{tiny_config, TestBackend};
    use burn::tensor::{Int, Tensor};
    use regex::Regex;

    fn remap(key: &str) -> String {
        KEY_REMAPS.iter().fold(key.to_string(), |key, (pattern, replacement)| {
            Regex::new(pattern).unwrap().replace(&key, *replacement).into_owned()
        })
    }

    #[test]
    fn test_key_remaps() {
        assert_eq!(
            remap("encoder.block.0.layer.0.SelfAttention.relative_attention_bias.weight"),
            "encoder.block.0.self_attention.relative_attention_bias.weight"
        );
        assert_eq!(
            remap("encoder.block.3.layer.1.DenseReluDense.wi.weight"),
            "encoder.block.3.feed_forward.wi.weight"
        );
        assert_eq!(
            remap("decoder.block.5.layer.1.EncDecAttention.k.weight"),
            "decoder.block.5.cross_attention.k.weight"
        );
        assert_eq!(
            remap("decoder.block.2.layer.2.layer_norm.weight"),
            "decoder.block.2.feed_forward_norm.gamma"
        );
        assert_eq!(remap("decoder.final_layer_norm.weight"), "decoder.final_layer_norm.gamma");
        assert_eq!(remap("shared.weight"), "shared.weight");
    }

    #[test]
    fn test_missing_weights() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let err = load_pretrained::<TestBackend>(dir.path(), &tiny_config(10), &device).unwrap_err();
        assert!(err.to_string().contains("No weights found"));
    }

    #[test]
    fn test_record_round_trip_keeps_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let config = tiny_config(10);

        let model = T5ForConditionalGeneration::<TestBackend>::new(&config, &device);
        save_record(&model, &config, "test", dir.path()).unwrap();
        assert!(dir.path().join(RECORD_METADATA_FILE).exists());

        let loaded = load_pretrained::<TestBackend>(dir.path(), &config, &device).unwrap();

        let ids = || Tensor::<TestBackend, 1, Int>::from_ints([4, 5, 1].as_slice(), &device).reshape([1, 3]);
        let before: Vec<f32> = model.encode(ids()).into_data().to_vec().unwrap();
        let after: Vec<f32> = loaded.encode(ids()).into_data().to_vec().unwrap();
        assert_eq!(before, after);
    }
}
