use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::AssistantError;

fn ensure(condition: bool, message: &str) -> Result<(), AssistantError> {
    if condition {
        Ok(())
    } else {
        Err(AssistantError::InvalidConfig(message.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimplifierConfig {
    pub model_dir: PathBuf,
    pub prefix: String,
    pub max_input_tokens: usize,
    pub max_output_tokens: usize,
    pub num_beams: usize,
    pub early_stopping: bool,
}

impl Default for SimplifierConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models/t5-small"),
            prefix: "simplify: ".to_string(),
            max_input_tokens: 512,
            max_output_tokens: 150,
            num_beams: 4,
            early_stopping: true,
        }
    }
}

impl SimplifierConfig {
    pub fn validate(&self) -> Result<(), AssistantError> {
        ensure(self.max_input_tokens > 0, "max_input_tokens must be > 0")?;
        // Room for the decoder start token plus at least one generated token.
        ensure(self.max_output_tokens > 1, "max_output_tokens must be > 1")?;
        ensure(self.num_beams > 0, "num_beams must be > 0")
    }
}

/// Architecture of a T5 checkpoint. Field names follow the Hugging Face
/// `config.json` so the file shipped with a checkpoint can be read directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct T5Config {
    pub vocab_size: usize,
    pub d_model: usize,
    pub d_kv: usize,
    pub d_ff: usize,
    pub num_layers: usize,
    pub num_decoder_layers: usize,
    pub num_heads: usize,
    pub relative_attention_num_buckets: usize,
    pub relative_attention_max_distance: usize,
    pub layer_norm_epsilon: f64,
    pub pad_token_id: u32,
    pub eos_token_id: u32,
    pub decoder_start_token_id: u32,
    pub tie_word_embeddings: bool,
    pub feed_forward_proj: String,
}

impl Default for T5Config {
    fn default() -> Self {
        // t5-small
        Self {
            vocab_size: 32128,
            d_model: 512,
            d_kv: 64,
            d_ff: 2048,
            num_layers: 6,
            num_decoder_layers: 6,
            num_heads: 8,
            relative_attention_num_buckets: 32,
            relative_attention_max_distance: 128,
            layer_norm_epsilon: 1e-6,
            pad_token_id: 0,
            eos_token_id: 1,
            decoder_start_token_id: 0,
            tie_word_embeddings: true,
            feed_forward_proj: "relu".to_string(),
        }
    }
}

impl T5Config {
    pub fn validate(&self) -> Result<(), AssistantError> {
        ensure(self.vocab_size > 0, "vocab_size must be > 0")?;
        ensure(self.d_model > 0, "d_model must be > 0")?;
        ensure(self.d_kv > 0, "d_kv must be > 0")?;
        ensure(self.d_ff > 0, "d_ff must be > 0")?;
        ensure(self.num_layers > 0, "num_layers must be > 0")?;
        ensure(self.num_decoder_layers > 0, "num_decoder_layers must be > 0")?;
        ensure(self.num_heads > 0, "num_heads must be > 0")?;
        ensure(
            self.relative_attention_num_buckets >= 2,
            "relative_attention_num_buckets must be >= 2",
        )?;
        ensure(
            self.relative_attention_max_distance > 0,
            "relative_attention_max_distance must be > 0",
        )?;
        ensure(
            (self.eos_token_id as usize) < self.vocab_size,
            "eos_token_id must be inside the vocabulary",
        )?;
        ensure(
            (self.decoder_start_token_id as usize) < self.vocab_size,
            "decoder_start_token_id must be inside the vocabulary",
        )?;
        // Gated-GELU checkpoints (t5 v1.1, flan) use a different feed-forward block.
        ensure(
            self.feed_forward_proj == "relu",
            "only relu feed-forward checkpoints are supported",
        )
    }

    /// Width of the concatenated attention heads.
    pub fn inner_dim(&self) -> usize {
        self.num_heads * self.d_kv
    }

    /// Reads the `config.json` that ships next to a pretrained checkpoint.
    pub fn from_model_dir(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join("config.json");
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read model config: {:?}", path))?;
        let config: Self = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse model config: {:?}", path))?;
        Ok(Some(config))
    }
}

impl fmt::Display for T5Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "d_model={}, heads={}x{}, layers={}/{}, vocab={}",
            self.d_model,
            self.num_heads,
            self.d_kv,
            self.num_layers,
            self.num_decoder_layers,
            self.vocab_size
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub program: String,
    pub voice: String,
    /// Words per minute.
    pub rate: u32,
    pub pitch: u32,
    /// MP3 encoder fed with the synthesized WAV.
    pub encoder: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            program: "espeak-ng".to_string(),
            voice: "en".to_string(),
            rate: 180,
            pitch: 50,
            encoder: "lame".to_string(),
        }
    }
}

impl SpeechConfig {
    pub const RATE_RANGE: std::ops::RangeInclusive<u32> = 100..=300;
    pub const PITCH_RANGE: std::ops::RangeInclusive<u32> = 0..=100;

    pub fn validate(&self) -> Result<(), AssistantError> {
        ensure(!self.program.is_empty(), "speech program must be set")?;
        ensure(
            Self::RATE_RANGE.contains(&self.rate),
            "speech rate must be within [100, 300]",
        )?;
        ensure(
            Self::PITCH_RANGE.contains(&self.pitch),
            "voice pitch must be within [0, 100]",
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub output_dir: PathBuf,
    pub text_file: String,
    pub pdf_file: String,
    pub audio_file: String,
    pub pdf: PdfLayout,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            text_file: "simplified_text.txt".to_string(),
            pdf_file: "simplified_text.pdf".to_string(),
            audio_file: "simplified_audio.mp3".to_string(),
            pdf: PdfLayout::default(),
        }
    }
}

impl ExportConfig {
    pub fn validate(&self) -> Result<(), AssistantError> {
        ensure(!self.text_file.is_empty(), "text_file must be set")?;
        ensure(!self.pdf_file.is_empty(), "pdf_file must be set")?;
        ensure(!self.audio_file.is_empty(), "audio_file must be set")?;
        self.pdf.validate()
    }
}

/// Page geometry in millimetres, font size in points.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfLayout {
    pub page_width_mm: f32,
    pub page_height_mm: f32,
    pub margin_mm: f32,
    /// Space kept free at the bottom before a new page is started.
    pub bottom_margin_mm: f32,
    pub cell_width_mm: f32,
    pub line_height_mm: f32,
    pub font_size: f32,
}

impl Default for PdfLayout {
    fn default() -> Self {
        Self {
            page_width_mm: 210.0,
            page_height_mm: 297.0,
            margin_mm: 10.0,
            bottom_margin_mm: 20.0,
            cell_width_mm: 190.0,
            line_height_mm: 10.0,
            font_size: 12.0,
        }
    }
}

impl PdfLayout {
    pub fn validate(&self) -> Result<(), AssistantError> {
        ensure(self.font_size > 0.0, "font_size must be > 0")?;
        ensure(self.line_height_mm > 0.0, "line_height_mm must be > 0")?;
        ensure(self.cell_width_mm > 0.0, "cell_width_mm must be > 0")?;
        ensure(self.margin_mm >= 0.0, "margin_mm must be >= 0")?;
        ensure(self.bottom_margin_mm >= 0.0, "bottom_margin_mm must be >= 0")?;
        ensure(
            self.margin_mm + self.cell_width_mm <= self.page_width_mm,
            "cell does not fit the page width",
        )?;
        ensure(
            self.margin_mm + self.bottom_margin_mm + self.line_height_mm <= self.page_height_mm,
            "a single line does not fit the page height",
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub simplifier: SimplifierConfig,
    pub t5: T5Config,
    pub speech: SpeechConfig,
    pub export: ExportConfig,
    /// Tesseract language code.
    pub ocr_language: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            simplifier: SimplifierConfig::default(),
            t5: T5Config::default(),
            speech: SpeechConfig::default(),
            export: ExportConfig::default(),
            ocr_language: "eng".to_string(),
        }
    }
}

impl AssistantConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Self =
            serde_json::from_str(&json).with_context(|| "Failed to parse config JSON")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AssistantError> {
        self.simplifier.validate()?;
        self.t5.validate()?;
        self.speech.validate()?;
        self.export.validate()?;
        ensure(!self.ocr_language.is_empty(), "ocr_language must be set")
    }
}
