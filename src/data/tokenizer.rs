use anyhow::{anyhow, Context, Result};
use std::path::Path;

/// Trait for tokenization
pub trait Tokenizer: Send + Sync {
    /// Encode text to token IDs, without special tokens
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Decode token IDs to text, dropping special tokens
    fn decode(&self, tokens: &[u32]) -> Result<String>;

    /// Get vocabulary size
    fn vocab_size(&self) -> usize;

    /// Get the ID for padding tokens
    fn pad_id(&self) -> u32;

    /// Get the ID for end-of-sequence tokens
    fn eos_id(&self) -> u32;
}

/// SentencePiece tokenizer of a pretrained checkpoint, read from its
/// Hugging Face `tokenizer.json`.
pub struct PretrainedTokenizer {
    inner: tokenizers::Tokenizer,
    pad_id: u32,
    eos_id: u32,
}

impl PretrainedTokenizer {
    pub fn from_file(path: &Path) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| anyhow!("Cannot load tokenizer from {:?}: {}", path, e))?;

        let pad_id = inner
            .token_to_id("<pad>")
            .with_context(|| format!("Tokenizer {:?} has no <pad> token", path))?;
        let eos_id = inner
            .token_to_id("</s>")
            .with_context(|| format!("Tokenizer {:?} has no </s> token", path))?;

        Ok(Self {
            inner,
            pad_id,
            eos_id,
        })
    }

    /// Load `tokenizer.json` from a checkpoint directory
    pub fn from_model_dir(dir: &Path) -> Result<Self> {
        Self::from_file(&dir.join("tokenizer.json"))
    }
}

impl Tokenizer for PretrainedTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| anyhow!("Tokenize: {e}"))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        self.inner
            .decode(tokens, true)
            .map_err(|e| anyhow!("Decode: {e}"))
    }

    fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    fn pad_id(&self) -> u32 {
        self.pad_id
    }

    fn eos_id(&self) -> u32 {
        self.eos_id
    }
}
