use anyhow::{anyhow, Context, Result};
use burn::tensor::activation::log_softmax;
use burn::tensor::{backend::Backend, Int, Tensor};
use tracing::{debug, info};

use crate::checkpoint::load_pretrained;
use crate::config::{SimplifierConfig, T5Config};
use crate::data::{PretrainedTokenizer, Tokenizer};
use crate::model::{beam_search, BeamSearchConfig, Hypothesis, T5ForConditionalGeneration};

/// Pretrained T5 wrapped behind a text-in, text-out call. Loaded once and
/// reused for every request.
pub struct Simplifier<B: Backend> {
    model: T5ForConditionalGeneration<B>,
    tokenizer: Box<dyn Tokenizer>,
    config: SimplifierConfig,
    search: BeamSearchConfig,
    device: B::Device,
}

impl<B: Backend> Simplifier<B> {
    /// Load tokenizer and weights from `config.model_dir`. The checkpoint's own
    /// `config.json` takes precedence over `t5`.
    pub fn load(config: &SimplifierConfig, t5: &T5Config, device: &B::Device) -> Result<Self> {
        let model_dir = &config.model_dir;
        info!("Loading simplification model from: {:?}", model_dir);

        let t5 = T5Config::from_model_dir(model_dir)?.unwrap_or_else(|| t5.clone());
        t5.validate()?;
        info!("Model config: {}", t5);

        let tokenizer = PretrainedTokenizer::from_model_dir(model_dir)
            .with_context(|| format!("Failed to load tokenizer for {:?}", model_dir))?;
        let model = load_pretrained::<B>(model_dir, &t5, device)?;

        info!("Simplification model loaded");
        Ok(Self::new(model, Box::new(tokenizer), config.clone(), &t5, device.clone()))
    }

    pub fn new(
        model: T5ForConditionalGeneration<B>,
        tokenizer: Box<dyn Tokenizer>,
        config: SimplifierConfig,
        t5: &T5Config,
        device: B::Device,
    ) -> Self {
        let search = BeamSearchConfig {
            num_beams: config.num_beams,
            max_length: config.max_output_tokens,
            early_stopping: config.early_stopping,
            length_penalty: 1.0,
            eos_token_id: tokenizer.eos_id(),
            decoder_start_token_id: t5.decoder_start_token_id,
        };

        Self {
            model,
            tokenizer,
            config,
            search,
            device,
        }
    }

    pub fn config(&self) -> &SimplifierConfig {
        &self.config
    }

    /// Prompt token ids: prefix + text, cut to `max_input_tokens` with the
    /// closing EOS kept. Anything past the limit is dropped without error.
    pub fn prepare_input(&self, text: &str) -> Result<Vec<u32>> {
        let prompt = format!("{}{}", self.config.prefix, text);
        let mut ids = self.tokenizer.encode(&prompt)?;

        let limit = self.config.max_input_tokens.saturating_sub(1);
        if ids.len() > limit {
            debug!("Truncating input from {} to {} tokens", ids.len() + 1, limit + 1);
            ids.truncate(limit);
        }
        ids.push(self.tokenizer.eos_id());
        Ok(ids)
    }

    /// Beam-search decode for already tokenized input.
    pub fn generate(&self, input_ids: &[u32]) -> Result<Hypothesis> {
        let input: Vec<i64> = input_ids.iter().map(|&id| id as i64).collect();
        let input = Tensor::<B, 1, Int>::from_ints(input.as_slice(), &self.device).reshape([1, input_ids.len()]);
        let encoder_hidden = self.model.encode(input);

        beam_search(&self.search, |sequences| {
            let beams = sequences.len();
            let seq_len = sequences[0].len();
            let flat: Vec<i64> = sequences.iter().flatten().map(|&id| id as i64).collect();
            let decoder_ids = Tensor::<B, 1, Int>::from_ints(flat.as_slice(), &self.device).reshape([beams, seq_len]);

            let logits = self
                .model
                .next_token_logits(decoder_ids, encoder_hidden.clone().repeat_dim(0, beams));
            let vocab = logits.dims()[1];
            let scores: Vec<f32> = log_softmax(logits, 1)
                .into_data()
                .convert::<f32>()
                .to_vec()
                .map_err(|e| anyhow!("Failed to read decoder scores: {:?}", e))?;

            Ok(scores.chunks(vocab).map(|row| row.to_vec()).collect())
        })
    }

    /// Rewrite `text` in simpler language.
    pub fn simplify(&self, text: &str) -> Result<String> {
        let input_ids = self.prepare_input(text)?;
        debug!("Simplifying {} input tokens", input_ids.len());

        let hypothesis = self.generate(&input_ids)?;
        debug!(
            "Generated {} tokens (score {:.4})",
            hypothesis.tokens.len(),
            hypothesis.score
        );

        self.tokenizer.decode(&hypothesis.tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tokenizer::tests::WordTokenizer;
    use crate::model::t5::tests::{tiny_config, TestBackend};

    const WORDS: &[&str] = &["simplify:", "the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog"];

    fn simplifier(config: SimplifierConfig) -> Simplifier<TestBackend> {
        let device = Default::default();
        let tokenizer = WordTokenizer::new(WORDS);
        let t5 = tiny_config(tokenizer.vocab_size());
        let model = T5ForConditionalGeneration::new(&t5, &device);
        Simplifier::new(model, Box::new(tokenizer), config, &t5, device)
    }

    fn small_config(max_input_tokens: usize, max_output_tokens: usize) -> SimplifierConfig {
        SimplifierConfig {
            max_input_tokens,
            max_output_tokens,
            ..SimplifierConfig::default()
        }
    }

    #[test]
    fn test_prepare_input_adds_prefix_and_eos() {
        let simplifier = simplifier(small_config(512, 10));
        let ids = simplifier.prepare_input("the fox").unwrap();
        // <pad> </s> <unk> then WORDS in order
        assert_eq!(ids, vec![3, 4, 7, 1]);
    }

    #[test]
    fn test_prepare_input_truncates_silently() {
        let simplifier = simplifier(small_config(5, 10));
        let text = "the quick brown fox jumps over the lazy dog";
        let ids = simplifier.prepare_input(text).unwrap();
        assert_eq!(ids.len(), 5);
        assert_eq!(ids.last(), Some(&1));
        assert_eq!(&ids[..4], &[3, 4, 5, 6]);
    }

    #[test]
    fn test_generation_respects_output_cap() {
        for max_output_tokens in [2, 6] {
            let simplifier = simplifier(small_config(512, max_output_tokens));
            let input = simplifier.prepare_input("the quick brown fox").unwrap();
            let hypothesis = simplifier.generate(&input).unwrap();
            assert!(hypothesis.tokens.len() < max_output_tokens);
            assert!(hypothesis.tokens.iter().all(|&t| t != 1));
        }
    }

    #[test]
    fn test_simplify_returns_vocabulary_words() {
        let simplifier = simplifier(small_config(512, 8));
        let output = simplifier.simplify("the lazy dog").unwrap();
        assert!(output.split_whitespace().all(|w| WORDS.contains(&w)));
        assert!(output.split_whitespace().count() < 8);
    }
}
