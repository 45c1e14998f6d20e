use anyhow::{anyhow, Result};
use burn::tensor::backend::Backend;
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

use crate::config::AssistantConfig;
use crate::export::{export_all, ExportArtifact};
use crate::extract::{extract_text, ExtractOptions, InputSource};
use crate::inference::Simplifier;
use crate::speech::{EspeakEngine, SpeechEngine};

/// Reading assistant: one loaded simplifier and speech engine shared by
/// every request of the process.
pub struct ReadingAssistant<B: Backend> {
    simplifier: Simplifier<B>,
    speech: Option<Box<dyn SpeechEngine>>,
    config: AssistantConfig,
}

impl<B: Backend> ReadingAssistant<B> {
    /// Load the model and start the speech engine. A missing speech engine
    /// only disables speaking and audio export.
    pub fn load(config: AssistantConfig, device: &B::Device) -> Result<Self> {
        config.validate()?;
        let simplifier = Simplifier::load(&config.simplifier, &config.t5, device)?;

        let speech: Option<Box<dyn SpeechEngine>> = match EspeakEngine::new(config.speech.clone()) {
            Ok(engine) => Some(Box::new(engine)),
            Err(err) => {
                warn!("Speech disabled: {:#}", err);
                None
            }
        };

        Ok(Self::new(simplifier, speech, config))
    }

    pub fn new(simplifier: Simplifier<B>, speech: Option<Box<dyn SpeechEngine>>, config: AssistantConfig) -> Self {
        Self {
            simplifier,
            speech,
            config,
        }
    }

    pub fn config(&self) -> &AssistantConfig {
        &self.config
    }

    pub fn extract(&self, source: &InputSource, clean: bool, ocr_fallback: bool) -> Result<String> {
        let options = ExtractOptions {
            clean,
            ocr_fallback,
            ocr_language: self.config.ocr_language.clone(),
        };
        extract_text(source, &options)
    }

    pub fn simplify(&self, text: &str) -> Result<String> {
        let simplified = self.simplifier.simplify(text)?;
        info!(
            "Simplified {} words into {} words",
            TextStats::of(text).words,
            TextStats::of(&simplified).words
        );
        Ok(simplified)
    }

    fn speech_engine(&self) -> Result<&dyn SpeechEngine> {
        self.speech
            .as_deref()
            .ok_or_else(|| anyhow!("No speech engine available (is `{}` installed?)", self.config.speech.program))
    }

    pub fn speak(&self, text: &str) -> Result<()> {
        self.speech_engine()?.speak(text)
    }

    /// Change the speaking rate for later calls.
    pub fn set_rate(&mut self, rate: u32) -> Result<()> {
        match self.speech.as_mut() {
            Some(engine) => engine.set_rate(rate),
            None => Err(anyhow!("No speech engine available")),
        }
    }

    pub fn set_pitch(&mut self, pitch: u32) -> Result<()> {
        match self.speech.as_mut() {
            Some(engine) => engine.set_pitch(pitch),
            None => Err(anyhow!("No speech engine available")),
        }
    }

    /// Write the text, PDF and audio exports of `text` into `dir`.
    pub fn export_all(&self, text: &str, dir: &Path) -> Result<Vec<ExportArtifact>> {
        export_all(text, dir, &self.config.export, self.speech.as_deref())
    }

    pub fn compare(&self, original: &str, simplified: &str) -> Comparison {
        Comparison::new(original, simplified)
    }
}

/// Size figures of a text shown next to each other for original and
/// simplified versions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextStats {
    pub characters: usize,
    pub words: usize,
    pub sentences: usize,
}

impl TextStats {
    pub fn of(text: &str) -> Self {
        let sentences = text
            .split(['.', '!', '?'])
            .filter(|sentence| sentence.chars().any(char::is_alphanumeric))
            .count();

        Self {
            characters: text.chars().count(),
            words: text.split_whitespace().count(),
            sentences,
        }
    }

    pub fn words_per_sentence(&self) -> f32 {
        if self.sentences == 0 {
            0.0
        } else {
            self.words as f32 / self.sentences as f32
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    pub original: TextStats,
    pub simplified: TextStats,
}

impl Comparison {
    pub fn new(original: &str, simplified: &str) -> Self {
        Self {
            original: TextStats::of(original),
            simplified: TextStats::of(simplified),
        }
    }

    /// Fraction of words removed by simplification; negative if it grew.
    pub fn word_reduction(&self) -> f32 {
        if self.original.words == 0 {
            0.0
        } else {
            1.0 - self.simplified.words as f32 / self.original.words as f32
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<20}{:>10}{:>12}", "", "Original", "Simplified")?;
        writeln!(f, "{:<20}{:>10}{:>12}", "Characters", self.original.characters, self.simplified.characters)?;
        writeln!(f, "{:<20}{:>10}{:>12}", "Words", self.original.words, self.simplified.words)?;
        writeln!(f, "{:<20}{:>10}{:>12}", "Sentences", self.original.sentences, self.simplified.sentences)?;
        writeln!(
            f,
            "{:<20}{:>10.1}{:>12.1}",
            "Words per sentence",
            self.original.words_per_sentence(),
            self.simplified.words_per_sentence()
        )?;
        write!(f, "Word reduction: {:.0}%", self.word_reduction() * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimplifierConfig;
    use crate::data::tokenizer::tests::WordTokenizer;
    use crate::data::Tokenizer;
    use crate::extract::SAMPLE_TEXT;
    use crate::model::t5::tests::{tiny_config, TestBackend};
    use crate::model::T5ForConditionalGeneration;

    fn assistant() -> ReadingAssistant<TestBackend> {
        let device = Default::default();
        let tokenizer = WordTokenizer::new(&["simplify:", "a", "cat", "sat"]);
        let t5 = tiny_config(tokenizer.vocab_size());
        let model = T5ForConditionalGeneration::new(&t5, &device);
        let config = SimplifierConfig {
            max_output_tokens: 6,
            num_beams: 2,
            ..SimplifierConfig::default()
        };
        let simplifier = Simplifier::new(model, Box::new(tokenizer), config, &t5, device);
        ReadingAssistant::new(simplifier, None, AssistantConfig::default())
    }

    #[test]
    fn test_text_stats() {
        let stats = TextStats::of("The cat sat. It was happy! Was it?  ");
        assert_eq!(stats.words, 8);
        assert_eq!(stats.sentences, 3);
        assert_eq!(stats.characters, 36);
        assert!((stats.words_per_sentence() - 8.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_text_stats_ignores_stray_punctuation() {
        let stats = TextStats::of("Wait... what?!");
        assert_eq!(stats.sentences, 2);
        assert_eq!(TextStats::of("").words_per_sentence(), 0.0);
    }

    #[test]
    fn test_compare() {
        let comparison = Comparison::new("one two three four", "one two");
        assert!((comparison.word_reduction() - 0.5).abs() < 1e-6);
        let table = comparison.to_string();
        assert!(table.contains("Words"));
        assert!(table.ends_with("Word reduction: 50%"));
    }

    #[test]
    fn test_extract_and_simplify_sample() {
        let assistant = assistant();
        let text = assistant.extract(&InputSource::Sample, false, false).unwrap();
        assert_eq!(text, SAMPLE_TEXT);

        let simplified = assistant.simplify("a cat sat").unwrap();
        for word in simplified.split_whitespace() {
            assert!(["simplify:", "a", "cat", "sat", "<unk>"].contains(&word), "{}", word);
        }
    }

    #[test]
    fn test_without_speech_engine() {
        let mut assistant = assistant();
        assert!(assistant.speak("hello").is_err());
        assert!(assistant.set_rate(150).is_err());

        let dir = tempfile::tempdir().unwrap();
        let artifacts = assistant.export_all("A cat sat.", dir.path()).unwrap();
        assert_eq!(artifacts.len(), 2);
    }
}
