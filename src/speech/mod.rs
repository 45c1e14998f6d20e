//! Text-to-speech through a system speech engine.

mod espeak;

use anyhow::Result;
use std::path::Path;

use crate::error::AssistantError;

pub use espeak::EspeakEngine;

/// Audio container picked from the target file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Mp3,
}

impl AudioFormat {
    pub fn from_path(path: &Path) -> Result<Self, AssistantError> {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("wav") => Ok(Self::Wav),
            Some("mp3") => Ok(Self::Mp3),
            _ => Err(AssistantError::InvalidConfig(format!(
                "audio output {:?} must end in .mp3 or .wav",
                path
            ))),
        }
    }
}

/// A speech engine initialised once and reused. Rate and pitch behave like
/// engine properties: they stick until changed.
pub trait SpeechEngine {
    /// Read `text` aloud, blocking until playback ends.
    fn speak(&self, text: &str) -> Result<()>;

    /// Render `text` into an audio file at `path`.
    fn synthesize(&self, text: &str, path: &Path) -> Result<()>;

    /// Words per minute.
    fn set_rate(&mut self, rate: u32) -> Result<()>;

    fn set_pitch(&mut self, pitch: u32) -> Result<()>;
}
