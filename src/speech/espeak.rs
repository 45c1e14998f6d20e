use anyhow::{Context, Result};
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::{AudioFormat, SpeechEngine};
use crate::config::SpeechConfig;
use crate::error::AssistantError;
use crate::process::{ensure_available, run};

const ESPEAK_HINT: &str = "Linux: sudo apt-get install espeak-ng, Mac: brew install espeak-ng";
const LAME_HINT: &str = "Linux: sudo apt-get install lame, Mac: brew install lame";
/// espeak-ng accepts pitch values 0-99.
const MAX_ESPEAK_PITCH: u32 = 99;

/// Drives the `espeak-ng` command line synthesizer.
#[derive(Debug, Clone)]
pub struct EspeakEngine {
    config: SpeechConfig,
}

impl EspeakEngine {
    pub fn new(config: SpeechConfig) -> Result<Self> {
        config.validate()?;
        ensure_available(&config.program, ESPEAK_HINT)?;
        info!(
            "Speech engine ready: {} (voice {}, rate {}, pitch {})",
            config.program, config.voice, config.rate, config.pitch
        );
        Ok(Self { config })
    }

    pub fn config(&self) -> &SpeechConfig {
        &self.config
    }

    /// Arguments shared by playback and synthesis; text is read from `text_file`.
    fn base_args(&self, text_file: &Path) -> Vec<OsString> {
        vec![
            "-v".into(),
            self.config.voice.clone().into(),
            "-s".into(),
            self.config.rate.to_string().into(),
            "-p".into(),
            self.config.pitch.min(MAX_ESPEAK_PITCH).to_string().into(),
            "-f".into(),
            text_file.as_os_str().to_owned(),
        ]
    }

    /// espeak-ng reads long or dash-prefixed text safely from a file.
    fn text_file(text: &str) -> Result<NamedTempFile> {
        let mut file = NamedTempFile::new().with_context(|| "Failed to create speech text file")?;
        file.write_all(text.as_bytes())
            .with_context(|| "Failed to write speech text file")?;
        file.flush()?;
        Ok(file)
    }

    fn write_wav(&self, text: &str, wav: &Path) -> Result<()> {
        let text_file = Self::text_file(text)?;
        let mut args = self.base_args(text_file.path());
        args.push("-w".into());
        args.push(wav.as_os_str().to_owned());
        run(&self.config.program, args)?;
        Ok(())
    }

    fn encode_mp3(&self, wav: &Path, mp3: &Path) -> Result<()> {
        ensure_available(&self.config.encoder, LAME_HINT)?;
        run(
            &self.config.encoder,
            [OsString::from("--quiet"), wav.as_os_str().to_owned(), mp3.as_os_str().to_owned()],
        )?;
        Ok(())
    }
}

impl SpeechEngine for EspeakEngine {
    fn speak(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            debug!("Nothing to speak");
            return Ok(());
        }

        info!("Speaking {} characters", text.chars().count());
        let text_file = Self::text_file(text)?;
        run(&self.config.program, self.base_args(text_file.path()))?;
        Ok(())
    }

    fn synthesize(&self, text: &str, path: &Path) -> Result<()> {
        if text.trim().is_empty() {
            return Err(AssistantError::EmptyText("audio export").into());
        }

        match AudioFormat::from_path(path)? {
            AudioFormat::Wav => self.write_wav(text, path)?,
            AudioFormat::Mp3 => {
                let wav = tempfile::Builder::new()
                    .suffix(".wav")
                    .tempfile()
                    .with_context(|| "Failed to create temporary WAV file")?;
                self.write_wav(text, wav.path())?;
                self.encode_mp3(wav.path(), path)?;
            }
        }

        let size = fs::metadata(path)
            .with_context(|| format!("Speech engine wrote no audio to {:?}", path))?
            .len();
        info!("Audio saved to {:?} ({} bytes)", path, size);
        Ok(())
    }

    fn set_rate(&mut self, rate: u32) -> Result<()> {
        let mut config = self.config.clone();
        config.rate = rate;
        config.validate()?;
        self.config = config;
        Ok(())
    }

    fn set_pitch(&mut self, pitch: u32) -> Result<()> {
        let mut config = self.config.clone();
        config.pitch = pitch;
        config.validate()?;
        self.config = config;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn installed(program: &str) -> bool {
        Command::new(program).arg("--version").output().is_ok()
    }

    fn engine() -> EspeakEngine {
        // Built directly so argument handling is testable without espeak-ng.
        EspeakEngine {
            config: SpeechConfig::default(),
        }
    }

    #[test]
    fn test_base_args_follow_settings() {
        let mut engine = engine();
        engine.set_rate(120).unwrap();
        engine.set_pitch(100).unwrap();

        let args = engine.base_args(Path::new("/tmp/text.txt"));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, ["-v", "en", "-s", "120", "-p", "99", "-f", "/tmp/text.txt"]);
    }

    #[test]
    fn test_settings_reject_out_of_range() {
        let mut engine = engine();
        assert!(engine.set_rate(50).is_err());
        assert!(engine.set_pitch(150).is_err());
        assert_eq!(engine.config().rate, 180);
        assert_eq!(engine.config().pitch, 50);
    }

    #[test]
    fn test_empty_text() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine();
        engine.speak("   ").unwrap();
        let err = engine.synthesize("", &dir.path().join("out.mp3")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AssistantError>(),
            Some(AssistantError::EmptyText(_))
        ));
    }

    #[test]
    fn test_synthesize_wav() {
        if !installed("espeak-ng") {
            println!("espeak-ng is not installed, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let engine = EspeakEngine::new(SpeechConfig::default()).unwrap();
        engine.synthesize("The fox jumps.", &path).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert!(bytes.len() > 44);
        assert_eq!(&bytes[..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
    }

    #[test]
    fn test_synthesize_mp3() {
        if !installed("espeak-ng") || !installed("lame") {
            println!("espeak-ng or lame is not installed, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mp3");
        let engine = EspeakEngine::new(SpeechConfig::default()).unwrap();
        engine.synthesize("The fox jumps.", &path).unwrap();

        let bytes = fs::read(&path).unwrap();
        let id3 = bytes.starts_with(b"ID3");
        let frame_sync = bytes.len() > 1 && bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0;
        assert!(id3 || frame_sync, "not an MP3 stream");
    }
}
