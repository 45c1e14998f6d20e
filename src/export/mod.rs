//! Saving simplified text as a text file, a PDF document and spoken audio.

mod pdf;

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{ExportConfig, PdfLayout};
use crate::speech::SpeechEngine;

pub use pdf::render_pdf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Text,
    Pdf,
    Audio,
}

/// A file written by one of the exporters.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportArtifact {
    pub kind: ExportKind,
    pub path: PathBuf,
    pub bytes: u64,
}

impl ExportArtifact {
    fn from_file(kind: ExportKind, path: &Path) -> Result<Self> {
        let bytes = fs::metadata(path)
            .with_context(|| format!("Export was not written: {:?}", path))?
            .len();
        Ok(Self {
            kind,
            path: path.to_path_buf(),
            bytes,
        })
    }
}

/// Write `text` to `path` exactly as given.
pub fn export_text(text: &str, path: &Path) -> Result<ExportArtifact> {
    fs::write(path, text).with_context(|| format!("Failed to write text file: {:?}", path))?;
    info!("Text saved to {:?}", path);
    ExportArtifact::from_file(ExportKind::Text, path)
}

pub fn export_pdf(text: &str, path: &Path, layout: &PdfLayout) -> Result<ExportArtifact> {
    layout.validate()?;
    pdf::write_pdf(text, path, layout)?;
    info!("PDF saved to {:?}", path);
    ExportArtifact::from_file(ExportKind::Pdf, path)
}

pub fn export_audio(text: &str, path: &Path, engine: &dyn SpeechEngine) -> Result<ExportArtifact> {
    engine.synthesize(text, path)?;
    ExportArtifact::from_file(ExportKind::Audio, path)
}

/// Write every export of `text` into `dir` using the configured file names.
/// Audio is skipped with a warning when no speech engine is available or
/// there is nothing to say.
pub fn export_all(
    text: &str,
    dir: &Path,
    config: &ExportConfig,
    engine: Option<&dyn SpeechEngine>,
) -> Result<Vec<ExportArtifact>> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create output directory: {:?}", dir))?;

    let mut artifacts = vec![
        export_text(text, &dir.join(&config.text_file))?,
        export_pdf(text, &dir.join(&config.pdf_file), &config.pdf)?,
    ];

    match engine {
        Some(_) if text.trim().is_empty() => warn!("Text is empty, skipping audio export"),
        Some(engine) => artifacts.push(export_audio(text, &dir.join(&config.audio_file), engine)?),
        None => warn!("No speech engine available, skipping audio export"),
    }

    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Records synthesis requests and writes a placeholder file.
    #[derive(Default)]
    struct RecordingEngine {
        spoken: RefCell<Vec<String>>,
    }

    impl SpeechEngine for RecordingEngine {
        fn speak(&self, text: &str) -> Result<()> {
            self.spoken.borrow_mut().push(text.to_string());
            Ok(())
        }

        fn synthesize(&self, text: &str, path: &Path) -> Result<()> {
            self.spoken.borrow_mut().push(text.to_string());
            fs::write(path, b"ID3fake")?;
            Ok(())
        }

        fn set_rate(&mut self, _rate: u32) -> Result<()> {
            Ok(())
        }

        fn set_pitch(&mut self, _pitch: u32) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_export_text_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let text = "  Ünïcödé\r\nkeeps   spacing\n\n";

        let artifact = export_text(text, &path).unwrap();
        assert_eq!(fs::read(&path).unwrap(), text.as_bytes());
        assert_eq!(artifact.kind, ExportKind::Text);
        assert_eq!(artifact.bytes, text.len() as u64);
    }

    #[test]
    fn test_export_pdf_page_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.pdf");
        let text = (1..=30).map(|i| format!("Line {}", i)).collect::<Vec<_>>().join("\n");

        let artifact = export_pdf(&text, &path, &PdfLayout::default()).unwrap();
        assert!(artifact.bytes > 0);

        let doc = lopdf::Document::load(&path).unwrap();
        assert_eq!(doc.get_pages().len(), 2);
    }

    #[test]
    fn test_export_pdf_empty_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.pdf");
        export_pdf("", &path, &PdfLayout::default()).unwrap();

        let doc = lopdf::Document::load(&path).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn test_export_pdf_rejects_bad_layout() {
        let dir = tempfile::tempdir().unwrap();
        let layout = PdfLayout {
            cell_width_mm: 500.0,
            ..PdfLayout::default()
        };
        assert!(export_pdf("text", &dir.path().join("bad.pdf"), &layout).is_err());
    }

    #[test]
    fn test_export_all() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested");
        let engine = RecordingEngine::default();

        let artifacts = export_all("Simple text.", &out, &ExportConfig::default(), Some(&engine)).unwrap();
        let kinds: Vec<ExportKind> = artifacts.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, [ExportKind::Text, ExportKind::Pdf, ExportKind::Audio]);
        assert_eq!(artifacts[2].path, out.join("simplified_audio.mp3"));
        assert_eq!(engine.spoken.borrow().as_slice(), ["Simple text."]);
        assert!(artifacts.iter().all(|a| a.path.exists()));
    }

    #[test]
    fn test_export_all_empty_text_skips_audio() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RecordingEngine::default();

        let artifacts = export_all("  \n", dir.path(), &ExportConfig::default(), Some(&engine)).unwrap();
        let kinds: Vec<ExportKind> = artifacts.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, [ExportKind::Text, ExportKind::Pdf]);
        assert!(engine.spoken.borrow().is_empty());
        assert!(!dir.path().join("simplified_audio.mp3").exists());
    }

    #[test]
    fn test_export_all_without_engine() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = export_all("Simple text.", dir.path(), &ExportConfig::default(), None).unwrap();
        assert_eq!(artifacts.len(), 2);
        assert!(!dir.path().join("simplified_audio.mp3").exists());
    }
}
