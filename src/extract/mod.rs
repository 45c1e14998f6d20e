//! Turning user input (typed text, text files, PDFs, images) into plain text.

pub mod ocr;
pub mod pdf_parser;
pub mod text_processor;

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::AssistantError;

pub use ocr::{ocr_image, ocr_pdf};
pub use pdf_parser::{extract_text_from_pdf, PdfContent};
pub use text_processor::clean_text;

/// Paragraph offered when the user has nothing at hand to try the assistant on.
pub const SAMPLE_TEXT: &str = "The quick brown fox jumps over the lazy dog. \
This is a complex sentence that contains various grammatical structures and vocabulary \
that might be challenging for some readers to understand. Artificial intelligence can \
help make reading more accessible by simplifying complex text while preserving the \
original meaning and intent of the author.";

/// Where the input text comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum InputSource {
    Text(String),
    File(PathBuf),
    Sample,
}

/// Supported upload formats, told apart by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    PlainText,
    Pdf,
    Image,
}

impl InputKind {
    pub fn from_path(path: &Path) -> Result<Self, AssistantError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("txt") => Ok(Self::PlainText),
            Some("pdf") => Ok(Self::Pdf),
            Some("png" | "jpg" | "jpeg") => Ok(Self::Image),
            _ => Err(AssistantError::UnsupportedInput {
                path: path.to_path_buf(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Normalise whitespace and drop page numbers after extraction.
    pub clean: bool,
    /// OCR PDFs that have no text layer instead of returning nothing.
    pub ocr_fallback: bool,
    pub ocr_language: String,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            clean: false,
            ocr_fallback: false,
            ocr_language: "eng".to_string(),
        }
    }
}

fn read_plain_text(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read text file: {:?}", path))?;
    String::from_utf8(bytes).with_context(|| format!("Text file is not valid UTF-8: {:?}", path))
}

fn read_pdf(path: &Path, options: &ExtractOptions) -> Result<String> {
    let content = extract_text_from_pdf(path)?;
    if content.has_text || !options.ocr_fallback {
        return Ok(content.joined());
    }

    info!("PDF appears to be scanned, attempting OCR...");
    ocr_pdf(path, &options.ocr_language)
}

/// Extract the text of `source`.
pub fn extract_text(source: &InputSource, options: &ExtractOptions) -> Result<String> {
    let text = match source {
        InputSource::Text(text) => text.clone(),
        InputSource::Sample => SAMPLE_TEXT.to_string(),
        InputSource::File(path) => {
            let text = match InputKind::from_path(path)? {
                InputKind::PlainText => read_plain_text(path)?,
                InputKind::Pdf => read_pdf(path, options)?,
                InputKind::Image => ocr_image(path, &options.ocr_language)?,
            };
            info!("Extracted {} characters from {:?}", text.chars().count(), path);
            text
        }
    };

    Ok(if options.clean { clean_text(&text) } else { text })
}
