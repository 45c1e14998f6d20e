use anyhow::{Context, Result};
use pdf_extract::extract_text_by_pages;
use std::path::Path;
use tracing::{info, warn};

/// Text pulled out of a PDF
#[derive(Debug, Clone)]
pub struct PdfContent {
    /// Pages that carry text, in document order
    pub pages: Vec<String>,
    pub has_text: bool,
}

impl PdfContent {
    /// Non-empty pages joined by a single newline
    pub fn joined(&self) -> String {
        self.pages.join("\n")
    }
}

/// Extract text from a PDF file
pub fn extract_text_from_pdf(path: &Path) -> Result<PdfContent> {
    info!("Extracting text from PDF: {:?}", path);

    let raw_pages = extract_text_by_pages(path)
        .with_context(|| format!("Failed to extract text from PDF: {:?}", path))?;
    let total = raw_pages.len();

    let pages = keep_text_pages(raw_pages);
    let has_text = !pages.is_empty();

    if !has_text {
        warn!("PDF appears to be scanned or has no extractable text: {:?}", path);
    }

    info!("Extracted {} of {} pages with text from PDF", pages.len(), total);

    Ok(PdfContent { pages, has_text })
}

/// Drop pages without text and trim the blank lines around the rest.
fn keep_text_pages(pages: Vec<String>) -> Vec<String> {
    pages
        .into_iter()
        .filter(|page| !page.trim().is_empty())
        .map(|page| page.trim_matches('\n').to_string())
        .collect()
}
