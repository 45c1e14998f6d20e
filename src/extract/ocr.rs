use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::process::{ensure_available, run};

const TESSERACT: &str = "tesseract";
const PDFTOPPM: &str = "pdftoppm";
const TESSERACT_HINT: &str = "Linux: sudo apt-get install tesseract-ocr, Mac: brew install tesseract";
const POPPLER_HINT: &str = "Linux: sudo apt-get install poppler-utils, Mac: brew install poppler";

/// Run Tesseract on a PNG and return what it printed.
fn tesseract_png(png: &Path, language: &str) -> Result<String> {
    let output = run(
        TESSERACT,
        [png.as_os_str(), OsStr::new("stdout"), OsStr::new("-l"), OsStr::new(language)],
    )?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Recognise the text of a PNG or JPEG image.
///
/// The image is decoded and converted to 8-bit grayscale before being handed
/// to Tesseract, so any format `image` reads is accepted.
pub fn ocr_image(path: &Path, language: &str) -> Result<String> {
    info!("Performing OCR on image: {:?}", path);
    ensure_available(TESSERACT, TESSERACT_HINT)?;

    let image = image::open(path).with_context(|| format!("Failed to decode image: {:?}", path))?;
    let gray = image.to_luma8();

    let temp_dir = tempfile::Builder::new()
        .prefix("reading_assistant_ocr")
        .tempdir()
        .with_context(|| "Failed to create OCR scratch directory")?;
    let png = temp_dir.path().join("input.png");
    gray.save(&png)
        .with_context(|| format!("Failed to write grayscale image: {:?}", png))?;

    let text = tesseract_png(&png, language)?;
    info!("OCR completed: {} characters", text.len());
    Ok(text)
}

/// Rasterise every page of a scanned PDF and OCR the pages in order.
pub fn ocr_pdf(path: &Path, language: &str) -> Result<String> {
    info!("Performing OCR on PDF: {:?}", path);
    ensure_available(TESSERACT, TESSERACT_HINT)?;
    ensure_available(PDFTOPPM, POPPLER_HINT)?;

    let temp_dir = tempfile::Builder::new()
        .prefix("reading_assistant_ocr")
        .tempdir()
        .with_context(|| "Failed to create OCR scratch directory")?;

    info!("Converting PDF to images...");
    run(
        PDFTOPPM,
        [
            OsStr::new("-png"),
            path.as_os_str(),
            temp_dir.path().join("page").as_os_str(),
        ],
    )?;

    // pdftoppm zero-pads page numbers, so name order is page order.
    let mut pages: Vec<_> = fs::read_dir(temp_dir.path())
        .with_context(|| format!("Failed to list rendered pages in {:?}", temp_dir.path()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("png"))
        .collect();
    pages.sort();

    let mut texts = Vec::with_capacity(pages.len());
    for (idx, page) in pages.iter().enumerate() {
        info!("OCR processing page {}/{}...", idx + 1, pages.len());
        match tesseract_png(page, language) {
            Ok(text) if !text.trim().is_empty() => texts.push(text),
            Ok(_) => {}
            Err(e) => warn!("Tesseract failed for page {}: {}", idx + 1, e),
        }
    }

    info!("OCR completed: {} pages processed", pages.len());
    Ok(texts.join("\n"))
}
