use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use reading_assistant::extract::InputKind;
use reading_assistant::{AssistantConfig, Comparison, InferenceBackend, InputSource, ReadingAssistant};

#[derive(Debug, Parser)]
#[command(author, version, about = "Simplify every supported document in a directory")]
struct Args {
    /// Input directory containing .txt, .pdf or image files
    #[arg(short, long)]
    input: PathBuf,

    /// Output directory for simplified files
    #[arg(short, long)]
    output: PathBuf,

    /// Path to configuration JSON file
    #[arg(long)]
    config: Option<PathBuf>,

    /// OCR PDFs without a text layer
    #[arg(long, default_value = "false")]
    ocr_fallback: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct DocumentEntry {
    source: PathBuf,
    output: PathBuf,
    original_words: usize,
    simplified_words: usize,
    processed_at: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct FailedEntry {
    source: PathBuf,
    error: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BatchManifest {
    total_documents: usize,
    documents: Vec<DocumentEntry>,
    failed: Vec<FailedEntry>,
}

fn find_documents(input: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(input)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|path| InputKind::from_path(path).is_ok())
        .collect();
    files.sort();
    files
}

/// Output file for `source`: its path under `input`, mirrored under
/// `output_dir`, with the full file name (extension included) kept so
/// `notes.txt` and `notes.pdf` do not collide.
fn output_path(input: &Path, source: &Path, output_dir: &Path) -> PathBuf {
    let relative = source.strip_prefix(input).unwrap_or(source);
    let file_name = relative
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_string());
    let parent = relative.parent().unwrap_or_else(|| Path::new(""));
    output_dir.join(parent).join(format!("{}.simplified.txt", file_name))
}

fn process_document(
    assistant: &ReadingAssistant<InferenceBackend>,
    path: &Path,
    output: PathBuf,
    ocr_fallback: bool,
) -> Result<DocumentEntry> {
    let original = assistant.extract(&InputSource::File(path.to_path_buf()), true, ocr_fallback)?;
    if original.trim().is_empty() {
        anyhow::bail!("no text could be extracted");
    }

    let simplified = assistant.simplify(&original)?;
    let stats = Comparison::new(&original, &simplified);

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory: {:?}", parent))?;
    }
    fs::write(&output, &simplified)
        .with_context(|| format!("Failed to write simplified text: {:?}", output))?;

    Ok(DocumentEntry {
        source: path.to_path_buf(),
        output,
        original_words: stats.original.words,
        simplified_words: stats.simplified.words,
        processed_at: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default(),
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    info!("Input directory: {:?}", args.input);
    info!("Output directory: {:?}", args.output);

    fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create output directory: {:?}", args.output))?;

    let files = find_documents(&args.input);
    info!("Found {} documents", files.len());
    if files.is_empty() {
        anyhow::bail!("No supported documents found in {:?}", args.input);
    }

    let config = match &args.config {
        Some(path) => AssistantConfig::load(path)?,
        None => AssistantConfig::default(),
    };
    let device = Default::default();
    let assistant = ReadingAssistant::<InferenceBackend>::load(config, &device)?;

    let mut manifest = BatchManifest {
        total_documents: files.len(),
        ..BatchManifest::default()
    };

    for (idx, path) in files.iter().enumerate() {
        info!("Processing {}/{}: {:?}", idx + 1, files.len(), path);

        let output = output_path(&args.input, path, &args.output);
        match process_document(&assistant, path, output, args.ocr_fallback) {
            Ok(entry) => {
                info!(
                    "  {} -> {} words, saved to {:?}",
                    entry.original_words, entry.simplified_words, entry.output
                );
                manifest.documents.push(entry);
            }
            Err(e) => {
                warn!("Failed to process {:?}: {:#}", path, e);
                manifest.failed.push(FailedEntry {
                    source: path.clone(),
                    error: format!("{:#}", e),
                });
            }
        }
    }

    let manifest_path = args.output.join("manifest.json");
    let manifest_json = serde_json::to_string_pretty(&manifest)?;
    fs::write(&manifest_path, manifest_json)
        .with_context(|| format!("Failed to write manifest: {:?}", manifest_path))?;
    info!("Manifest saved to: {:?}", manifest_path);

    info!("Batch complete!");
    info!("  - Simplified: {}", manifest.documents.len());
    info!("  - Failed: {}", manifest.failed.len());

    Ok(())
}
