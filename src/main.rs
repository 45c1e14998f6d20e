use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use reading_assistant::checkpoint::convert_safetensors;
use reading_assistant::config::{AssistantConfig, T5Config};
use reading_assistant::export::{export_all, ExportArtifact};
use reading_assistant::extract::{extract_text, ExtractOptions};
use reading_assistant::speech::{EspeakEngine, SpeechEngine};
use reading_assistant::{InferenceBackend, InputSource, ReadingAssistant};

#[derive(Debug, Parser)]
#[command(author, version, about = "AI reading assistant: extract, simplify, listen and export")]
struct Cli {
    /// Path to configuration JSON file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the text extracted from a file
    Extract(ExtractArgs),
    /// Print a simplified version of the input
    Simplify(SourceArgs),
    /// Read the input aloud
    Speak(SpeakArgs),
    /// Write text, PDF and audio exports
    Export(ExportArgs),
    /// Extract, simplify, compare and export each source
    Process(ProcessArgs),
    /// Import safetensors weights and save them as a burn record
    Convert(ConvertArgs),
}

#[derive(Debug, Args)]
struct ExtractArgs {
    /// .txt, .pdf, .png, .jpg or .jpeg file
    path: PathBuf,
    /// Normalise whitespace and drop page numbers
    #[arg(long)]
    clean: bool,
    /// OCR PDFs without a text layer
    #[arg(long)]
    ocr_fallback: bool,
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
struct SourceArgs {
    /// Text typed on the command line
    #[arg(long)]
    text: Option<String>,
    /// File to read the text from
    #[arg(long)]
    file: Option<PathBuf>,
    /// Use the built-in sample paragraph
    #[arg(long)]
    sample: bool,
}

impl SourceArgs {
    fn source(&self) -> InputSource {
        match (&self.text, &self.file) {
            (Some(text), _) => InputSource::Text(text.clone()),
            (None, Some(path)) => InputSource::File(path.clone()),
            (None, None) => InputSource::Sample,
        }
    }
}

#[derive(Debug, Args)]
struct SpeakArgs {
    #[command(flatten)]
    source: SourceArgs,
    /// Simplify before speaking
    #[arg(long)]
    simplified: bool,
    /// Words per minute (100-300)
    #[arg(long)]
    rate: Option<u32>,
    /// Voice pitch (0-100)
    #[arg(long)]
    pitch: Option<u32>,
}

#[derive(Debug, Args)]
struct ExportArgs {
    #[command(flatten)]
    source: SourceArgs,
    /// Directory the exports are written to
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Export the input as is
    #[arg(long)]
    no_simplify: bool,
}

#[derive(Debug, Args)]
struct ProcessArgs {
    /// Files to process
    #[arg(required = true)]
    sources: Vec<PathBuf>,
    /// Directory the exports are written to, one subdirectory per source
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// OCR PDFs without a text layer
    #[arg(long)]
    ocr_fallback: bool,
}

#[derive(Debug, Args)]
struct ConvertArgs {
    /// Directory holding model.safetensors and config.json
    #[arg(long)]
    model_dir: PathBuf,
}

fn main() -> Result<()> {
    // Logs go to stderr so printed text stays pipeable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from: {:?}", path);
            AssistantConfig::load(path)?
        }
        None => AssistantConfig::default(),
    };

    match cli.command {
        Commands::Extract(args) => extract_command(args, &config),
        Commands::Simplify(args) => simplify_command(args, config),
        Commands::Speak(args) => speak_command(args, config),
        Commands::Export(args) => export_command(args, config),
        Commands::Process(args) => process_command(args, config),
        Commands::Convert(args) => convert_command(args, &config),
    }
}

fn load_assistant(config: AssistantConfig) -> Result<ReadingAssistant<InferenceBackend>> {
    let device = Default::default();
    ReadingAssistant::load(config, &device)
}

fn extract_command(args: ExtractArgs, config: &AssistantConfig) -> Result<()> {
    let options = ExtractOptions {
        clean: args.clean,
        ocr_fallback: args.ocr_fallback,
        ocr_language: config.ocr_language.clone(),
    };
    let text = extract_text(&InputSource::File(args.path), &options)?;
    println!("{}", text);
    Ok(())
}

fn simplify_command(args: SourceArgs, config: AssistantConfig) -> Result<()> {
    let assistant = load_assistant(config)?;
    let text = assistant.extract(&args.source(), false, false)?;
    println!("{}", assistant.simplify(&text)?);
    Ok(())
}

fn speak_command(args: SpeakArgs, config: AssistantConfig) -> Result<()> {
    if args.simplified {
        let mut assistant = load_assistant(config)?;
        if let Some(rate) = args.rate {
            assistant.set_rate(rate)?;
        }
        if let Some(pitch) = args.pitch {
            assistant.set_pitch(pitch)?;
        }
        let text = assistant.extract(&args.source.source(), false, false)?;
        let simplified = assistant.simplify(&text)?;
        return assistant.speak(&simplified);
    }

    // Reading the input as is needs no model.
    let mut engine = EspeakEngine::new(config.speech.clone())?;
    if let Some(rate) = args.rate {
        engine.set_rate(rate)?;
    }
    if let Some(pitch) = args.pitch {
        engine.set_pitch(pitch)?;
    }
    let options = ExtractOptions {
        ocr_language: config.ocr_language.clone(),
        ..ExtractOptions::default()
    };
    let text = extract_text(&args.source.source(), &options)?;
    engine.speak(&text)
}

fn print_artifacts(artifacts: &[ExportArtifact]) {
    for artifact in artifacts {
        println!("{:?}\t{}\t{} bytes", artifact.kind, artifact.path.display(), artifact.bytes);
    }
}

fn export_command(args: ExportArgs, config: AssistantConfig) -> Result<()> {
    let output_dir = args.output_dir.unwrap_or_else(|| config.export.output_dir.clone());

    if args.no_simplify {
        let options = ExtractOptions {
            ocr_language: config.ocr_language.clone(),
            ..ExtractOptions::default()
        };
        let text = extract_text(&args.source.source(), &options)?;
        let engine = EspeakEngine::new(config.speech.clone()).ok();
        let engine = engine.as_ref().map(|engine| engine as &dyn SpeechEngine);
        let artifacts = export_all(&text, &output_dir, &config.export, engine)?;
        print_artifacts(&artifacts);
        return Ok(());
    }

    let assistant = load_assistant(config)?;
    let text = assistant.extract(&args.source.source(), false, false)?;
    let simplified = assistant.simplify(&text)?;
    let artifacts = assistant.export_all(&simplified, &output_dir)?;
    print_artifacts(&artifacts);
    Ok(())
}

/// One export directory per source, named after the file name with its
/// extension. Names shared by several sources get their position prefixed.
fn output_subdirs(root: &Path, sources: &[PathBuf]) -> Vec<PathBuf> {
    let names: Vec<String> = sources
        .iter()
        .enumerate()
        .map(|(idx, source)| {
            source
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("source-{}", idx + 1))
        })
        .collect();

    names
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            if names.iter().filter(|other| *other == name).count() > 1 {
                root.join(format!("{}-{}", idx + 1, name))
            } else {
                root.join(name)
            }
        })
        .collect()
}

fn process_command(args: ProcessArgs, config: AssistantConfig) -> Result<()> {
    let output_root = args.output_dir.unwrap_or_else(|| config.export.output_dir.clone());
    let output_dirs = output_subdirs(&output_root, &args.sources);
    let assistant = load_assistant(config)?;

    for (idx, (path, output_dir)) in args.sources.iter().zip(&output_dirs).enumerate() {
        info!("Processing {}/{}: {:?}", idx + 1, args.sources.len(), path);

        let original = assistant.extract(&InputSource::File(path.clone()), true, args.ocr_fallback)?;
        if original.trim().is_empty() {
            bail!("No text could be extracted from {:?}", path);
        }
        let simplified = assistant.simplify(&original)?;

        println!("=== {} ===", path.display());
        println!("--- Original ---\n{}\n", original);
        println!("--- Simplified ---\n{}\n", simplified);
        println!("{}\n", assistant.compare(&original, &simplified));

        let artifacts = assistant.export_all(&simplified, output_dir)?;
        print_artifacts(&artifacts);
    }

    Ok(())
}

fn convert_command(args: ConvertArgs, config: &AssistantConfig) -> Result<()> {
    let t5 = T5Config::from_model_dir(&args.model_dir)?.unwrap_or_else(|| config.t5.clone());
    let device = Default::default();
    let record = convert_safetensors::<InferenceBackend>(&args.model_dir, &t5, &device)?;
    println!("{}", record.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_subdirs_keep_extension() {
        let sources = [PathBuf::from("notes.txt"), PathBuf::from("notes.pdf")];
        let dirs = output_subdirs(Path::new("out"), &sources);
        assert_eq!(dirs, [PathBuf::from("out/notes.txt"), PathBuf::from("out/notes.pdf")]);
    }

    #[test]
    fn test_output_subdirs_same_file_name() {
        let sources = [
            PathBuf::from("a/doc.pdf"),
            PathBuf::from("b/doc.pdf"),
            PathBuf::from("c/other.pdf"),
        ];
        let dirs = output_subdirs(Path::new("out"), &sources);
        assert_eq!(
            dirs,
            [
                PathBuf::from("out/1-doc.pdf"),
                PathBuf::from("out/2-doc.pdf"),
                PathBuf::from("out/other.pdf"),
            ]
        );
    }
}
