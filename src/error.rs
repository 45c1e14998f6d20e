use std::path::PathBuf;
use thiserror::Error;

/// Failures callers may want to tell apart from plain I/O errors.
#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("unsupported input file {path:?}: expected .txt, .pdf, .png, .jpg or .jpeg")]
    UnsupportedInput { path: PathBuf },

    #[error("`{program}` is not installed or not in PATH ({hint})")]
    ToolMissing { program: String, hint: String },

    #[error("`{program}` exited with {status}: {stderr}")]
    ToolFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("{0} needs non-empty text")]
    EmptyText(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
