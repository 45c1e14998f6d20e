// Library exports for use in scripts and other binaries

pub mod assistant;
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod extract;
pub mod inference;
pub mod model;
pub mod process;
pub mod speech;

// Re-export commonly used types
pub use assistant::{Comparison, ReadingAssistant, TextStats};
pub use config::AssistantConfig;
pub use error::AssistantError;
pub use extract::InputSource;
pub use inference::{InferenceBackend, Simplifier};
