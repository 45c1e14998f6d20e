pub mod generation;
pub mod t5;

pub use generation::{beam_search, BeamSearchConfig, Hypothesis};
pub use t5::{relative_position_bucket, T5ForConditionalGeneration};
