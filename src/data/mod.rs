pub mod tokenizer;

pub use tokenizer::{PretrainedTokenizer, Tokenizer};
