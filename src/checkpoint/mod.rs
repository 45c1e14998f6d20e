mod record;

pub use record::{convert_safetensors, load_pretrained, save_record, RecordMetadata};
