//! Encoding persistence
//!
//! Frozen encodings are exported as an [`EncodingFile`] in JSON or YAML and
//! imported back into a registry.

mod encodings;
mod format;
mod load;
mod save;


pub use encodings::{EncodingFile, ENCODING_FILE_VERSION};
pub use format::{FileFormat, SaveConfig};
pub use load::load_encodings;
pub use save::save_encodings;
