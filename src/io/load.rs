//! Encoding file loading

use std::fs;
use std::path::Path;

use tracing::info;

use super::encodings::EncodingFile;
use super::format::FileFormat;
use crate::{Error, Result};

/// Load encodings from a file
///
/// The format is detected from the file extension. Records are only parsed
/// here; they are validated when imported into a registry.
///
/// # Example
///
/// ```no_run
/// use quantsim::io::load_encodings;
///
/// let encodings = load_encodings("encodings.json").unwrap();
/// println!("{} tensors", encodings.len());
/// ```
pub fn load_encodings(path: impl AsRef<Path>) -> Result<EncodingFile> {
    let path = path.as_ref();
    let format = FileFormat::from_path(path)?;
    let content = fs::read_to_string(path)?;

    let encodings: EncodingFile = match format {
        FileFormat::Json => serde_json::from_str(&content)
            .map_err(|e| Error::Serialization(format!("JSON deserialization failed: {e}")))?,
        FileFormat::Yaml => serde_yaml::from_str(&content)
            .map_err(|e| Error::Serialization(format!("YAML deserialization failed: {e}")))?,
    };

    info!(path = %path.display(), tensors = encodings.len(), "loaded encodings");
    Ok(encodings)
}
