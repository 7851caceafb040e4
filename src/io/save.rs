//! Encoding file saving

use std::fs::File;
use std::io::Write;
use std::path::Path;

use tracing::info;

use super::encodings::EncodingFile;
use super::format::{FileFormat, SaveConfig};
use crate::{Error, Result};

/// Save encodings to a file
///
/// # Example
///
/// ```no_run
/// use quantsim::io::{save_encodings, EncodingFile, FileFormat, SaveConfig};
///
/// let encodings = EncodingFile::new();
/// save_encodings(&encodings, "encodings.json", &SaveConfig::new(FileFormat::Json)).unwrap();
/// ```
pub fn save_encodings(
    encodings: &EncodingFile,
    path: impl AsRef<Path>,
    config: &SaveConfig,
) -> Result<()> {
    let path = path.as_ref();

    let data = match config.format {
        FileFormat::Json => {
            if config.pretty {
                serde_json::to_string_pretty(encodings)
            } else {
                serde_json::to_string(encodings)
            }
            .map_err(|e| Error::Serialization(format!("JSON serialization failed: {e}")))?
        }
        FileFormat::Yaml => serde_yaml::to_string(encodings)
            .map_err(|e| Error::Serialization(format!("YAML serialization failed: {e}")))?,
    };

    let mut file = File::create(path)?;
    file.write_all(data.as_bytes())?;

    info!(path = %path.display(), tensors = encodings.len(), "saved encodings");
    Ok(())
}
