//! Configuration loading

use std::fs;
use std::path::Path;

use tracing::debug;

use super::schema::QuantSimConfig;
use super::validate::validate_config;
use crate::error::{Error, Result};
use crate::io::FileFormat;

/// Load and validate a simulation configuration
///
/// YAML or JSON, chosen by file extension.
///
/// # Example
///
/// ```no_run
/// use quantsim::config::load_config;
///
/// let config = load_config("quantsim.yaml")?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn load_config<P: AsRef<Path>>(config_path: P) -> Result<QuantSimConfig> {
    let path = config_path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| {
        Error::InvalidConfiguration(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;

    let config = match FileFormat::from_path(path)? {
        FileFormat::Yaml => parse_yaml(&content)?,
        FileFormat::Json => serde_json::from_str(&content).map_err(|e| {
            Error::InvalidConfiguration(format!("Failed to parse JSON config: {}", e))
        })?,
    };

    validate_config(&config)?;
    debug!(
        path = %path.display(),
        activations = config.activations.len(),
        params = config.params.len(),
        "loaded quantsim config"
    );
    Ok(config)
}

/// Parse and validate YAML configuration text
pub fn parse_yaml(content: &str) -> Result<QuantSimConfig> {
    let config: QuantSimConfig = serde_yaml::from_str(content).map_err(|e| {
        Error::InvalidConfiguration(format!("Failed to parse YAML config: {}", e))
    })?;
    validate_config(&config)?;
    Ok(config)
}
