//! Configuration validation

use super::schema::{QuantSimConfig, QuantizerConfig};
use crate::quant::{MAX_BITWIDTH, MIN_BITWIDTH};
use crate::Error;

/// Validation error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid bitwidth: {0} (must be in 1..=32)")]
    InvalidBitwidth(u8),

    #[error("Symmetric quantization needs at least 2 bits, got {0}")]
    SymmetricBitwidth(u8),

    #[error("Empty tensor name")]
    EmptyTensorName,

    #[error("Tensor {0} is listed as both activation and param")]
    DuplicateTensor(String),

    #[error("Tensor {name}: {source}")]
    Tensor {
        name: String,
        #[source]
        source: Box<ValidationError>,
    },
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Error::InvalidConfiguration(e.to_string())
    }
}

/// Validate a single quantizer configuration
pub fn validate_quantizer_config(config: &QuantizerConfig) -> Result<(), ValidationError> {
    if !(MIN_BITWIDTH..=MAX_BITWIDTH).contains(&config.bitwidth) {
        return Err(ValidationError::InvalidBitwidth(config.bitwidth));
    }
    if config.symmetric && config.bitwidth < 2 {
        return Err(ValidationError::SymmetricBitwidth(config.bitwidth));
    }
    Ok(())
}

/// Validate a simulation configuration
///
/// Checks:
/// - defaults and every resolved per-tensor config
/// - tensor names are non-empty and unique across sections
pub fn validate_config(config: &QuantSimConfig) -> Result<(), ValidationError> {
    validate_quantizer_config(&config.defaults)?;

    for (name, over) in config.activations.iter().chain(&config.params) {
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyTensorName);
        }
        validate_quantizer_config(&over.apply(&config.defaults)).map_err(|e| {
            ValidationError::Tensor {
                name: name.clone(),
                source: Box::new(e),
            }
        })?;
    }

    if let Some(name) = config
        .activations
        .keys()
        .find(|name| config.params.contains_key(*name))
    {
        return Err(ValidationError::DuplicateTensor(name.clone()));
    }

    Ok(())
}
