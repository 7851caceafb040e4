//! Error types for quantsim

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Not calibrated: no encoding available and no statistics observed")]
    NotCalibrated,

    #[error("Size mismatch: input has {input} elements, output has {output}")]
    SizeMismatch { input: usize, output: usize },

    #[error("Allocation failure: could not acquire {requested} scratch elements: {reason}")]
    AllocationFailure { requested: usize, reason: String },

    #[error("Unknown quantizer: {0}")]
    UnknownQuantizer(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, Error>;
