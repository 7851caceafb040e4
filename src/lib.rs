//! # Quantsim: Quantization Simulation Core
//!
//! Quantsim simulates, in floating point, the error a tensor incurs when stored
//! in a low-bitwidth fixed-point format. Quantization-aware training and
//! post-training quantization pipelines insert a [`Quantizer`] per tensor,
//! calibrate it, then run inference through the frozen grid.
//!
//! ## Architecture
//!
//! - **quant**: Encodings, min/max calibration, the quantize-dequantize
//!   transform, op-mode dispatch and the stateful quantizer
//! - **device**: Elementwise transform backends (host, parallel) and scratch
//!   allocation
//! - **registry**: Indexed ownership of the quantizers of a graph
//! - **config**: Declarative YAML/JSON configuration
//! - **io**: Encoding export and import (JSON, YAML formats)
//!
//! ## Example
//!
//! ```
//! use quantsim::{OpMode, Quantizer, QuantizerConfig};
//!
//! let quantizer = Quantizer::new(QuantizerConfig::new(8, false).with_seed(0))?;
//!
//! // calibrate
//! let mut output = [0.0f32; 3];
//! quantizer.compute(&[-0.46, 0.1, 0.72], &mut output)?;
//! quantizer.compute_encodings()?;
//!
//! // simulate
//! quantizer.set_op_mode(OpMode::QuantizeDequantize);
//! quantizer.compute(&[-0.25, 0.0, 0.25], &mut output)?;
//! assert_eq!(output[1], 0.0);
//! # Ok::<(), quantsim::Error>(())
//! ```

pub mod config;
pub mod device;
pub mod io;
pub mod quant;
pub mod registry;

pub mod error;

// Re-export commonly used types
pub use config::{QuantSimConfig, QuantizerConfig};
pub use device::Device;
pub use error::{Error, Result};
pub use quant::{Encoding, EncodingAnalyzer, OpMode, Quantizer, Rounding, RoundingMode};
pub use registry::{QuantizerId, QuantizerRegistry, TensorKind};
