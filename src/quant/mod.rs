//! Quantization simulation core
//!
//! - [`Encoding`]: the grid derived from a float range and a bitwidth
//! - [`EncodingAnalyzer`]: running min/max calibration
//! - [`quantize_dequantize`]: the elementwise fake-quantization transform
//! - [`quantize`] / [`dequantize`]: the same transform split at the integer level
//! - [`Quantizer`]: stateful per-tensor unit dispatching on [`OpMode`]
//! - per-channel encodings and transform

mod analyzer;
mod encoding;
mod fake_quantize;
mod mode;
mod per_channel;
mod quantizer;
mod rounding;

pub use analyzer::{BatchStats, EncodingAnalyzer, RunningStats};
pub use encoding::{
    compute_encoding, num_steps, symmetric_qmax, validate_bitwidth, Encoding, EncodingRecord,
    QuantGrid, MAX_BITWIDTH, MIN_BITWIDTH, MIN_DELTA,
};
pub use fake_quantize::{
    check_sizes, dequantize, quantize, quantize_dequantize, quantize_dequantize_block,
    quantize_dequantize_blocks, BLOCK_SIZE,
};
pub use mode::{ModeSnapshot, ModeState, OpMode};
pub use per_channel::{compute_per_channel_encodings, quantize_dequantize_per_channel};
pub use quantizer::Quantizer;
pub use rounding::{
    block_rng, mix_seed, round_nearest, round_stochastic, uniform, Rounding, RoundingMode,
};
