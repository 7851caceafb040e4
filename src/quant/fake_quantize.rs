//! Fake quantization: the quantize-dequantize transform
//!
//! Fake quantization simulates fixed-point storage while staying in floating point:
//! each element is mapped to its grid level and straight back, so the output
//! carries exactly the rounding and clamping error the hardware would introduce.
//!
//! Per element, with `zero_point = -offset`:
//!
//! ```text
//! level  = clamp(round(x / delta) + zero_point, qmin, qmax)
//! output = (level - zero_point) * delta
//! ```
//!
//! Buffers are processed in blocks of [`BLOCK_SIZE`] elements. Blocks are
//! independent, which is what lets device backends run them in any order.
//!
//! [`quantize`] and [`dequantize`] split the transform at the integer level.
//! They walk the same blocks and random streams, so chaining them reproduces
//! [`quantize_dequantize`] exactly.

use super::encoding::{Encoding, QuantGrid};
use super::rounding::{block_rng, round_nearest, round_stochastic, uniform, Rounding};
use crate::{Error, Result};

/// Elements per transform block
pub const BLOCK_SIZE: usize = 4096;

/// Reject buffers of different lengths
pub fn check_sizes<T, U>(input: &[T], output: &[U]) -> Result<()> {
    if input.len() != output.len() {
        return Err(Error::SizeMismatch {
            input: input.len(),
            output: output.len(),
        });
    }
    Ok(())
}

/// Quantize-dequantize one block
///
/// `block_index` only matters for stochastic rounding, where it selects the
/// block's random stream.
pub fn quantize_dequantize_block(
    input: &[f32],
    output: &mut [f32],
    grid: &QuantGrid,
    rounding: Rounding,
    block_index: usize,
) {
    for_each_level(input, output, grid, rounding, block_index, |out, level| {
        *out = grid.dequantize(level);
    });
}

/// Round every element of a block to its clamped level and hand it to `emit`
fn for_each_level<T>(
    input: &[f32],
    output: &mut [T],
    grid: &QuantGrid,
    rounding: Rounding,
    block_index: usize,
    mut emit: impl FnMut(&mut T, f64),
) {
    match rounding {
        Rounding::Nearest => {
            for (out, &x) in output.iter_mut().zip(input) {
                emit(out, grid.quantize(x, round_nearest));
            }
        }
        Rounding::Stochastic { seed } => {
            let mut rng = block_rng(seed, block_index);
            for (out, &x) in output.iter_mut().zip(input) {
                let sample = uniform(&mut rng);
                emit(out, grid.quantize(x, |v| round_stochastic(v, sample)));
            }
        }
    }
}

/// Run every block of a buffer in order on the calling thread
pub fn quantize_dequantize_blocks(
    input: &[f32],
    output: &mut [f32],
    grid: &QuantGrid,
    rounding: Rounding,
) {
    for (block_index, (inb, outb)) in input
        .chunks(BLOCK_SIZE)
        .zip(output.chunks_mut(BLOCK_SIZE))
        .enumerate()
    {
        quantize_dequantize_block(inb, outb, grid, rounding, block_index);
    }
}

/// Map a buffer to integer grid levels
///
/// Levels lie in the grid's `level_range`; zero maps to the zero-point. NaN has
/// no level and maps to the zero-point as well.
///
/// # Errors
///
/// - `SizeMismatch` if `input` and `levels` differ in length
/// - `InvalidConfiguration` if `symmetric` does not match the encoding's grid kind
pub fn quantize(
    input: &[f32],
    levels: &mut [i64],
    encoding: &Encoding,
    rounding: Rounding,
    symmetric: bool,
) -> Result<()> {
    check_sizes(input, levels)?;
    let grid = encoding.grid(symmetric)?;
    let zero_point = grid.zero_point() as i64;
    for (block_index, (inb, outb)) in input
        .chunks(BLOCK_SIZE)
        .zip(levels.chunks_mut(BLOCK_SIZE))
        .enumerate()
    {
        for_each_level(inb, outb, &grid, rounding, block_index, |out, level| {
            *out = if level.is_nan() { zero_point } else { level as i64 };
        });
    }
    Ok(())
}

/// Map integer grid levels back to floats
///
/// Levels outside the grid's range saturate to its extremes.
///
/// # Errors
///
/// - `SizeMismatch` if `levels` and `output` differ in length
/// - `InvalidConfiguration` if `symmetric` does not match the encoding's grid kind
pub fn dequantize(
    levels: &[i64],
    output: &mut [f32],
    encoding: &Encoding,
    symmetric: bool,
) -> Result<()> {
    check_sizes(levels, output)?;
    let grid = encoding.grid(symmetric)?;
    let (qmin, qmax) = grid.level_range();
    for (out, &level) in output.iter_mut().zip(levels) {
        *out = grid.dequantize((level as f64).clamp(qmin, qmax));
    }
    Ok(())
}

/// Quantize-dequantize a whole buffer on the host
///
/// # Errors
///
/// - `SizeMismatch` if `input` and `output` differ in length
/// - `InvalidConfiguration` if `symmetric` does not match the encoding's grid kind
///
/// # Example
///
/// ```
/// use quantsim::quant::{quantize_dequantize, Encoding, Rounding};
///
/// let encoding = Encoding::compute(-1.0, 1.0, 8, true).unwrap();
/// let input = [0.0f32, 0.5, 2.0];
/// let mut output = [0.0f32; 3];
/// quantize_dequantize(&input, &mut output, &encoding, Rounding::Nearest, true).unwrap();
/// assert_eq!(output[0], 0.0);
/// assert!((output[2] - 1.0).abs() < 1e-6);
/// ```
pub fn quantize_dequantize(
    input: &[f32],
    output: &mut [f32],
    encoding: &Encoding,
    rounding: Rounding,
    symmetric: bool,
) -> Result<()> {
    check_sizes(input, output)?;
    let grid = encoding.grid(symmetric)?;
    quantize_dequantize_blocks(input, output, &grid, rounding);
    Ok(())
}
