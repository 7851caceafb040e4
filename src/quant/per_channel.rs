//! Per-channel quantization
//!
//! Weights are often quantized with one encoding per output channel. A buffer is
//! treated as a row-major `[num_channels, channel_len]` matrix; row `c` is
//! channel `c` and gets its own grid.

use ndarray::{ArrayView2, ArrayViewMut2, Axis};

use super::analyzer::BatchStats;
use super::encoding::{Encoding, QuantGrid};
use super::fake_quantize::{check_sizes, quantize_dequantize_block};
use super::rounding::{mix_seed, Rounding};
use crate::{Error, Result};

fn channel_len(len: usize, num_channels: usize) -> Result<usize> {
    if num_channels == 0 {
        return Err(Error::InvalidConfiguration(
            "per-channel quantization needs at least one channel".to_string(),
        ));
    }
    if len % num_channels != 0 {
        return Err(Error::InvalidConfiguration(format!(
            "buffer of {len} elements does not split into {num_channels} channels"
        )));
    }
    Ok(len / num_channels)
}

fn shape_error(e: ndarray::ShapeError) -> Error {
    Error::InvalidConfiguration(e.to_string())
}

/// One encoding per axis-0 channel
///
/// A channel without finite values gets the degenerate `[0, 0]` encoding.
///
/// # Errors
///
/// `InvalidConfiguration` for zero channels, a length not divisible by
/// `num_channels`, or an unsupported bitwidth.
pub fn compute_per_channel_encodings(
    data: &[f32],
    num_channels: usize,
    bitwidth: u8,
    symmetric: bool,
) -> Result<Vec<Encoding>> {
    let len = channel_len(data.len(), num_channels)?;
    let view = ArrayView2::from_shape((num_channels, len), data).map_err(shape_error)?;

    view.axis_iter(Axis(0))
        .map(|row| {
            let (min, max) = BatchStats::scan(row.iter())
                .map(|s| (f64::from(s.min), f64::from(s.max)))
                .unwrap_or((0.0, 0.0));
            Encoding::compute(min, max, bitwidth, symmetric)
        })
        .collect()
}

/// Quantize-dequantize each channel through its own encoding
///
/// With stochastic rounding every channel draws from its own stream.
///
/// # Errors
///
/// - `SizeMismatch` if `input` and `output` differ in length
/// - `InvalidConfiguration` if the length does not split into
///   `encodings.len()` channels, or `symmetric` does not match an encoding's
///   grid kind
pub fn quantize_dequantize_per_channel(
    input: &[f32],
    output: &mut [f32],
    encodings: &[Encoding],
    rounding: Rounding,
    symmetric: bool,
) -> Result<()> {
    check_sizes(input, output)?;
    let num_channels = encodings.len();
    let len = channel_len(input.len(), num_channels)?;

    let grids = encodings
        .iter()
        .map(|e| e.grid(symmetric))
        .collect::<Result<Vec<_>>>()?;

    let input = ArrayView2::from_shape((num_channels, len), input).map_err(shape_error)?;
    let output = ArrayViewMut2::from_shape((num_channels, len), output).map_err(shape_error)?;
    transform_rows(input, output, &grids, rounding)
}

/// Run each row through its grid; every row must be contiguous in memory
fn transform_rows(
    input: ArrayView2<'_, f32>,
    mut output: ArrayViewMut2<'_, f32>,
    grids: &[QuantGrid],
    rounding: Rounding,
) -> Result<()> {
    let rows = input.rows().into_iter().zip(output.rows_mut()).zip(grids);
    for (channel, ((inrow, outrow), grid)) in rows.enumerate() {
        let (Some(x), Some(y)) = (inrow.to_slice(), outrow.into_slice()) else {
            return Err(Error::InvalidConfiguration(format!(
                "channel {channel} is not contiguous in memory"
            )));
        };
        let rounding = match rounding {
            Rounding::Nearest => Rounding::Nearest,
            Rounding::Stochastic { seed } => Rounding::Stochastic {
                seed: mix_seed(seed, channel as u64),
            },
        };
        quantize_dequantize_block(x, y, grid, rounding, 0);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quant::quantize_dequantize;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_encodings_differ_per_channel() {
        let data = [-1.0f32, 1.0, 0.5, -4.0, 4.0, 2.0];
        let encodings = compute_per_channel_encodings(&data, 2, 8, true).unwrap();

        assert_eq!(encodings.len(), 2);
        assert_abs_diff_eq!(encodings[0].max(), 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(encodings[1].max(), 4.0, epsilon = 1e-9);
        assert!(encodings[1].delta() > encodings[0].delta());
    }

    #[test]
    fn test_channel_matches_per_tensor_transform() {
        let data: Vec<f32> = (0..12).map(|i| (i as f32 - 5.0) * 0.37).collect();
        let encodings = compute_per_channel_encodings(&data, 3, 6, false).unwrap();

        let mut output = vec![0.0f32; data.len()];
        quantize_dequantize_per_channel(&data, &mut output, &encodings, Rounding::Nearest, false)
            .unwrap();

        for (c, encoding) in encodings.iter().enumerate() {
            let row = &data[c * 4..(c + 1) * 4];
            let mut expected = [0.0f32; 4];
            quantize_dequantize(row, &mut expected, encoding, Rounding::Nearest, false).unwrap();
            assert_eq!(&output[c * 4..(c + 1) * 4], &expected);
        }
    }

    #[test]
    fn test_non_finite_channel_gets_degenerate_encoding() {
        let data = [f32::NAN, f32::INFINITY, 1.0, 2.0];
        let encodings = compute_per_channel_encodings(&data, 2, 8, false).unwrap();
        assert!(encodings[0].delta() > 0.0);
        assert!(encodings[0].max() > encodings[0].min());
    }

    #[test]
    fn test_channel_count_must_divide_length() {
        assert!(matches!(
            compute_per_channel_encodings(&[1.0; 5], 2, 8, false),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(matches!(
            compute_per_channel_encodings(&[1.0; 4], 0, 8, false),
            Err(Error::InvalidConfiguration(_))
        ));

        let encodings = compute_per_channel_encodings(&[1.0; 4], 2, 8, false).unwrap();
        let mut output = [0.0f32; 3];
        assert!(matches!(
            quantize_dequantize_per_channel(&[1.0; 3], &mut output, &encodings, Rounding::Nearest, false),
            Err(Error::InvalidConfiguration(_))
        ));
        let mut output = [0.0f32; 2];
        assert!(matches!(
            quantize_dequantize_per_channel(&[1.0; 4], &mut output, &encodings, Rounding::Nearest, false),
            Err(Error::SizeMismatch { input: 4, output: 2 })
        ));
    }

    #[test]
    fn test_strided_rows_rejected() {
        let data: Vec<f32> = (0..12).map(|i| i as f32 * 0.1).collect();
        let encodings = compute_per_channel_encodings(&data, 3, 8, false).unwrap();
        let grids: Vec<QuantGrid> = encodings.iter().map(|e| e.grid(false).unwrap()).collect();

        // rows of the transposed [4, 3] view step through memory by 3
        let strided = ArrayView2::from_shape((4, 3), &data[..]).unwrap().reversed_axes();
        let mut out = vec![-1.0f32; 12];
        let output = ArrayViewMut2::from_shape((3, 4), &mut out[..]).unwrap();

        assert!(matches!(
            transform_rows(strided, output, &grids, Rounding::Nearest),
            Err(Error::InvalidConfiguration(msg)) if msg.contains("channel 0")
        ));
        assert!(out.iter().all(|&y| y == -1.0));

        let contiguous = ArrayView2::from_shape((3, 4), &data[..]).unwrap();
        let output = ArrayViewMut2::from_shape((3, 4), &mut out[..]).unwrap();
        transform_rows(contiguous, output, &grids, Rounding::Nearest).unwrap();
        assert!(out.iter().all(|&y| y >= 0.0));
    }

    #[test]
    fn test_stochastic_per_channel_deterministic() {
        let data: Vec<f32> = (0..64).map(|i| (i as f32 * 0.11).sin()).collect();
        let encodings = compute_per_channel_encodings(&data, 4, 4, false).unwrap();

        let mut a = vec![0.0f32; data.len()];
        let mut b = vec![0.0f32; data.len()];
        let rounding = Rounding::Stochastic { seed: 21 };
        quantize_dequantize_per_channel(&data, &mut a, &encodings, rounding, false).unwrap();
        quantize_dequantize_per_channel(&data, &mut b, &encodings, rounding, false).unwrap();
        assert_eq!(a, b);
    }
}
