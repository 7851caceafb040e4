#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use quantsim::quant::{dequantize, quantize, quantize_dequantize, Encoding, Rounding};

/// Fuzz target for encoding derivation and the transform
///
/// Arbitrary ranges, bitwidths and values must never panic, every finite
/// output must stay inside the encoding range, and the integer path must agree
/// with the transform.

#[derive(Arbitrary, Debug)]
struct QdqFuzzInput {
    min: f32,
    max: f32,
    bitwidth: u8,
    symmetric: bool,
    stochastic: Option<u64>,
    values: Vec<f32>,
}

fuzz_target!(|input: QdqFuzzInput| {
    let Ok(encoding) = Encoding::compute(
        f64::from(input.min),
        f64::from(input.max),
        input.bitwidth,
        input.symmetric,
    ) else {
        return;
    };

    // Invariant 1: derived encodings are well-formed
    assert!(encoding.delta() > 0.0);
    assert!(encoding.max() > encoding.min());
    assert!(encoding.offset() <= 0);

    let rounding = match input.stochastic {
        Some(seed) => Rounding::Stochastic { seed },
        None => Rounding::Nearest,
    };
    let values: Vec<f32> = input.values.into_iter().take(256).collect();
    let mut output = vec![0.0f32; values.len()];
    quantize_dequantize(&values, &mut output, &encoding, rounding, input.symmetric).unwrap();

    // Invariant 2: outputs saturate into the grid; NaN stays NaN
    for (&x, &y) in values.iter().zip(&output) {
        if x.is_nan() {
            assert!(y.is_nan());
            continue;
        }
        let y = f64::from(y);
        let slack = encoding.delta().max(encoding.max().abs() * 1e-6);
        assert!(y >= encoding.min() - slack && y <= encoding.max() + slack);
    }

    // Invariant 3: the integer path reproduces the transform
    let mut levels = vec![0i64; values.len()];
    quantize(&values, &mut levels, &encoding, rounding, input.symmetric).unwrap();
    let mut restored = vec![0.0f32; values.len()];
    dequantize(&levels, &mut restored, &encoding, input.symmetric).unwrap();
    for ((&x, &y), &z) in values.iter().zip(&output).zip(&restored) {
        if !x.is_nan() {
            assert_eq!(y.to_bits(), z.to_bits());
        }
    }
});
