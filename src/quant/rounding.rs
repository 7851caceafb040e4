//! Rounding policies for quantize-dequantize
//!
//! - NEAREST: round half away from zero. Deterministic.
//! - STOCHASTIC: round up with probability equal to the fractional part.
//!   Deterministic for a fixed seed: every block of [`BLOCK_SIZE`] elements draws
//!   from its own generator seeded from `(seed, block_index)`, so serial and
//!   parallel execution produce identical output.
//!
//! [`BLOCK_SIZE`]: crate::quant::BLOCK_SIZE

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Rounding mode stored in quantizer settings
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    /// Round half away from zero
    #[default]
    Nearest,
    /// Probabilistic rounding driven by a seeded generator
    Stochastic,
}

/// Rounding policy for a single transform call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rounding {
    Nearest,
    Stochastic { seed: u64 },
}

impl Rounding {
    /// Build the per-call policy for a mode
    ///
    /// The seed is ignored for [`RoundingMode::Nearest`].
    pub fn from_mode(mode: RoundingMode, seed: u64) -> Self {
        match mode {
            RoundingMode::Nearest => Rounding::Nearest,
            RoundingMode::Stochastic => Rounding::Stochastic { seed },
        }
    }

    pub fn mode(&self) -> RoundingMode {
        match self {
            Rounding::Nearest => RoundingMode::Nearest,
            Rounding::Stochastic { .. } => RoundingMode::Stochastic,
        }
    }
}

/// Round half away from zero
#[inline]
pub fn round_nearest(value: f64) -> f64 {
    value.round()
}

/// Round up with probability `fract(value)`, using `sample` in `[0, 1)`
#[inline]
pub fn round_stochastic(value: f64, sample: f64) -> f64 {
    let floor = value.floor();
    if sample < value - floor {
        floor + 1.0
    } else {
        floor
    }
}

/// SplitMix64 finalizer; spreads `(seed, index)` pairs across the seed space
pub fn mix_seed(seed: u64, index: u64) -> u64 {
    let mut z = seed ^ index.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Generator for one block of a stochastic transform
pub fn block_rng(seed: u64, block_index: usize) -> StdRng {
    StdRng::seed_from_u64(mix_seed(seed, block_index as u64))
}

/// Draw a uniform sample in `[0, 1)`
#[inline]
pub fn uniform<R: Rng>(rng: &mut R) -> f64 {
    rng.random::<f64>()
}
