//! Quantization encodings
//!
//! An [`Encoding`] describes the fixed-point grid for one tensor (or one channel):
//! the floating range it covers, the step between grid points (`delta`) and the
//! integer `offset` locating zero on the grid.
//!
//! Encodings are only ever derived from `{min, max, bitwidth, symmetric}` via
//! [`Encoding::compute`], or imported from a validated [`EncodingRecord`].
//!
//! Offset convention: `offset = round(min / delta)`, so asymmetric encodings carry
//! a non-positive offset and symmetric encodings carry `0`. The integer zero-point
//! used when quantizing is `-offset`.
//!
//! Every encoding remembers whether it describes a symmetric grid, and records
//! carry that flag as `is_symmetric`. Records written by older tools store signed
//! symmetric offsets as `-2^(bitwidth-1)` and may omit the flag; both are
//! accepted on import and normalized to offset `0`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Smallest supported bitwidth
pub const MIN_BITWIDTH: u8 = 1;

/// Largest supported bitwidth
pub const MAX_BITWIDTH: u8 = 32;

/// Lower bound for `delta`; keeps zero-width ranges from dividing by zero
pub const MIN_DELTA: f64 = 1e-10;

/// Number of grid steps for an asymmetric grid: `2^bitwidth - 1`
pub fn num_steps(bitwidth: u8) -> u64 {
    (1u64 << bitwidth) - 1
}

/// Largest positive level of a symmetric grid: `2^(bitwidth-1) - 1`
pub fn symmetric_qmax(bitwidth: u8) -> u64 {
    (1u64 << (bitwidth - 1)) - 1
}

/// Validate a bitwidth for the requested grid kind
pub fn validate_bitwidth(bitwidth: u8, symmetric: bool) -> Result<()> {
    if !(MIN_BITWIDTH..=MAX_BITWIDTH).contains(&bitwidth) {
        return Err(Error::InvalidConfiguration(format!(
            "bitwidth {bitwidth} outside [{MIN_BITWIDTH}, {MAX_BITWIDTH}]"
        )));
    }
    if symmetric && bitwidth < 2 {
        return Err(Error::InvalidConfiguration(
            "symmetric encodings need at least 2 bits".to_string(),
        ));
    }
    Ok(())
}

/// Quantization grid descriptor for one tensor or channel
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Encoding {
    min: f64,
    max: f64,
    delta: f64,
    offset: i64,
    bitwidth: u8,
    symmetric: bool,
}

impl Encoding {
    /// Derive an encoding from a floating range
    ///
    /// Asymmetric: the range is widened to include zero, then snapped so that zero
    /// lands exactly on a grid point.
    ///
    /// Symmetric: the grid is `[-qmax, qmax] * delta` with
    /// `delta = max(|min|, |max|) / qmax` and `qmax = 2^(bitwidth-1) - 1`.
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` for an unsupported bitwidth, non-finite bounds or
    /// `min > max`. A zero-width range is not an error.
    pub fn compute(min: f64, max: f64, bitwidth: u8, symmetric: bool) -> Result<Self> {
        validate_bitwidth(bitwidth, symmetric)?;
        if !min.is_finite() || !max.is_finite() {
            return Err(Error::InvalidConfiguration(format!(
                "range must be finite, got [{min}, {max}]"
            )));
        }
        if min > max {
            return Err(Error::InvalidConfiguration(format!(
                "range minimum {min} exceeds maximum {max}"
            )));
        }

        let encoding = if symmetric {
            Self::symmetric(min, max, bitwidth)
        } else {
            Self::asymmetric(min, max, bitwidth)
        };

        if !encoding.delta.is_finite() {
            return Err(Error::InvalidConfiguration(format!(
                "range [{min}, {max}] too wide for a finite grid step"
            )));
        }

        debug!(
            min = encoding.min,
            max = encoding.max,
            delta = encoding.delta,
            offset = encoding.offset,
            bitwidth,
            symmetric,
            "computed encoding"
        );
        Ok(encoding)
    }

    fn asymmetric(min: f64, max: f64, bitwidth: u8) -> Self {
        let steps = num_steps(bitwidth) as f64;
        let min = min.min(0.0);
        let max = max.max(0.0);

        let delta = ((max - min) / steps).max(MIN_DELTA);
        let offset = (min / delta).round().clamp(-steps, 0.0);

        // Snap the range onto the grid so that zero is exactly representable
        let min = offset * delta;
        let max = min + steps * delta;

        Self {
            min,
            max,
            delta,
            offset: offset as i64,
            bitwidth,
            symmetric: false,
        }
    }

    fn symmetric(min: f64, max: f64, bitwidth: u8) -> Self {
        let qmax = symmetric_qmax(bitwidth) as f64;
        let abs_max = min.abs().max(max.abs());
        let delta = (abs_max / qmax).max(MIN_DELTA);

        Self {
            min: -qmax * delta,
            max: qmax * delta,
            delta,
            offset: 0,
            bitwidth,
            symmetric: true,
        }
    }

    /// Lower bound of the represented range (a grid point)
    pub fn min(&self) -> f64 {
        self.min
    }

    /// Upper bound of the represented range (a grid point)
    pub fn max(&self) -> f64 {
        self.max
    }

    /// Grid step (scale)
    pub fn delta(&self) -> f64 {
        self.delta
    }

    /// Offset in the exported convention, `round(min / delta)`
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Integer level that represents zero
    pub fn zero_point(&self) -> i64 {
        -self.offset
    }

    pub fn bitwidth(&self) -> u8 {
        self.bitwidth
    }

    /// Whether the grid is centered on zero
    pub fn is_symmetric(&self) -> bool {
        self.symmetric
    }

    /// Resolve the integer grid used by the transform
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` when the requested grid kind differs from the one
    /// the encoding was derived for.
    pub fn grid(&self, symmetric: bool) -> Result<QuantGrid> {
        if symmetric != self.symmetric {
            let kind = |sym: bool| if sym { "symmetric" } else { "asymmetric" };
            return Err(Error::InvalidConfiguration(format!(
                "{} quantization cannot use a {} encoding (offset {}, range [{}, {}])",
                kind(symmetric),
                kind(self.symmetric),
                self.offset,
                self.min,
                self.max
            )));
        }

        let (qmin, qmax) = if symmetric {
            let q = symmetric_qmax(self.bitwidth) as f64;
            (-q, q)
        } else {
            (0.0, num_steps(self.bitwidth) as f64)
        };

        Ok(QuantGrid {
            delta: self.delta,
            zero_point: self.zero_point() as f64,
            qmin,
            qmax,
        })
    }

    /// Plain record for persistence
    pub fn to_record(&self) -> EncodingRecord {
        EncodingRecord::from(*self)
    }
}

/// Free-function form of [`Encoding::compute`]
pub fn compute_encoding(min: f64, max: f64, bitwidth: u8, symmetric: bool) -> Result<Encoding> {
    Encoding::compute(min, max, bitwidth, symmetric)
}

/// Resolved integer grid: everything the per-element transform needs
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuantGrid {
    delta: f64,
    zero_point: f64,
    qmin: f64,
    qmax: f64,
}

impl QuantGrid {
    pub fn delta(&self) -> f64 {
        self.delta
    }

    /// Level that dequantizes to exactly zero
    pub fn zero_point(&self) -> f64 {
        self.zero_point
    }

    /// Representable integer levels `(qmin, qmax)`
    pub fn level_range(&self) -> (f64, f64) {
        (self.qmin, self.qmax)
    }

    /// Integer level of one value under the given rounding function
    ///
    /// Rounding applies to `x / delta` before the zero-point shift. The level is
    /// clamped into `[qmin, qmax]`, so out-of-range values (and infinities)
    /// saturate to the grid extremes. NaN stays NaN.
    #[inline]
    pub fn quantize<R: FnMut(f64) -> f64>(&self, x: f32, mut round: R) -> f64 {
        let scaled = f64::from(x) / self.delta;
        (round(scaled) + self.zero_point).clamp(self.qmin, self.qmax)
    }

    /// Float value of an integer level
    #[inline]
    pub fn dequantize(&self, level: f64) -> f32 {
        ((level - self.zero_point) * self.delta) as f32
    }

    /// Quantize-dequantize one value with the given rounding function
    #[inline]
    pub fn apply<R: FnMut(f64) -> f64>(&self, x: f32, round: R) -> f32 {
        self.dequantize(self.quantize(x, round))
    }
}

/// Serializable encoding record
///
/// Field order and types are part of the persistence format. `is_symmetric`
/// is always written; on import it also accepts the strings `"True"`/`"False"`
/// and may be missing, in which case the grid kind is inferred from the record.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncodingRecord {
    pub min: f64,
    pub max: f64,
    #[serde(alias = "scale")]
    pub delta: f64,
    pub offset: i64,
    pub bitwidth: u8,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_flag"
    )]
    pub is_symmetric: Option<bool>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<Flag>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Flag::Bool(flag)) => Ok(Some(flag)),
        Some(Flag::Text(text)) => match text.to_lowercase().as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            _ => Err(serde::de::Error::custom(format!(
                "is_symmetric must be true or false, got {text:?}"
            ))),
        },
    }
}

impl From<Encoding> for EncodingRecord {
    fn from(encoding: Encoding) -> Self {
        Self {
            min: encoding.min,
            max: encoding.max,
            delta: encoding.delta,
            offset: encoding.offset,
            bitwidth: encoding.bitwidth,
            is_symmetric: Some(encoding.symmetric),
        }
    }
}

impl EncodingRecord {
    /// Fill in the grid kind when the record does not carry one
    pub fn assume_symmetric(mut self, symmetric: bool) -> Self {
        self.is_symmetric.get_or_insert(symmetric);
        self
    }

    /// Largest distance a bound may sit from the grid implied by `delta`/`offset`
    fn tolerance(&self) -> f64 {
        0.5 * self.delta + 1e-6 * (self.max - self.min)
    }

    fn near(&self, value: f64, target: f64) -> bool {
        (value - target).abs() <= self.tolerance()
    }

    /// Signed symmetric offset written by older exporters
    fn legacy_symmetric_offset(&self) -> Option<i64> {
        (self.bitwidth >= 2).then(|| -(1i64 << (self.bitwidth - 1)))
    }

    fn fits_asymmetric(&self) -> bool {
        let steps = num_steps(self.bitwidth) as f64;
        let min = self.offset as f64 * self.delta;
        (-(steps as i64)..=0).contains(&self.offset)
            && self.near(self.min, min)
            && self.near(self.max, min + steps * self.delta)
    }

    fn fits_symmetric(&self) -> bool {
        if self.bitwidth < 2 {
            return false;
        }
        let qmax = symmetric_qmax(self.bitwidth) as f64;
        let top = qmax * self.delta;
        let strict = self.offset == 0 && self.near(self.min, -top);
        // older exporters use the full signed range [-2^(b-1), 2^(b-1)-1]
        let signed = Some(self.offset) == self.legacy_symmetric_offset()
            && (self.near(self.min, -top) || self.near(self.min, -top - self.delta));
        (strict || signed) && self.near(self.max, top)
    }
}

impl TryFrom<EncodingRecord> for Encoding {
    type Error = Error;

    /// Validate a record against the grid its `delta` and `offset` describe
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` for non-finite fields, a non-positive `delta`, an
    /// empty range, an unsupported bitwidth, or bounds that do not lie on the
    /// grid implied by `delta`, `offset` and the grid kind.
    fn try_from(record: EncodingRecord) -> Result<Self> {
        let EncodingRecord {
            min,
            max,
            delta,
            offset,
            bitwidth,
            is_symmetric,
        } = record;

        validate_bitwidth(bitwidth, is_symmetric.unwrap_or(false))?;
        if !(min.is_finite() && max.is_finite() && delta.is_finite()) {
            return Err(Error::InvalidConfiguration(format!(
                "encoding record has non-finite fields: {record:?}"
            )));
        }
        if delta <= 0.0 {
            return Err(Error::InvalidConfiguration(format!(
                "encoding delta must be positive, got {delta}"
            )));
        }
        if max <= min {
            return Err(Error::InvalidConfiguration(format!(
                "encoding max {max} must exceed min {min}"
            )));
        }

        let symmetric = match is_symmetric {
            Some(true) if record.fits_symmetric() => true,
            Some(false) if record.fits_asymmetric() => false,
            // flagless records from older exporters: the signed symmetric
            // layout is also a valid asymmetric one, symmetric wins
            None if record.fits_symmetric() => true,
            None if record.fits_asymmetric() => false,
            _ => {
                return Err(Error::InvalidConfiguration(format!(
                    "encoding record is inconsistent: range [{min}, {max}] does not match \
                     delta {delta} and offset {offset} for a {bitwidth}-bit {} grid",
                    match is_symmetric {
                        Some(true) => "symmetric",
                        Some(false) => "asymmetric",
                        None => "symmetric or asymmetric",
                    }
                )));
            }
        };

        // snap the bounds onto the grid exactly as `compute` does
        let encoding = if symmetric {
            let top = symmetric_qmax(bitwidth) as f64 * delta;
            Self {
                min: -top,
                max: top,
                delta,
                offset: 0,
                bitwidth,
                symmetric,
            }
        } else {
            let min = offset as f64 * delta;
            Self {
                min,
                max: min + num_steps(bitwidth) as f64 * delta,
                delta,
                offset,
                bitwidth,
                symmetric,
            }
        };
        if !(encoding.min.is_finite() && encoding.max.is_finite()) {
            return Err(Error::InvalidConfiguration(format!(
                "encoding record range overflows its grid: {record:?}"
            )));
        }
        Ok(encoding)
    }
}
