//! Device backends for the elementwise transform
//!
//! Upper layers talk to an [`ElementwiseTransform`] and never branch on where the
//! work runs. Each backend implements the trait once:
//!
//! - [`HostTransform`]: serial, on the calling thread
//! - [`ParallelTransform`]: block-parallel on the rayon pool; needs scratch memory
//!   for its two-pass min/max reduction
//!
//! Both backends run the same per-block kernel with the same per-block seeds, so
//! results are bit-identical across devices.

mod allocator;
mod host;
mod parallel;

pub use allocator::{Allocator, HostAllocator, ScratchBuffer};
pub use host::HostTransform;
pub use parallel::{ParallelTransform, PARTIAL_WIDTH};

use serde::{Deserialize, Serialize};

use crate::quant::{BatchStats, QuantGrid, Rounding};
use crate::Result;

/// Execution target, chosen when a quantizer is constructed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    #[default]
    Host,
    Parallel,
}

impl Device {
    /// Instantiate the backend for this device
    pub fn transform(self) -> Box<dyn ElementwiseTransform> {
        match self {
            Device::Host => Box::new(HostTransform),
            Device::Parallel => Box::new(ParallelTransform::default()),
        }
    }
}

/// Capability interface implemented once per backend
pub trait ElementwiseTransform: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn device(&self) -> Device;

    /// Scratch elements needed to reduce a buffer of `len` elements; 0 means none
    fn scratch_len(&self, len: usize) -> usize;

    /// Finite extrema of `input`, `None` if it holds no finite value
    ///
    /// `scratch` must hold at least `scratch_len(input.len())` elements.
    fn min_max(&self, input: &[f32], scratch: &mut [f32]) -> Result<Option<BatchStats>>;

    /// Quantize-dequantize `input` into `output`
    fn quantize_dequantize(
        &self,
        input: &[f32],
        output: &mut [f32],
        grid: &QuantGrid,
        rounding: Rounding,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quant::{Encoding, BLOCK_SIZE};

    fn sample_input(len: usize) -> Vec<f32> {
        (0..len).map(|i| ((i as f32) * 0.013).cos() * 2.7 - 0.4).collect()
    }

    #[test]
    fn test_device_selects_backend() {
        assert_eq!(Device::Host.transform().device(), Device::Host);
        assert_eq!(Device::Parallel.transform().device(), Device::Parallel);
        assert_eq!(Device::default(), Device::Host);
    }

    #[test]
    fn test_backends_bit_identical() {
        let input = sample_input(BLOCK_SIZE * 5 + 123);
        let grid = Encoding::compute(-2.0, 2.5, 6, false)
            .unwrap()
            .grid(false)
            .unwrap();

        for rounding in [Rounding::Nearest, Rounding::Stochastic { seed: 99 }] {
            let mut host_out = vec![0.0; input.len()];
            let mut par_out = vec![0.0; input.len()];
            HostTransform
                .quantize_dequantize(&input, &mut host_out, &grid, rounding)
                .unwrap();
            ParallelTransform::default()
                .quantize_dequantize(&input, &mut par_out, &grid, rounding)
                .unwrap();
            assert_eq!(host_out, par_out);
        }
    }

    #[test]
    fn test_backends_agree_on_min_max() {
        let mut input = sample_input(BLOCK_SIZE * 3 + 7);
        input[BLOCK_SIZE + 5] = f32::NAN;
        input[2 * BLOCK_SIZE] = -9.0;

        let host = HostTransform.min_max(&input, &mut []).unwrap();

        let parallel = ParallelTransform::default();
        let mut scratch = vec![0.0; parallel.scratch_len(input.len())];
        let par = parallel.min_max(&input, &mut scratch).unwrap();

        assert_eq!(host, par);
        assert_eq!(host.unwrap().min, -9.0);
        assert_eq!(host.unwrap().count, input.len() as u64 - 1);
    }

    #[test]
    fn test_device_serde() {
        let device: Device = serde_json::from_str("\"parallel\"").unwrap();
        assert_eq!(device, Device::Parallel);
    }
}
