//! Serial host backend

use super::{Device, ElementwiseTransform};
use crate::quant::{check_sizes, quantize_dequantize_blocks, BatchStats, QuantGrid, Rounding};
use crate::Result;

/// Runs every block in order on the calling thread
#[derive(Clone, Copy, Debug, Default)]
pub struct HostTransform;

impl ElementwiseTransform for HostTransform {
    fn name(&self) -> &'static str {
        "host"
    }

    fn device(&self) -> Device {
        Device::Host
    }

    fn scratch_len(&self, _len: usize) -> usize {
        0
    }

    fn min_max(&self, input: &[f32], _scratch: &mut [f32]) -> Result<Option<BatchStats>> {
        Ok(BatchStats::scan(input))
    }

    fn quantize_dequantize(
        &self,
        input: &[f32],
        output: &mut [f32],
        grid: &QuantGrid,
        rounding: Rounding,
    ) -> Result<()> {
        check_sizes(input, output)?;
        quantize_dequantize_blocks(input, output, grid, rounding);
        Ok(())
    }
}
