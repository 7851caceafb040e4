//! Block-parallel backend on the rayon pool
//!
//! The min/max reduction is two-pass: every block writes its partial
//! `[min, max, count]` into scratch memory, then the partials are folded in block
//! order. The fold order is fixed, so the result does not depend on scheduling.

use rayon::prelude::*;

use super::{Device, ElementwiseTransform};
use crate::quant::{
    check_sizes, quantize_dequantize_block, quantize_dequantize_blocks, BatchStats, QuantGrid,
    Rounding, BLOCK_SIZE,
};
use crate::{Error, Result};

/// Scratch elements per block partial: `[min, max, count]`
pub const PARTIAL_WIDTH: usize = 3;

/// Buffers with fewer blocks than this run serially
const DEFAULT_MIN_PARALLEL_BLOCKS: usize = 4;

#[derive(Clone, Copy, Debug)]
pub struct ParallelTransform {
    min_parallel_blocks: usize,
}

impl ParallelTransform {
    /// Parallelize only buffers spanning at least `blocks` blocks
    pub fn with_min_parallel_blocks(blocks: usize) -> Self {
        Self {
            min_parallel_blocks: blocks.max(1),
        }
    }

    fn num_blocks(len: usize) -> usize {
        len.div_ceil(BLOCK_SIZE)
    }
}

impl Default for ParallelTransform {
    fn default() -> Self {
        Self {
            min_parallel_blocks: DEFAULT_MIN_PARALLEL_BLOCKS,
        }
    }
}

impl ElementwiseTransform for ParallelTransform {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn device(&self) -> Device {
        Device::Parallel
    }

    fn scratch_len(&self, len: usize) -> usize {
        Self::num_blocks(len) * PARTIAL_WIDTH
    }

    fn min_max(&self, input: &[f32], scratch: &mut [f32]) -> Result<Option<BatchStats>> {
        let needed = self.scratch_len(input.len());
        if scratch.len() < needed {
            return Err(Error::InvalidConfiguration(format!(
                "scratch holds {} elements, reduction needs {needed}",
                scratch.len()
            )));
        }
        let partials = &mut scratch[..needed];

        input
            .par_chunks(BLOCK_SIZE)
            .zip(partials.par_chunks_mut(PARTIAL_WIDTH))
            .for_each(|(block, slot)| match BatchStats::scan(block) {
                Some(stats) => {
                    slot[0] = stats.min;
                    slot[1] = stats.max;
                    slot[2] = stats.count as f32;
                }
                None => {
                    slot[0] = f32::INFINITY;
                    slot[1] = f32::NEG_INFINITY;
                    slot[2] = 0.0;
                }
            });

        Ok(partials
            .chunks_exact(PARTIAL_WIDTH)
            .filter(|slot| slot[2] > 0.0)
            .map(|slot| BatchStats {
                min: slot[0],
                max: slot[1],
                count: slot[2] as u64,
            })
            .reduce(BatchStats::merge))
    }

    fn quantize_dequantize(
        &self,
        input: &[f32],
        output: &mut [f32],
        grid: &QuantGrid,
        rounding: Rounding,
    ) -> Result<()> {
        check_sizes(input, output)?;

        if Self::num_blocks(input.len()) < self.min_parallel_blocks {
            quantize_dequantize_blocks(input, output, grid, rounding);
            return Ok(());
        }

        input
            .par_chunks(BLOCK_SIZE)
            .zip(output.par_chunks_mut(BLOCK_SIZE))
            .enumerate()
            .for_each(|(block_index, (inb, outb))| {
                quantize_dequantize_block(inb, outb, grid, rounding, block_index);
            });
        Ok(())
    }
}
