//! Min-max calibration
//!
//! The [`EncodingAnalyzer`] watches representative data stream past during
//! calibration, keeps the running extrema, and turns them into an [`Encoding`]
//! on demand.
//!
//! Non-finite values are skipped: they carry no usable range information and
//! would make every derived encoding invalid.

use tracing::warn;

use super::encoding::Encoding;
use crate::{Error, Result};

/// Extrema and element count of one scanned buffer
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BatchStats {
    pub min: f32,
    pub max: f32,
    /// Finite elements seen
    pub count: u64,
}

impl BatchStats {
    /// Scan values once
    ///
    /// Returns `None` when there is no finite value.
    pub fn scan<'a>(data: impl IntoIterator<Item = &'a f32>) -> Option<Self> {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut count = 0u64;

        for &x in data.into_iter().filter(|x| x.is_finite()) {
            min = min.min(x);
            max = max.max(x);
            count += 1;
        }

        (count > 0).then_some(Self { min, max, count })
    }

    /// Combine two partial results; min/max merging is order-independent
    pub fn merge(self, other: Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
            count: self.count + other.count,
        }
    }
}

/// Running calibration statistics
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RunningStats {
    observed_min: f32,
    observed_max: f32,
    sample_count: u64,
    batch_count: u64,
}

impl RunningStats {
    /// Smallest finite value seen, `None` before any sample
    pub fn observed_min(&self) -> Option<f32> {
        (self.sample_count > 0).then_some(self.observed_min)
    }

    /// Largest finite value seen, `None` before any sample
    pub fn observed_max(&self) -> Option<f32> {
        (self.sample_count > 0).then_some(self.observed_max)
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn batch_count(&self) -> u64 {
        self.batch_count
    }

    fn absorb(&mut self, batch: BatchStats) {
        if self.sample_count == 0 {
            self.observed_min = batch.min;
            self.observed_max = batch.max;
        } else {
            self.observed_min = self.observed_min.min(batch.min);
            self.observed_max = self.observed_max.max(batch.max);
        }
        self.sample_count += batch.count;
        self.batch_count += 1;
    }
}

/// Streaming min-max encoding analyzer
#[derive(Clone, Debug, Default)]
pub struct EncodingAnalyzer {
    stats: RunningStats,
}

impl EncodingAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe a batch of data
    ///
    /// Single pass, no allocation. Empty buffers are ignored.
    pub fn observe(&mut self, data: &[f32]) {
        if data.is_empty() {
            return;
        }
        match BatchStats::scan(data) {
            Some(batch) => self.observe_stats(batch),
            None => warn!(len = data.len(), "calibration batch has no finite values, skipped"),
        }
    }

    /// Merge a batch that was already reduced elsewhere
    pub fn observe_stats(&mut self, batch: BatchStats) {
        self.stats.absorb(batch);
    }

    /// Compute an encoding from everything observed so far
    ///
    /// # Errors
    ///
    /// - `NotCalibrated` if nothing has been observed
    /// - `InvalidConfiguration` for an unsupported bitwidth
    pub fn finalize(&self, bitwidth: u8, symmetric: bool) -> Result<Encoding> {
        if self.stats.sample_count == 0 {
            return Err(Error::NotCalibrated);
        }
        Encoding::compute(
            f64::from(self.stats.observed_min),
            f64::from(self.stats.observed_max),
            bitwidth,
            symmetric,
        )
    }

    /// Clear statistics for recalibration
    pub fn reset(&mut self) {
        self.stats = RunningStats::default();
    }

    pub fn stats(&self) -> RunningStats {
        self.stats
    }

    /// Check if any data has been observed
    pub fn has_data(&self) -> bool {
        self.stats.sample_count > 0
    }
}
