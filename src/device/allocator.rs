//! Scratch memory seam
//!
//! Backends that need working memory get it through an [`Allocator`]. The
//! returned [`ScratchBuffer`] is owned by whoever requested it and released when
//! dropped, on every exit path.

use std::ops::{Deref, DerefMut};

use tracing::{debug, trace};

use crate::{Error, Result};

/// Source of scratch buffers
pub trait Allocator: Send + Sync + std::fmt::Debug {
    /// Acquire a zeroed buffer of `len` elements
    ///
    /// # Errors
    ///
    /// `AllocationFailure` when the memory cannot be reserved.
    fn allocate(&self, len: usize) -> Result<ScratchBuffer>;
}

/// Host-memory allocator with an optional element cap
#[derive(Clone, Debug, Default)]
pub struct HostAllocator {
    limit: Option<usize>,
}

impl HostAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse requests larger than `limit` elements
    pub fn with_limit(limit: usize) -> Self {
        Self { limit: Some(limit) }
    }
}

impl Allocator for HostAllocator {
    fn allocate(&self, len: usize) -> Result<ScratchBuffer> {
        if let Some(limit) = self.limit {
            if len > limit {
                return Err(Error::AllocationFailure {
                    requested: len,
                    reason: format!("exceeds allocator limit of {limit} elements"),
                });
            }
        }

        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|e| Error::AllocationFailure {
                requested: len,
                reason: e.to_string(),
            })?;
        data.resize(len, 0.0);

        debug!(len, "acquired scratch buffer");
        Ok(ScratchBuffer { data })
    }
}

/// Owned scratch memory
#[derive(Debug)]
pub struct ScratchBuffer {
    data: Vec<f32>,
}

impl Deref for ScratchBuffer {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.data
    }
}

impl DerefMut for ScratchBuffer {
    fn deref_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

impl Drop for ScratchBuffer {
    fn drop(&mut self) {
        trace!(len = self.data.len(), "released scratch buffer");
    }
}
