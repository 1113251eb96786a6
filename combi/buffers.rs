//! Reusable large buffers.
//!
//! A COMBI run owns a handful of allocations that scale with the cohort: the feature
//! chunk storage, the kernel matrix and the solver problem arrays. The run hands them
//! back in a [`CombiBuffers`] so the next run (typically the next chromosome) can reuse
//! them. Reuse only happens when the existing capacity covers the new requirement;
//! otherwise the buffer is dropped and a fresh one is reserved fallibly.

use std::mem::size_of;

use crate::kernel::KernelMatrix;
use crate::svm::{PrecomputedProblem, SparseProblem};
use crate::types::{BufferKind, CombiError};

/// Large buffers carried from one run to the next.
#[derive(Debug, Default)]
pub struct CombiBuffers {
    pub chunk_storage: Option<Vec<f32>>,
    pub kernel: Option<KernelMatrix>,
    pub kernel_problem: Option<PrecomputedProblem>,
    pub sparse_problem: Option<SparseProblem>,
}

impl CombiBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently held across all buffers.
    pub fn retained_bytes(&self) -> usize {
        self.chunk_storage
            .as_ref()
            .map_or(0, |v| v.capacity() * size_of::<f32>())
            + self.kernel.as_ref().map_or(0, KernelMatrix::capacity_bytes)
            + self
                .kernel_problem
                .as_ref()
                .map_or(0, PrecomputedProblem::capacity_bytes)
            + self
                .sparse_problem
                .as_ref()
                .map_or(0, SparseProblem::capacity_bytes)
    }
}

/// Reserves exactly `len` elements, reporting failure instead of aborting.
pub fn try_reserve<T>(buffer: BufferKind, len: usize) -> Result<Vec<T>, CombiError> {
    let mut storage = Vec::new();
    storage
        .try_reserve_exact(len)
        .map_err(|_| allocation_error::<T>(buffer, len))?;
    Ok(storage)
}

/// Returns a zero-filled buffer of `len` elements, reusing `previous` when its capacity
/// is large enough.
pub fn reuse_or_zeroed<T>(
    buffer: BufferKind,
    previous: Option<Vec<T>>,
    len: usize,
) -> Result<Vec<T>, CombiError>
where
    T: Copy + Default,
{
    let mut storage = match previous {
        Some(existing) if existing.capacity() >= len => {
            log::debug!(
                "Reusing {buffer} buffer (capacity {} >= required {len})",
                existing.capacity()
            );
            existing
        }
        Some(existing) => {
            log::debug!(
                "Reallocating {buffer} buffer (capacity {} < required {len})",
                existing.capacity()
            );
            drop(existing);
            try_reserve(buffer, len)?
        }
        None => try_reserve(buffer, len)?,
    };
    storage.clear();
    storage.resize(len, T::default());
    Ok(storage)
}

pub(crate) fn allocation_error<T>(buffer: BufferKind, len: usize) -> CombiError {
    CombiError::Allocation {
        buffer,
        bytes: len.saturating_mul(size_of::<T>()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_buffer_with_sufficient_capacity() {
        let previous: Vec<f64> = Vec::with_capacity(64);
        let ptr = previous.as_ptr();
        let reused = reuse_or_zeroed(BufferKind::KernelMatrix, Some(previous), 49).unwrap();
        assert_eq!(reused.len(), 49);
        assert_eq!(reused.as_ptr(), ptr);
        assert!(reused.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn reallocates_when_capacity_is_too_small() {
        let previous = vec![1.0f32; 4];
        let grown = reuse_or_zeroed(BufferKind::FeatureChunk, Some(previous), 16).unwrap();
        assert_eq!(grown.len(), 16);
        assert!(grown.capacity() >= 16);
        assert!(grown.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn impossible_reservation_is_reported() {
        let err = try_reserve::<f64>(BufferKind::KernelMatrix, usize::MAX / 2).unwrap_err();
        match err {
            CombiError::Allocation { buffer, bytes } => {
                assert_eq!(buffer, BufferKind::KernelMatrix);
                assert!(bytes > 0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
