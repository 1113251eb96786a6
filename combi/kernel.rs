//! # Linear Kernel (Gram) Matrix Accumulation
//!
//! `K[r][c] = sum_f x[r][f] * x[c][f]` over the encoded feature matrix, accumulated one
//! feature chunk at a time. Only the upper triangle is computed; the lower triangle is
//! mirrored once every chunk has been folded in, so the result is symmetric for any
//! chunking of the same marker set.
//!
//! Loop order is row sample, column sample, feature. With row-major chunks the two
//! inner operands are contiguous rows; `benches/kernel_benchmark.rs` compares this
//! against iterating features in the outer loop.

use ndarray::ArrayView2;
use std::mem::size_of;

use crate::buffers::reuse_or_zeroed;
use crate::chunks::FeatureChunks;
use crate::progress::{CombiStage, ProgressObserver};
use crate::source::GenotypeSource;
use crate::types::{BufferKind, CombiError};

/// Dense n x n sample kernel stored row-major.
#[derive(Clone, Debug)]
pub struct KernelMatrix {
    n_samples: usize,
    data: Vec<f64>,
}

impl KernelMatrix {
    /// A zeroed n x n matrix, reusing `previous` when it has the capacity.
    pub fn zeroed(n_samples: usize, previous: Option<KernelMatrix>) -> Result<Self, CombiError> {
        let len = n_samples.checked_mul(n_samples).ok_or_else(|| {
            CombiError::Allocation {
                buffer: BufferKind::KernelMatrix,
                bytes: usize::MAX,
            }
        })?;
        let data = reuse_or_zeroed(
            BufferKind::KernelMatrix,
            previous.map(KernelMatrix::into_storage),
            len,
        )?;
        Ok(Self { n_samples, data })
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.n_samples + col]
    }

    pub fn view(&self) -> Result<ArrayView2<'_, f64>, CombiError> {
        ArrayView2::from_shape((self.n_samples, self.n_samples), &self.data).map_err(|e| {
            CombiError::InvalidInput(format!(
                "kernel storage of {} values is not {n}x{n}: {e}",
                self.data.len(),
                n = self.n_samples
            ))
        })
    }

    pub fn capacity_bytes(&self) -> usize {
        self.data.capacity() * size_of::<f64>()
    }

    pub fn into_storage(self) -> Vec<f64> {
        self.data
    }

    /// Adds the upper-triangle inner products of one chunk.
    pub fn accumulate_chunk(&mut self, chunk: ArrayView2<'_, f32>) -> Result<(), CombiError> {
        let n = self.n_samples;
        if chunk.nrows() != n {
            return Err(CombiError::InvalidInput(format!(
                "feature chunk has {} rows, kernel expects {n}",
                chunk.nrows()
            )));
        }
        if chunk.ncols() == 0 {
            return Ok(());
        }

        for r in 0..n {
            let row_r = chunk.row(r);
            let out = &mut self.data[r * n..(r + 1) * n];
            for c in r..n {
                let row_c = chunk.row(c);
                let dot: f64 = row_r
                    .iter()
                    .zip(row_c.iter())
                    .map(|(a, b)| f64::from(*a) * f64::from(*b))
                    .sum();
                out[c] += dot;
            }
        }
        Ok(())
    }

    /// Copies the upper triangle onto the lower one.
    pub fn mirror_upper(&mut self) {
        let n = self.n_samples;
        for r in 1..n {
            for c in 0..r {
                self.data[r * n + c] = self.data[c * n + r];
            }
        }
    }

    pub fn is_symmetric(&self) -> bool {
        let n = self.n_samples;
        (0..n).all(|r| (0..r).all(|c| self.get(r, c) == self.get(c, r)))
    }
}

/// Builds the kernel matrix from every chunk of `chunks`.
pub fn build_kernel_matrix<S, P>(
    chunks: &mut FeatureChunks<'_, S>,
    previous: Option<KernelMatrix>,
    progress: &mut P,
) -> Result<KernelMatrix, CombiError>
where
    S: GenotypeSource,
    P: ProgressObserver + ?Sized,
{
    let mut kernel = KernelMatrix::zeroed(chunks.n_samples(), previous)?;
    let num_chunks = chunks.num_chunks();
    progress.on_stage_start(CombiStage::KernelMatrix, num_chunks);
    for index in 0..num_chunks {
        let chunk = chunks.get(index)?;
        kernel.accumulate_chunk(chunk)?;
        progress.on_stage_advance(CombiStage::KernelMatrix, index + 1);
    }
    kernel.mirror_upper();
    progress.on_stage_finish(CombiStage::KernelMatrix);
    log::debug!(
        "Kernel matrix {}x{} accumulated from {num_chunks} chunks",
        kernel.n_samples(),
        kernel.n_samples()
    );
    Ok(kernel)
}
