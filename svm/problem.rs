//! Training problems for the two solver backends.
//!
//! [`PrecomputedProblem`] stores the kernel in the libsvm precomputed layout: every
//! sample row starts with a node carrying its own 1-based sample index, followed by one
//! node per column holding `K[i][j]` under the 1-based key `j + 1`. Solvers look kernel
//! values up through the node-0 indirection, never by raw position.
//!
//! [`SparseProblem`] keeps only the non-zero encoded features of each sample.

use ndarray::ArrayView2;
use std::mem::size_of;

use crate::buffers::{allocation_error, reuse_or_zeroed, try_reserve};
use crate::chunks::FeatureChunks;
use crate::progress::{CombiStage, ProgressObserver};
use crate::source::GenotypeSource;
use crate::types::{BufferKind, CombiError};

/// One entry of a precomputed-kernel row.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SvmNode {
    pub index: u32,
    pub value: f64,
}

#[derive(Clone, Debug)]
pub struct PrecomputedProblem {
    n_samples: usize,
    nodes: Vec<SvmNode>,
    labels: Vec<f64>,
}

impl PrecomputedProblem {
    /// Lays `kernel` out row by row, reusing `previous` when it has the capacity.
    pub fn from_kernel(
        kernel: ArrayView2<'_, f64>,
        labels: &[f64],
        previous: Option<PrecomputedProblem>,
    ) -> Result<Self, CombiError> {
        let n = kernel.nrows();
        if kernel.ncols() != n {
            return Err(CombiError::InvalidInput(format!(
                "kernel matrix must be square, got {}x{}",
                n,
                kernel.ncols()
            )));
        }
        if labels.len() != n {
            return Err(CombiError::LabelCountMismatch {
                found: labels.len(),
                expected: n,
            });
        }
        if u32::try_from(n + 1).is_err() {
            return Err(CombiError::InvalidInput(format!(
                "{n} samples exceed the precomputed-kernel index range"
            )));
        }

        let row_len = n + 1;
        let len = n
            .checked_mul(row_len)
            .ok_or_else(|| allocation_error::<SvmNode>(BufferKind::KernelProblem, usize::MAX))?;
        let (old_nodes, old_labels) = match previous {
            Some(p) => (Some(p.nodes), Some(p.labels)),
            None => (None, None),
        };
        let mut nodes = reuse_or_zeroed(BufferKind::KernelProblem, old_nodes, len)?;
        let mut stored_labels =
            reuse_or_zeroed(BufferKind::KernelProblem, old_labels, labels.len())?;
        stored_labels.copy_from_slice(labels);

        for i in 0..n {
            nodes[i * row_len] = SvmNode {
                index: 0,
                value: (i + 1) as f64,
            };
            for j in i..n {
                let value = kernel[[i, j]];
                nodes[i * row_len + j + 1] = SvmNode {
                    index: (j + 1) as u32,
                    value,
                };
                nodes[j * row_len + i + 1] = SvmNode {
                    index: (i + 1) as u32,
                    value,
                };
            }
        }

        Ok(Self {
            n_samples: n,
            nodes,
            labels: stored_labels,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn labels(&self) -> &[f64] {
        &self.labels
    }

    /// Row `i`: node 0 is the sample's own index, then one node per column.
    pub fn row(&self, i: usize) -> &[SvmNode] {
        let row_len = self.n_samples + 1;
        &self.nodes[i * row_len..(i + 1) * row_len]
    }

    /// `K(i, j)` read through the node-0 indirection of row `j`.
    #[inline]
    pub fn kernel_value(&self, i: usize, j: usize) -> f64 {
        let key = self.row(j)[0].value as usize;
        self.row(i)[key].value
    }

    pub fn capacity_bytes(&self) -> usize {
        self.nodes.capacity() * size_of::<SvmNode>() + self.labels.capacity() * size_of::<f64>()
    }
}

/// One non-zero encoded feature; `index` is the 0-based feature column.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FeatureNode {
    pub index: u32,
    pub value: f32,
}

#[derive(Clone, Debug, Default)]
pub struct SparseProblem {
    n_features: usize,
    rows: Vec<Vec<FeatureNode>>,
    labels: Vec<f64>,
}

impl SparseProblem {
    /// Collects the non-zero features of every chunk, reusing row storage from
    /// `previous`.
    pub fn from_chunks<S, P>(
        chunks: &mut FeatureChunks<'_, S>,
        labels: &[f64],
        previous: Option<SparseProblem>,
        progress: &mut P,
    ) -> Result<Self, CombiError>
    where
        S: GenotypeSource,
        P: ProgressObserver + ?Sized,
    {
        let n_samples = chunks.n_samples();
        if labels.len() != n_samples {
            return Err(CombiError::LabelCountMismatch {
                found: labels.len(),
                expected: n_samples,
            });
        }
        let n_features = chunks.n_features();
        if u32::try_from(n_features).is_err() {
            return Err(CombiError::InvalidInput(format!(
                "{n_features} encoded features exceed the sparse index range"
            )));
        }

        let mut problem = previous.unwrap_or_default();
        problem.n_features = n_features;
        problem.labels.clear();
        problem.labels.extend_from_slice(labels);
        problem.rows.truncate(n_samples);
        for row in &mut problem.rows {
            row.clear();
        }
        let missing_rows = n_samples - problem.rows.len();
        problem
            .rows
            .try_reserve_exact(missing_rows)
            .map_err(|_| allocation_error::<Vec<FeatureNode>>(BufferKind::SparseProblem, missing_rows))?;
        problem.rows.resize_with(n_samples, Vec::new);

        let num_chunks = chunks.num_chunks();
        progress.on_stage_start(CombiStage::Encoding, num_chunks);
        for index in 0..num_chunks {
            let offset = chunks.chunk_features(index).start;
            let chunk = chunks.get(index)?;
            for (sample, values) in chunk.outer_iter().enumerate() {
                let row = &mut problem.rows[sample];
                let non_zero = values.iter().filter(|v| **v != 0.0).count();
                row.try_reserve(non_zero)
                    .map_err(|_| allocation_error::<FeatureNode>(BufferKind::SparseProblem, non_zero))?;
                row.extend(
                    values
                        .iter()
                        .enumerate()
                        .filter(|(_, v)| **v != 0.0)
                        .map(|(column, v)| FeatureNode {
                            index: (offset + column) as u32,
                            value: *v,
                        }),
                );
            }
            progress.on_stage_advance(CombiStage::Encoding, index + 1);
        }
        progress.on_stage_finish(CombiStage::Encoding);

        log::debug!(
            "Sparse problem: {} samples, {} features, {} non-zero entries",
            n_samples,
            n_features,
            problem.rows.iter().map(Vec::len).sum::<usize>()
        );
        Ok(problem)
    }

    /// Builds a problem directly from per-sample rows.
    pub fn from_rows(
        rows: Vec<Vec<FeatureNode>>,
        labels: &[f64],
        n_features: usize,
    ) -> Result<Self, CombiError> {
        if labels.len() != rows.len() {
            return Err(CombiError::LabelCountMismatch {
                found: labels.len(),
                expected: rows.len(),
            });
        }
        if let Some(node) = rows.iter().flatten().find(|n| n.index as usize >= n_features) {
            return Err(CombiError::InvalidInput(format!(
                "feature index {} out of range ({n_features} features)",
                node.index
            )));
        }
        let mut stored = try_reserve(BufferKind::SparseProblem, labels.len())?;
        stored.extend_from_slice(labels);
        Ok(Self {
            n_features,
            rows,
            labels: stored,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.rows.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn labels(&self) -> &[f64] {
        &self.labels
    }

    pub fn row(&self, i: usize) -> &[FeatureNode] {
        &self.rows[i]
    }

    pub fn capacity_bytes(&self) -> usize {
        self.rows.capacity() * size_of::<Vec<FeatureNode>>()
            + self
                .rows
                .iter()
                .map(|r| r.capacity() * size_of::<FeatureNode>())
                .sum::<usize>()
            + self.labels.capacity() * size_of::<f64>()
    }
}
