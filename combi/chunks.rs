//! # Memory-Bounded Feature Chunks
//!
//! The encoded feature matrix (samples x markers*factor) is never materialised in full.
//! Instead it is re-derived chunk by chunk into one reusable backing buffer whose size
//! is bounded by a byte budget. A chunk is handed out as a view borrowed from the
//! materialiser, so requesting the next chunk statically ends the previous one.

use ndarray::ArrayView2;
use std::mem::size_of;
use std::ops::Range;

use crate::buffers::reuse_or_zeroed;
use crate::encoding::{EncodingTable, GenotypeEncoder};
use crate::source::GenotypeSource;
use crate::types::{BufferKind, CombiError, Genotype};

/// Bytes per stored feature value.
pub const FEATURE_VALUE_BYTES: usize = size_of::<f32>();

/// Largest number of markers whose encoded columns fit in `budget_bytes`, capped at
/// `total_markers`. Never returns zero for a non-empty marker set.
pub fn max_chunk_markers(
    total_markers: usize,
    n_samples: usize,
    encoding_factor: usize,
    budget_bytes: usize,
) -> usize {
    if total_markers == 0 {
        return 0;
    }
    let bytes_per_marker = n_samples
        .saturating_mul(encoding_factor)
        .saturating_mul(FEATURE_VALUE_BYTES)
        .max(1);
    let fitting = budget_bytes / bytes_per_marker;
    if fitting == 0 {
        log::warn!(
            "Feature chunk budget of {budget_bytes} bytes cannot hold one marker ({bytes_per_marker} bytes); using single-marker chunks"
        );
        return 1;
    }
    fitting.min(total_markers)
}

/// Chunked feature-matrix materialiser over a subset of a source's markers.
pub struct FeatureChunks<'a, S: GenotypeSource> {
    source: &'a S,
    markers: &'a [usize],
    encoder: GenotypeEncoder,
    tables: Vec<EncodingTable>,
    n_samples: usize,
    max_chunk_markers: usize,
    storage: Vec<f32>,
    calls: Vec<Genotype>,
}

impl<'a, S: GenotypeSource> FeatureChunks<'a, S> {
    /// `markers` are indices into `source`, in feature-column order. `storage` may carry
    /// a buffer from a previous run; it is reused when large enough.
    pub fn new(
        source: &'a S,
        markers: &'a [usize],
        encoder: GenotypeEncoder,
        budget_bytes: usize,
        storage: Option<Vec<f32>>,
    ) -> Result<Self, CombiError> {
        let n_samples = source.n_samples();
        if n_samples == 0 {
            return Err(CombiError::InvalidInput(
                "feature chunks require at least one sample".into(),
            ));
        }
        if markers.is_empty() {
            return Err(CombiError::InvalidInput(
                "feature chunks require at least one marker".into(),
            ));
        }
        if let Some(&bad) = markers.iter().find(|&&ix| ix >= source.n_markers()) {
            return Err(CombiError::InvalidInput(format!(
                "marker index {bad} out of range ({} markers)",
                source.n_markers()
            )));
        }

        let factor = encoder.encoding_factor();
        let max_chunk_markers = max_chunk_markers(markers.len(), n_samples, factor, budget_bytes);
        let capacity = n_samples * max_chunk_markers * factor;
        let storage = reuse_or_zeroed(BufferKind::FeatureChunk, storage, capacity)?;
        let tables = markers
            .iter()
            .map(|&ix| encoder.table(source.marker(ix)))
            .collect();

        log::debug!(
            "Feature chunks: {} markers, {} per chunk, {} chunks, {} bytes of storage",
            markers.len(),
            max_chunk_markers,
            markers.len().div_ceil(max_chunk_markers),
            capacity * FEATURE_VALUE_BYTES
        );

        Ok(Self {
            source,
            markers,
            encoder,
            tables,
            n_samples,
            max_chunk_markers,
            storage,
            calls: Vec::with_capacity(n_samples),
        })
    }

    pub fn encoder(&self) -> GenotypeEncoder {
        self.encoder
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn n_markers(&self) -> usize {
        self.markers.len()
    }

    /// Total encoded columns across all chunks.
    pub fn n_features(&self) -> usize {
        self.markers.len() * self.encoder.encoding_factor()
    }

    pub fn max_chunk_markers(&self) -> usize {
        self.max_chunk_markers
    }

    pub fn num_chunks(&self) -> usize {
        self.markers.len().div_ceil(self.max_chunk_markers)
    }

    /// Marker positions (within this subset) covered by chunk `index`.
    pub fn chunk_markers(&self, index: usize) -> Range<usize> {
        let start = (index * self.max_chunk_markers).min(self.markers.len());
        let end = (start + self.max_chunk_markers).min(self.markers.len());
        start..end
    }

    /// Encoded column range of chunk `index` within the full feature matrix.
    pub fn chunk_features(&self, index: usize) -> Range<usize> {
        let factor = self.encoder.encoding_factor();
        let markers = self.chunk_markers(index);
        markers.start * factor..markers.end * factor
    }

    /// Materialises chunk `index` as a samples x (chunk markers * factor) row-major view.
    pub fn get(&mut self, index: usize) -> Result<ArrayView2<'_, f32>, CombiError> {
        let num_chunks = self.num_chunks();
        if index >= num_chunks {
            return Err(CombiError::ChunkOutOfRange { index, num_chunks });
        }

        let factor = self.encoder.encoding_factor();
        let range = self.chunk_markers(index);
        let width = range.len() * factor;
        let n_samples = self.n_samples;

        for (column, marker_pos) in range.enumerate() {
            let marker_ix = self.markers[marker_pos];
            self.source
                .read_genotypes(marker_ix, &mut self.calls)
                .map_err(CombiError::source_error)?;
            if self.calls.len() != n_samples {
                return Err(CombiError::InvalidInput(format!(
                    "marker {} returned {} calls for {} samples",
                    self.source.marker(marker_ix).id,
                    self.calls.len(),
                    n_samples
                )));
            }
            let table = &self.tables[marker_pos];
            let offset = column * factor;
            for (sample, call) in self.calls.iter().enumerate() {
                let start = sample * width + offset;
                table.encode_into(*call, &mut self.storage[start..start + factor]);
            }
        }

        ArrayView2::from_shape((n_samples, width), &self.storage[..n_samples * width])
            .map_err(|e| CombiError::InvalidInput(format!("feature chunk shape: {e}")))
    }

    /// Gives the backing storage back for reuse by a later run.
    pub fn into_storage(self) -> Vec<f32> {
        self.storage
    }
}
