use std::error::Error;
use thiserror::Error;

use crate::types::{Genotype, MarkerRecord};

/// Read-only access to a genotype data set.
///
/// Implementations are supplied by the host; the engine only ever reads one marker's
/// calls at a time and never writes back.
pub trait GenotypeSource {
    type Error: Error + Send + Sync + 'static;

    fn n_samples(&self) -> usize;
    fn n_markers(&self) -> usize;
    fn marker(&self, index: usize) -> &MarkerRecord;

    /// Replaces the contents of `out` with the calls of marker `index`, one per sample.
    fn read_genotypes(&self, index: usize, out: &mut Vec<Genotype>) -> Result<(), Self::Error>;
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum InMemorySourceError {
    #[error("marker index {index} out of range ({n_markers} markers)")]
    MarkerOutOfRange { index: usize, n_markers: usize },
    #[error("expected {expected} genotype calls ({n_markers} markers x {n_samples} samples), found {found}")]
    ShapeMismatch {
        expected: usize,
        found: usize,
        n_markers: usize,
        n_samples: usize,
    },
}

/// Marker-major genotype calls held in memory.
#[derive(Clone, Debug)]
pub struct InMemoryGenotypes {
    markers: Vec<MarkerRecord>,
    calls: Vec<Genotype>,
    n_samples: usize,
}

impl InMemoryGenotypes {
    /// `calls` holds `n_samples` consecutive calls per marker, markers in `markers` order.
    pub fn new(
        markers: Vec<MarkerRecord>,
        calls: Vec<Genotype>,
        n_samples: usize,
    ) -> Result<Self, InMemorySourceError> {
        let expected = markers.len() * n_samples;
        if calls.len() != expected {
            return Err(InMemorySourceError::ShapeMismatch {
                expected,
                found: calls.len(),
                n_markers: markers.len(),
                n_samples,
            });
        }
        Ok(Self {
            markers,
            calls,
            n_samples,
        })
    }

    /// Builds marker records from the calls themselves.
    pub fn from_calls(
        marker_meta: Vec<(String, String, u64)>,
        calls: Vec<Genotype>,
        n_samples: usize,
    ) -> Result<Self, InMemorySourceError> {
        let expected = marker_meta.len() * n_samples;
        if calls.len() != expected {
            return Err(InMemorySourceError::ShapeMismatch {
                expected,
                found: calls.len(),
                n_markers: marker_meta.len(),
                n_samples,
            });
        }
        let markers = marker_meta
            .iter()
            .enumerate()
            .map(|(ix, (id, chromosome, position))| {
                let row = &calls[ix * n_samples..(ix + 1) * n_samples];
                MarkerRecord::from_genotypes(id, chromosome, *position, row)
            })
            .collect();
        Self::new(markers, calls, n_samples)
    }

    pub fn markers(&self) -> &[MarkerRecord] {
        &self.markers
    }

    pub fn marker_calls(&self, index: usize) -> Option<&[Genotype]> {
        if index >= self.markers.len() {
            return None;
        }
        Some(&self.calls[index * self.n_samples..(index + 1) * self.n_samples])
    }
}

impl GenotypeSource for InMemoryGenotypes {
    type Error = InMemorySourceError;

    fn n_samples(&self) -> usize {
        self.n_samples
    }

    fn n_markers(&self) -> usize {
        self.markers.len()
    }

    fn marker(&self, index: usize) -> &MarkerRecord {
        &self.markers[index]
    }

    fn read_genotypes(&self, index: usize, out: &mut Vec<Genotype>) -> Result<(), Self::Error> {
        let row = self
            .marker_calls(index)
            .ok_or(InMemorySourceError::MarkerOutOfRange {
                index,
                n_markers: self.markers.len(),
            })?;
        out.clear();
        out.extend_from_slice(row);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_shapes() {
        let err = InMemoryGenotypes::from_calls(
            vec![("rs1".into(), "1".into(), 10)],
            vec![Genotype::new(b'A', b'A'); 3],
            2,
        )
        .unwrap_err();
        assert!(matches!(err, InMemorySourceError::ShapeMismatch { expected: 2, found: 3, .. }));
    }

    #[test]
    fn reads_marker_rows() {
        let calls = vec![
            Genotype::new(b'A', b'A'),
            Genotype::new(b'A', b'C'),
            Genotype::new(b'G', b'G'),
            Genotype::MISSING,
        ];
        let source = InMemoryGenotypes::from_calls(
            vec![("rs1".into(), "1".into(), 10), ("rs2".into(), "1".into(), 20)],
            calls,
            2,
        )
        .unwrap();
        let mut out = Vec::new();
        source.read_genotypes(1, &mut out).unwrap();
        assert_eq!(out, vec![Genotype::new(b'G', b'G'), Genotype::MISSING]);
        assert_eq!(source.marker(0).minor, b'C');
        assert!(source.read_genotypes(2, &mut out).is_err());
    }
}
