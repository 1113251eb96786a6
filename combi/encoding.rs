//! # Genotype Feature Encoding
//!
//! Every marker expands into `encoding_factor` numeric columns of the feature matrix.
//! The encoders form a closed set; each one builds a small per-marker lookup table from
//! the marker's alleles and class histogram, and each one can fold a trained weight
//! vector back into one importance score per marker.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::{Genotype, GenotypeClass, MarkerRecord, classify_alleles};

/// Widest encoding in the family (allelic).
pub const MAX_ENCODING_FACTOR: usize = 4;

#[derive(Error, Debug, PartialEq)]
pub enum EncodingError {
    #[error(
        "encoded weight vector has {len} entries, which is not a multiple of the encoding factor {factor}"
    )]
    LengthMismatch { len: usize, factor: usize },
    #[error("norm order must be positive and finite, got {0}")]
    InvalidNormOrder(f64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenotypeEncoder {
    /// Two one-hot allele indicators per allele copy.
    Allelic,
    /// One-hot over homozygous-major, heterozygous, homozygous-minor.
    Genotypic,
    /// A single ordinal per observed genotype class.
    Nominal,
}

impl GenotypeEncoder {
    pub const fn encoding_factor(self) -> usize {
        match self {
            Self::Allelic => 4,
            Self::Genotypic => 3,
            Self::Nominal => 1,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::Allelic => "allelic",
            Self::Genotypic => "genotypic",
            Self::Nominal => "nominal",
        }
    }

    /// Builds the genotype lookup table for one marker.
    pub fn table(self, marker: &MarkerRecord) -> EncodingTable {
        let mut values = [[0.0f32; MAX_ENCODING_FACTOR]; 5];
        match self {
            Self::Allelic => {
                let (larger, smaller) = if marker.major >= marker.minor {
                    (marker.major, marker.minor)
                } else {
                    (marker.minor, marker.major)
                };
                let copy = |allele: u8| -> [f32; 2] {
                    if allele == larger {
                        [1.0, 0.0]
                    } else if allele == smaller {
                        [0.0, 1.0]
                    } else {
                        [0.0, 0.0]
                    }
                };
                let pairs = [
                    (GenotypeClass::HomMajor, marker.major, marker.major),
                    (GenotypeClass::HetMajorFirst, marker.major, marker.minor),
                    (GenotypeClass::HetMinorFirst, marker.minor, marker.major),
                    (GenotypeClass::HomMinor, marker.minor, marker.minor),
                ];
                for (class, first, second) in pairs {
                    let [a, b] = copy(first);
                    let [c, d] = copy(second);
                    values[class.index()] = [a, b, c, d];
                }
            }
            Self::Genotypic => {
                values[GenotypeClass::HomMajor.index()][0] = 1.0;
                values[GenotypeClass::HetMajorFirst.index()][1] = 1.0;
                values[GenotypeClass::HetMinorFirst.index()][1] = 1.0;
                values[GenotypeClass::HomMinor.index()][2] = 1.0;
            }
            Self::Nominal => {
                // Ordinals follow the fixed class order, skipping classes absent from
                // the histogram. Both heterozygous orientations share one ordinal.
                let counts = &marker.counts;
                let groups: [(&[GenotypeClass], u32); 3] = [
                    (&[GenotypeClass::HomMajor], counts.hom_major),
                    (
                        &[GenotypeClass::HetMajorFirst, GenotypeClass::HetMinorFirst],
                        counts.heterozygous(),
                    ),
                    (&[GenotypeClass::HomMinor], counts.hom_minor),
                ];
                let mut ordinal = 0.0f32;
                for (classes, count) in groups {
                    if count == 0 {
                        continue;
                    }
                    for class in classes {
                        values[class.index()][0] = ordinal;
                    }
                    ordinal += 1.0;
                }
            }
        }

        EncodingTable {
            major: marker.major,
            minor: marker.minor,
            factor: self.encoding_factor(),
            values,
        }
    }

    /// Folds an encoded weight vector into one weight per marker using the L2 norm.
    pub fn decode_weights(self, encoded: &[f64]) -> Result<Vec<f64>, EncodingError> {
        self.decode_weights_with_norm(encoded, 2.0)
    }

    /// p-norm generalisation of [`decode_weights`](Self::decode_weights).
    ///
    /// Each weight is divided by the p-norm of the whole vector, and each marker's
    /// `encoding_factor` consecutive entries collapse to their p-norm.
    pub fn decode_weights_with_norm(
        self,
        encoded: &[f64],
        p: f64,
    ) -> Result<Vec<f64>, EncodingError> {
        if !(p.is_finite() && p > 0.0) {
            return Err(EncodingError::InvalidNormOrder(p));
        }
        let factor = self.encoding_factor();
        if encoded.len() % factor != 0 {
            return Err(EncodingError::LengthMismatch {
                len: encoded.len(),
                factor,
            });
        }

        let norm = p_norm(encoded, p);
        if norm == 0.0 || !norm.is_finite() {
            return Ok(vec![0.0; encoded.len() / factor]);
        }

        Ok(encoded
            .chunks_exact(factor)
            .map(|marker| {
                marker
                    .iter()
                    .map(|w| (w.abs() / norm).powf(p))
                    .sum::<f64>()
                    .powf(1.0 / p)
            })
            .collect())
    }
}

impl fmt::Display for GenotypeEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

fn p_norm(values: &[f64], p: f64) -> f64 {
    if p == 2.0 {
        return values.iter().map(|v| v * v).sum::<f64>().sqrt();
    }
    values
        .iter()
        .map(|v| v.abs().powf(p))
        .sum::<f64>()
        .powf(1.0 / p)
}

/// Per-marker genotype lookup table.
#[derive(Clone, Debug)]
pub struct EncodingTable {
    major: u8,
    minor: u8,
    factor: usize,
    values: [[f32; MAX_ENCODING_FACTOR]; 5],
}

impl EncodingTable {
    pub fn encoding_factor(&self) -> usize {
        self.factor
    }

    /// The numeric tuple for one call.
    #[inline]
    pub fn encode(&self, genotype: Genotype) -> &[f32] {
        let class = classify_alleles(self.major, self.minor, genotype);
        &self.values[class.index()][..self.factor]
    }

    /// Writes the tuple for one call into `out`, which must hold `encoding_factor` values.
    #[inline]
    pub fn encode_into(&self, genotype: Genotype, out: &mut [f32]) {
        out.copy_from_slice(self.encode(genotype));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MarkerRecord;
    use approx::assert_relative_eq;

    fn marker(major: u8, minor: u8) -> MarkerRecord {
        let g = [
            Genotype::new(major, major),
            Genotype::new(major, minor),
            Genotype::new(minor, major),
            Genotype::new(minor, minor),
            Genotype::new(major, major),
        ];
        MarkerRecord::from_genotypes("rs", "1", 1, &g)
    }

    #[test]
    fn allelic_encoding_matches_reference_tuples() {
        let m = marker(b'A', b'T');
        assert_eq!((m.major, m.minor), (b'A', b'T'));
        let table = GenotypeEncoder::Allelic.table(&m);
        assert_eq!(table.encode(Genotype::new(b'A', b'A')), &[0.0, 1.0, 0.0, 1.0]);
        assert_eq!(table.encode(Genotype::new(b'A', b'T')), &[0.0, 1.0, 1.0, 0.0]);
        assert_eq!(table.encode(Genotype::new(b'T', b'A')), &[1.0, 0.0, 0.0, 1.0]);
        assert_eq!(table.encode(Genotype::new(b'T', b'T')), &[1.0, 0.0, 1.0, 0.0]);
        assert_eq!(table.encode(Genotype::MISSING), &[0.0; 4]);
        assert_eq!(table.encode(Genotype::new(b'A', b'G')), &[0.0; 4]);
    }

    #[test]
    fn allelic_order_follows_lexicographic_allele_order_not_frequency() {
        // Major 'T' sorts after minor 'A': the indicator layout is unchanged.
        let m = marker(b'T', b'A');
        assert_eq!((m.major, m.minor), (b'T', b'A'));
        let table = GenotypeEncoder::Allelic.table(&m);
        assert_eq!(table.encode(Genotype::new(b'T', b'T')), &[1.0, 0.0, 1.0, 0.0]);
        assert_eq!(table.encode(Genotype::new(b'A', b'A')), &[0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn genotypic_encoding_is_one_hot() {
        let table = GenotypeEncoder::Genotypic.table(&marker(b'C', b'G'));
        assert_eq!(table.encode(Genotype::new(b'C', b'C')), &[1.0, 0.0, 0.0]);
        assert_eq!(table.encode(Genotype::new(b'C', b'G')), &[0.0, 1.0, 0.0]);
        assert_eq!(table.encode(Genotype::new(b'G', b'C')), &[0.0, 1.0, 0.0]);
        assert_eq!(table.encode(Genotype::new(b'G', b'G')), &[0.0, 0.0, 1.0]);
        assert_eq!(table.encode(Genotype::MISSING), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn nominal_encoding_skips_unobserved_classes() {
        let g = [
            Genotype::new(b'A', b'A'),
            Genotype::new(b'G', b'G'),
            Genotype::new(b'A', b'A'),
        ];
        let m = MarkerRecord::from_genotypes("rs", "1", 1, &g);
        let table = GenotypeEncoder::Nominal.table(&m);
        assert_eq!(table.encode(Genotype::new(b'A', b'A')), &[0.0]);
        assert_eq!(table.encode(Genotype::new(b'G', b'G')), &[1.0]);

        let full = GenotypeEncoder::Nominal.table(&marker(b'A', b'T'));
        assert_eq!(full.encode(Genotype::new(b'T', b'A')), &[1.0]);
        assert_eq!(full.encode(Genotype::new(b'T', b'T')), &[2.0]);
    }

    #[test]
    fn decode_weights_yields_one_weight_per_marker() {
        for encoder in [
            GenotypeEncoder::Allelic,
            GenotypeEncoder::Genotypic,
            GenotypeEncoder::Nominal,
        ] {
            let factor = encoder.encoding_factor();
            let encoded: Vec<f64> = (0..7 * factor).map(|i| (i as f64) - 3.5).collect();
            let decoded = encoder.decode_weights(&encoded).unwrap();
            assert_eq!(decoded.len(), 7);
            assert!(decoded.iter().all(|w| *w >= 0.0));
        }
    }

    #[test]
    fn nominal_decode_is_normalized_absolute_value() {
        let encoded = [3.0, -4.0, 0.0];
        let decoded = GenotypeEncoder::Nominal.decode_weights(&encoded).unwrap();
        assert_relative_eq!(decoded[0], 0.6, epsilon = 1e-12);
        assert_relative_eq!(decoded[1], 0.8, epsilon = 1e-12);
        assert_relative_eq!(decoded[2], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn decoded_squares_sum_to_one() {
        let encoded = [1.0, -2.0, 0.5, 0.0, 3.0, -1.0];
        let decoded = GenotypeEncoder::Genotypic.decode_weights(&encoded).unwrap();
        let total: f64 = decoded.iter().map(|w| w * w).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn decode_rejects_ragged_input_and_zero_vector_is_zero() {
        assert_eq!(
            GenotypeEncoder::Allelic.decode_weights(&[1.0; 6]),
            Err(EncodingError::LengthMismatch { len: 6, factor: 4 })
        );
        assert_eq!(
            GenotypeEncoder::Genotypic.decode_weights(&[0.0; 6]).unwrap(),
            vec![0.0, 0.0]
        );
        assert!(matches!(
            GenotypeEncoder::Nominal.decode_weights_with_norm(&[1.0], 0.0),
            Err(EncodingError::InvalidNormOrder(_))
        ));
    }
}
