// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only are used in one file.

use std::cmp::Ordering;
use std::error::Error;
use std::fmt;

use natord::compare;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::encoding::EncodingError;
use crate::peaks::{FilterError, PeakError};
use crate::svm::SolverError;

/// Allele byte used for a missing call.
pub const MISSING_ALLELE: u8 = 0;

/// One marker's call for one sample: the father and mother allele codes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Genotype {
    pub father: u8,
    pub mother: u8,
}

impl Genotype {
    pub const MISSING: Genotype = Genotype {
        father: MISSING_ALLELE,
        mother: MISSING_ALLELE,
    };

    #[inline]
    pub const fn new(father: u8, mother: u8) -> Self {
        Self { father, mother }
    }

    #[inline]
    pub fn is_missing(&self) -> bool {
        self.father == MISSING_ALLELE || self.mother == MISSING_ALLELE
    }
}

impl fmt::Display for Genotype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |b: u8| if b == MISSING_ALLELE { '0' } else { b as char };
        write!(f, "{}{}", show(self.father), show(self.mother))
    }
}

/// The five genotype classes a call can fall into relative to a marker's alleles.
/// `A` is the major allele, `a` the minor one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GenotypeClass {
    HomMajor,
    HetMajorFirst,
    HetMinorFirst,
    HomMinor,
    Missing,
}

impl GenotypeClass {
    pub const ALL: [GenotypeClass; 5] = [
        GenotypeClass::HomMajor,
        GenotypeClass::HetMajorFirst,
        GenotypeClass::HetMinorFirst,
        GenotypeClass::HomMinor,
        GenotypeClass::Missing,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Self::HomMajor => 0,
            Self::HetMajorFirst => 1,
            Self::HetMinorFirst => 2,
            Self::HomMinor => 3,
            Self::Missing => 4,
        }
    }
}

/// Histogram of genotype classes observed at one marker (AA / Aa / aA / aa / missing).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenotypeCounts {
    pub hom_major: u32,
    pub het_major_first: u32,
    pub het_minor_first: u32,
    pub hom_minor: u32,
    pub missing: u32,
}

impl GenotypeCounts {
    pub fn count(&self, class: GenotypeClass) -> u32 {
        match class {
            GenotypeClass::HomMajor => self.hom_major,
            GenotypeClass::HetMajorFirst => self.het_major_first,
            GenotypeClass::HetMinorFirst => self.het_minor_first,
            GenotypeClass::HomMinor => self.hom_minor,
            GenotypeClass::Missing => self.missing,
        }
    }

    fn record(&mut self, class: GenotypeClass) {
        match class {
            GenotypeClass::HomMajor => self.hom_major += 1,
            GenotypeClass::HetMajorFirst => self.het_major_first += 1,
            GenotypeClass::HetMinorFirst => self.het_minor_first += 1,
            GenotypeClass::HomMinor => self.hom_minor += 1,
            GenotypeClass::Missing => self.missing += 1,
        }
    }

    pub fn heterozygous(&self) -> u32 {
        self.het_major_first + self.het_minor_first
    }

    pub fn called(&self) -> u32 {
        self.hom_major + self.heterozygous() + self.hom_minor
    }
}

/// Metadata for a single marker as delivered by the data-set source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerRecord {
    pub id: String,
    pub chromosome: String,
    pub position: u64,
    pub major: u8,
    pub minor: u8,
    pub counts: GenotypeCounts,
}

impl MarkerRecord {
    /// Derives the major/minor alleles and the class histogram from raw calls.
    ///
    /// The major allele is the most frequent one (ties go to the smaller byte). A
    /// monomorphic marker gets [`MISSING_ALLELE`] as its minor allele. Calls carrying a
    /// third allele are counted as missing.
    pub fn from_genotypes(id: &str, chromosome: &str, position: u64, calls: &[Genotype]) -> Self {
        let mut allele_counts = [0u32; 256];
        for call in calls.iter().filter(|g| !g.is_missing()) {
            allele_counts[call.father as usize] += 1;
            allele_counts[call.mother as usize] += 1;
        }

        let mut ranked: Vec<(u8, u32)> = allele_counts
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(allele, count)| (allele as u8, *count))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let major = ranked.first().map_or(MISSING_ALLELE, |(a, _)| *a);
        let minor = ranked.get(1).map_or(MISSING_ALLELE, |(a, _)| *a);
        if ranked.len() > 2 {
            log::warn!(
                "Marker {id} has {} distinct alleles; calls outside {}/{} are treated as missing",
                ranked.len(),
                major as char,
                minor as char
            );
        }

        let mut record = Self {
            id: id.to_string(),
            chromosome: normalize_chromosome(chromosome),
            position,
            major,
            minor,
            counts: GenotypeCounts::default(),
        };
        let mut counts = GenotypeCounts::default();
        for call in calls {
            counts.record(record.classify(*call));
        }
        record.counts = counts;
        record
    }

    /// Classifies a call against this marker's alleles.
    #[inline]
    pub fn classify(&self, genotype: Genotype) -> GenotypeClass {
        classify_alleles(self.major, self.minor, genotype)
    }
}

/// Classifies a call against a major/minor allele pair.
#[inline]
pub fn classify_alleles(major: u8, minor: u8, genotype: Genotype) -> GenotypeClass {
    if genotype.is_missing() {
        return GenotypeClass::Missing;
    }
    let is_major = |b: u8| b == major;
    let is_minor = |b: u8| minor != MISSING_ALLELE && b == minor;
    match (genotype.father, genotype.mother) {
        (f, m) if is_major(f) && is_major(m) => GenotypeClass::HomMajor,
        (f, m) if is_major(f) && is_minor(m) => GenotypeClass::HetMajorFirst,
        (f, m) if is_minor(f) && is_major(m) => GenotypeClass::HetMinorFirst,
        (f, m) if is_minor(f) && is_minor(m) => GenotypeClass::HomMinor,
        _ => GenotypeClass::Missing,
    }
}

/// Case/control status of a sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Affection {
    Case,
    Control,
    Unknown,
}

impl Affection {
    /// PLINK convention: `2` is a case, `1` a control, anything else is unknown.
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "2" => Self::Case,
            "1" => Self::Control,
            _ => Self::Unknown,
        }
    }

    /// Classifier label: +1 for cases, -1 for controls.
    pub fn label(self) -> Option<f64> {
        match self {
            Self::Case => Some(1.0),
            Self::Control => Some(-1.0),
            Self::Unknown => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub id: String,
    pub affection: Affection,
}

/// Strips a leading `chr` and upper-cases the remainder, so `chr1`, `1` and `CHR1` agree.
pub fn normalize_chromosome(chromosome: &str) -> String {
    let mut normalized = chromosome.trim();
    if normalized.len() >= 3 && normalized[..3].eq_ignore_ascii_case("chr") {
        normalized = &normalized[3..];
    }
    normalized.to_ascii_uppercase()
}

/// Natural ordering of chromosome labels: 1, 2, ..., 10, ..., X, Y.
pub fn compare_chromosomes(a: &str, b: &str) -> Ordering {
    compare(a, b)
}

/// Large buffers whose allocation failure aborts a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    FeatureChunk,
    KernelMatrix,
    KernelProblem,
    SparseProblem,
    EncodedWeights,
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FeatureChunk => "feature chunk",
            Self::KernelMatrix => "kernel matrix",
            Self::KernelProblem => "precomputed-kernel problem",
            Self::SparseProblem => "sparse solver problem",
            Self::EncodedWeights => "encoded weight vector",
        })
    }
}

/// Errors that abort a COMBI run.
#[derive(Error, Debug)]
pub enum CombiError {
    #[error("failed to allocate {bytes} bytes for the {buffer}; retry with a smaller memory budget")]
    Allocation { buffer: BufferKind, bytes: usize },
    #[error("genotype source error: {0}")]
    Source(Box<dyn Error + Send + Sync + 'static>),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("chunk index {index} out of range ({num_chunks} chunks)")]
    ChunkOutOfRange { index: usize, num_chunks: usize },
    #[error("{found} labels supplied for {expected} samples")]
    LabelCountMismatch { found: usize, expected: usize },
    #[error("significance threshold is a p-value but no p-values were supplied")]
    MissingPValues,
    #[error("p-value {value} of marker {index} must lie in (0, 1]")]
    InvalidPValue { index: usize, value: f64 },
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Peak(#[from] PeakError),
}

impl CombiError {
    pub fn source_error<E>(err: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::Source(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calls(text: &[&str]) -> Vec<Genotype> {
        text.iter()
            .map(|s| {
                let b = s.as_bytes();
                let allele = |c: u8| if c == b'0' { MISSING_ALLELE } else { c };
                Genotype::new(allele(b[0]), allele(b[1]))
            })
            .collect()
    }

    #[test]
    fn marker_record_derives_major_minor_and_histogram() {
        let g = calls(&["AA", "AT", "TA", "TT", "AA", "00", "AA"]);
        let marker = MarkerRecord::from_genotypes("rs1", "chr7", 100, &g);
        assert_eq!(marker.chromosome, "7");
        assert_eq!(marker.major, b'A');
        assert_eq!(marker.minor, b'T');
        assert_eq!(
            marker.counts,
            GenotypeCounts {
                hom_major: 3,
                het_major_first: 1,
                het_minor_first: 1,
                hom_minor: 1,
                missing: 1,
            }
        );
        assert_eq!(marker.counts.called(), 6);
    }

    #[test]
    fn monomorphic_marker_has_missing_minor() {
        let marker = MarkerRecord::from_genotypes("rs2", "1", 5, &calls(&["GG", "GG"]));
        assert_eq!(marker.major, b'G');
        assert_eq!(marker.minor, MISSING_ALLELE);
        assert_eq!(marker.classify(Genotype::new(b'G', b'G')), GenotypeClass::HomMajor);
        assert_eq!(marker.classify(Genotype::new(b'G', b'C')), GenotypeClass::Missing);
    }

    #[test]
    fn affection_codes_map_to_labels() {
        assert_eq!(Affection::from_code("2").label(), Some(1.0));
        assert_eq!(Affection::from_code("1").label(), Some(-1.0));
        assert_eq!(Affection::from_code("-9").label(), None);
        assert_eq!(Affection::from_code("0"), Affection::Unknown);
    }

    #[test]
    fn chromosomes_sort_naturally() {
        let mut labels = vec!["10", "X", "2", "1"];
        labels.sort_by(|a, b| compare_chromosomes(a, b));
        assert_eq!(labels, vec!["1", "2", "10", "X"]);
        assert_eq!(normalize_chromosome(" chrx "), "X");
    }
}
