// ========================================================================================
//
//                      Plain-text adapters for genotype and label tables
//
// ========================================================================================
//
// The engine reads genotypes through `GenotypeSource`; these readers turn tab-separated
// files into an `InMemoryGenotypes` for the command-line driver. Files ending in `.gz`
// are decompressed transparently.
//
// Genotype table:  marker_id  chromosome  position  <sample_1> ... <sample_n>
//                  one call per cell: "AG", "A/G", "A|G"; "00", "--", ".", "NA" = missing
// Sample table:    sample_id  affection     (2 = case, 1 = control, other = unknown)
// P-value table:   marker_id  p_value
// Weight table:    marker_id  chromosome  position  weight  [filtered_weight]

use flate2::read::MultiGzDecoder;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::source::{InMemoryGenotypes, InMemorySourceError};
use crate::types::{Affection, Genotype, MISSING_ALLELE, MarkerRecord, SampleRecord};

const FIXED_GENOTYPE_COLUMNS: [&str; 3] = ["marker_id", "chromosome", "position"];

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to open '{path}': {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("Malformed table '{path}': {source}")]
    Csv { path: PathBuf, source: csv::Error },
    #[error("'{path}' must start with the columns {expected}")]
    BadHeader { path: PathBuf, expected: String },
    #[error("'{path}' line {line}: {message}")]
    BadRecord {
        path: PathBuf,
        line: u64,
        message: String,
    },
    #[error("sample '{0}' is listed more than once")]
    DuplicateSample(String),
    #[error("labelled sample '{0}' has no genotype column")]
    SampleWithoutGenotypes(String),
    #[error("no sample has a case/control label")]
    NoLabelledSamples,
    #[error(transparent)]
    Shape(#[from] InMemorySourceError),
}

/// Genotypes restricted to labelled samples, with labels aligned to sample order.
#[derive(Debug)]
pub struct LoadedCohort {
    pub genotypes: InMemoryGenotypes,
    pub sample_ids: Vec<String>,
    pub labels: Vec<f64>,
}

fn open_text(path: &Path) -> Result<Box<dyn Read>, LoadError> {
    let file = File::open(path).map_err(|source| LoadError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(Box::new(BufReader::new(reader)))
}

fn tsv_reader(path: &Path) -> Result<csv::Reader<Box<dyn Read>>, LoadError> {
    Ok(csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .comment(Some(b'#'))
        .from_reader(open_text(path)?))
}

fn csv_error(path: &Path) -> impl Fn(csv::Error) -> LoadError + '_ {
    move |source| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    }
}

fn bad_record(path: &Path, record: &csv::StringRecord, message: String) -> LoadError {
    LoadError::BadRecord {
        path: path.to_path_buf(),
        line: record.position().map_or(0, |p| p.line()),
        message,
    }
}

/// Parses one genotype call. Returns `None` for unparseable text.
pub fn parse_call(text: &str) -> Option<Genotype> {
    let text = text.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("NA") || text == "." || text == "./." {
        return Some(Genotype::MISSING);
    }
    let bytes: Vec<u8> = text.bytes().filter(|b| *b != b'/' && *b != b'|').collect();
    if bytes.len() != 2 {
        return None;
    }
    let allele = |b: u8| -> Option<u8> {
        match b {
            b'0' | b'-' | b'.' => Some(MISSING_ALLELE),
            b if b.is_ascii_alphabetic() => Some(b.to_ascii_uppercase()),
            _ => None,
        }
    };
    let genotype = Genotype::new(allele(bytes[0])?, allele(bytes[1])?);
    Some(if genotype.is_missing() {
        Genotype::MISSING
    } else {
        genotype
    })
}

/// Reads the sample table.
pub fn read_samples(path: &Path) -> Result<Vec<SampleRecord>, LoadError> {
    let mut reader = tsv_reader(path)?;
    let to_csv = csv_error(path);
    let mut samples = Vec::new();
    let mut seen = HashSet::new();
    for result in reader.records() {
        let record = result.map_err(&to_csv)?;
        let (Some(id), Some(code)) = (record.get(0), record.get(1)) else {
            return Err(bad_record(path, &record, "expected sample_id and affection".into()));
        };
        if !seen.insert(id.to_string()) {
            return Err(LoadError::DuplicateSample(id.to_string()));
        }
        samples.push(SampleRecord {
            id: id.to_string(),
            affection: Affection::from_code(code),
        });
    }
    Ok(samples)
}

/// Reads the genotype table, keeping only samples with a known affection.
pub fn read_cohort(genotype_path: &Path, samples: &[SampleRecord]) -> Result<LoadedCohort, LoadError> {
    let mut reader = tsv_reader(genotype_path)?;
    let to_csv = csv_error(genotype_path);
    let headers = reader.headers().map_err(&to_csv)?.clone();
    let fixed_ok = headers.len() >= FIXED_GENOTYPE_COLUMNS.len()
        && FIXED_GENOTYPE_COLUMNS
            .iter()
            .zip(headers.iter())
            .all(|(want, got)| got.trim().eq_ignore_ascii_case(want));
    if !fixed_ok {
        return Err(LoadError::BadHeader {
            path: genotype_path.to_path_buf(),
            expected: FIXED_GENOTYPE_COLUMNS.join(", "),
        });
    }

    let mut column_of = HashMap::new();
    for (column, id) in headers.iter().enumerate().skip(FIXED_GENOTYPE_COLUMNS.len()) {
        if column_of.insert(id.to_string(), column).is_some() {
            return Err(LoadError::DuplicateSample(id.to_string()));
        }
    }

    let mut kept: Vec<(usize, String, f64)> = Vec::new();
    let mut unknown = 0usize;
    for sample in samples {
        let Some(label) = sample.affection.label() else {
            unknown += 1;
            continue;
        };
        let column = *column_of
            .get(&sample.id)
            .ok_or_else(|| LoadError::SampleWithoutGenotypes(sample.id.clone()))?;
        kept.push((column, sample.id.clone(), label));
    }
    if kept.is_empty() {
        return Err(LoadError::NoLabelledSamples);
    }
    kept.sort_by_key(|(column, _, _)| *column);
    let listed: HashSet<&str> = samples.iter().map(|s| s.id.as_str()).collect();
    let unlabelled = column_of.keys().filter(|id| !listed.contains(id.as_str())).count();
    if unknown > 0 || unlabelled > 0 {
        log::info!(
            "Excluding {unknown} samples with unknown affection and {unlabelled} genotyped samples without a label"
        );
    }

    let mut meta = Vec::new();
    let mut calls = Vec::new();
    for result in reader.records() {
        let record = result.map_err(&to_csv)?;
        let field = |i: usize| record.get(i).unwrap_or("").trim();
        let id = field(0);
        let chromosome = field(1);
        let position: u64 = field(2).parse().map_err(|_| {
            bad_record(
                genotype_path,
                &record,
                format!("marker {id}: position '{}' is not an integer", field(2)),
            )
        })?;
        for (column, sample, _) in &kept {
            let text = record.get(*column).ok_or_else(|| {
                bad_record(genotype_path, &record, format!("marker {id}: missing column for {sample}"))
            })?;
            let call = parse_call(text).ok_or_else(|| {
                bad_record(
                    genotype_path,
                    &record,
                    format!("marker {id}, sample {sample}: cannot parse call '{text}'"),
                )
            })?;
            calls.push(call);
        }
        meta.push((id.to_string(), chromosome.to_string(), position));
    }

    log::info!(
        "Loaded {} markers for {} samples from {}",
        meta.len(),
        kept.len(),
        genotype_path.display()
    );
    let n_samples = kept.len();
    let genotypes = InMemoryGenotypes::from_calls(meta, calls, n_samples)?;
    let (sample_ids, labels) = kept.into_iter().map(|(_, id, label)| (id, label)).unzip();
    Ok(LoadedCohort {
        genotypes,
        sample_ids,
        labels,
    })
}

/// Reads `marker_id -> p_value` and returns the values in `markers` order.
pub fn read_p_values(path: &Path, markers: &[MarkerRecord]) -> Result<Vec<f64>, LoadError> {
    let mut reader = tsv_reader(path)?;
    let to_csv = csv_error(path);
    let mut by_id = HashMap::new();
    for result in reader.records() {
        let record = result.map_err(&to_csv)?;
        let id = record.get(0).unwrap_or("").trim().to_string();
        let raw = record.get(1).unwrap_or("").trim();
        let p: f64 = raw
            .parse()
            .ok()
            .filter(|p: &f64| *p > 0.0 && *p <= 1.0)
            .ok_or_else(|| bad_record(path, &record, format!("marker {id}: invalid p-value '{raw}'")))?;
        by_id.insert(id, p);
    }
    markers
        .iter()
        .map(|m| {
            by_id.get(&m.id).copied().ok_or_else(|| LoadError::BadRecord {
                path: path.to_path_buf(),
                line: 0,
                message: format!("no p-value for marker {}", m.id),
            })
        })
        .collect()
}

/// Marker weights read back from a weight table, with a genotype-free source
/// carrying the marker records.
#[derive(Debug)]
pub struct LoadedWeights {
    pub markers: InMemoryGenotypes,
    pub weights: Vec<f64>,
}

/// Reads a table written by [`write_weights`]. Extra columns are ignored.
pub fn read_weights(path: &Path) -> Result<LoadedWeights, LoadError> {
    let mut reader = tsv_reader(path)?;
    let to_csv = csv_error(path);
    let headers = reader.headers().map_err(&to_csv)?.clone();
    let expected = ["marker_id", "chromosome", "position", "weight"];
    if headers.len() < expected.len()
        || !expected
            .iter()
            .zip(headers.iter())
            .all(|(want, got)| got.trim().eq_ignore_ascii_case(want))
    {
        return Err(LoadError::BadHeader {
            path: path.to_path_buf(),
            expected: expected.join(", "),
        });
    }

    let mut meta = Vec::new();
    let mut weights = Vec::new();
    for result in reader.records() {
        let record = result.map_err(&to_csv)?;
        let field = |i: usize| record.get(i).unwrap_or("").trim();
        let id = field(0);
        let position: u64 = field(2).parse().map_err(|_| {
            bad_record(path, &record, format!("marker {id}: position '{}' is not an integer", field(2)))
        })?;
        let weight: f64 = field(3)
            .parse()
            .ok()
            .filter(|w: &f64| w.is_finite())
            .ok_or_else(|| bad_record(path, &record, format!("marker {id}: invalid weight '{}'", field(3))))?;
        meta.push((id.to_string(), field(1).to_string(), position));
        weights.push(weight);
    }
    Ok(LoadedWeights {
        markers: InMemoryGenotypes::from_calls(meta, Vec::new(), 0)?,
        weights,
    })
}

#[derive(Debug, Serialize)]
struct WeightRow<'a> {
    marker_id: &'a str,
    chromosome: &'a str,
    position: u64,
    weight: f64,
    filtered_weight: f64,
}

/// Writes one row per marker with its raw and filtered weight.
pub fn write_weights<W: io::Write>(
    writer: W,
    markers: &[MarkerRecord],
    weights: &[f64],
    filtered: &[f64],
) -> Result<(), csv::Error> {
    let mut out = csv::WriterBuilder::new().delimiter(b'\t').from_writer(writer);
    for ((marker, weight), filtered_weight) in markers.iter().zip(weights).zip(filtered) {
        out.serialize(WeightRow {
            marker_id: &marker.id,
            chromosome: &marker.chromosome,
            position: marker.position,
            weight: *weight,
            filtered_weight: *filtered_weight,
        })?;
    }
    out.flush()?;
    Ok(())
}
