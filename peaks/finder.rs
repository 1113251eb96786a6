//! # Tower Selection
//!
//! Peaks are local maxima of a per-position value series. The series is extended by one
//! neighbour-valued point at each end and treated as a piecewise-linear function of
//! position. At every original position one-sided finite differences at `+-h`, with
//! `h` half the smallest adjacent spacing, give a left slope, a right slope and a
//! second-derivative estimate. A point is a candidate when the slope changes from
//! rising (or flat) to falling (or flat), the curvature is negative and the value
//! reaches the minimum height.
//!
//! Candidates are ranked by value and thinned greedily: a candidate closer than the
//! minimum distance (in position units) to an already accepted peak is dropped.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

const SLOPE_TOLERANCE: f64 = 1e-12;

#[derive(Error, Debug, PartialEq)]
pub enum PeakError {
    #[error("peak finding needs at least 3 points, got {0}")]
    TooFewPoints(usize),
    #[error("{positions} positions but {values} values")]
    LengthMismatch { positions: usize, values: usize },
    #[error("value at index {0} is not finite")]
    NonFinite(usize),
    #[error("positions must be strictly increasing; index {index} has {position} after {previous}")]
    UnsortedPositions {
        index: usize,
        position: u64,
        previous: u64,
    },
    #[error("value {value} at index {index} is negative; use double-sided mode for signed series")]
    NegativeValue { index: usize, value: f64 },
}

/// Which extremes count as peaks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeakMode {
    /// Maxima of a non-negative series; negative values are rejected.
    #[default]
    PositiveOnly,
    /// Maxima of `|value|`; reported values keep their sign.
    DoubleSided,
}

impl fmt::Display for PeakMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PositiveOnly => "positive-only",
            Self::DoubleSided => "double-sided",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PeakOptions {
    pub min_height: f64,
    pub min_distance: u64,
    pub mode: PeakMode,
}

impl Default for PeakOptions {
    fn default() -> Self {
        Self {
            min_height: 0.0,
            min_distance: 0,
            mode: PeakMode::PositiveOnly,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Peak {
    pub chromosome: String,
    /// Index into the series the peak was found in.
    pub index: usize,
    pub position: u64,
    pub value: f64,
}

/// Peaks of one chromosome's series, most significant first.
pub fn find_peaks(
    chromosome: &str,
    positions: &[u64],
    values: &[f64],
    options: &PeakOptions,
) -> Result<Vec<Peak>, PeakError> {
    let detection = validate(positions, values, options.mode)?;
    let n = detection.len();

    let min_spacing = positions
        .windows(2)
        .map(|w| (w[1] - w[0]) as f64)
        .fold(f64::INFINITY, f64::min);
    let h = min_spacing / 2.0;
    let series = Extended::new(positions, &detection);

    let mut candidates: Vec<usize> = (0..n)
        .filter(|&i| detection[i] >= options.min_height)
        .filter(|&i| {
            let x = positions[i] as f64;
            let y = detection[i];
            let left = (y - series.at(x - h)) / h;
            let right = (series.at(x + h) - y) / h;
            let curvature = (right - left) / h;
            left >= -SLOPE_TOLERANCE && right <= SLOPE_TOLERANCE && curvature < 0.0
        })
        .collect();
    candidates.sort_by(|&a, &b| detection[b].total_cmp(&detection[a]).then(a.cmp(&b)));

    let mut accepted_positions = BTreeSet::new();
    let mut peaks = Vec::new();
    for i in candidates {
        let position = positions[i];
        if options.min_distance > 0 {
            let reach = options.min_distance - 1;
            let lo = position.saturating_sub(reach);
            let hi = position.saturating_add(reach);
            if accepted_positions.range(lo..=hi).next().is_some() {
                continue;
            }
        }
        accepted_positions.insert(position);
        peaks.push(Peak {
            chromosome: chromosome.to_string(),
            index: i,
            position,
            value: values[i],
        });
    }

    log::debug!(
        "Chromosome {chromosome}: {} peaks from {n} positions",
        peaks.len()
    );
    Ok(peaks)
}

fn validate(positions: &[u64], values: &[f64], mode: PeakMode) -> Result<Vec<f64>, PeakError> {
    if positions.len() != values.len() {
        return Err(PeakError::LengthMismatch {
            positions: positions.len(),
            values: values.len(),
        });
    }
    if values.len() < 3 {
        return Err(PeakError::TooFewPoints(values.len()));
    }
    if let Some(i) = values.iter().position(|v| !v.is_finite()) {
        return Err(PeakError::NonFinite(i));
    }
    if let Some(i) = positions.windows(2).position(|w| w[1] <= w[0]) {
        return Err(PeakError::UnsortedPositions {
            index: i + 1,
            position: positions[i + 1],
            previous: positions[i],
        });
    }
    match mode {
        PeakMode::PositiveOnly => {
            if let Some((index, &value)) = values.iter().enumerate().find(|(_, v)| **v < 0.0) {
                return Err(PeakError::NegativeValue { index, value });
            }
            Ok(values.to_vec())
        }
        PeakMode::DoubleSided => Ok(values.iter().map(|v| v.abs()).collect()),
    }
}

/// Piecewise-linear interpolant over the series padded with one neighbour-valued point
/// at each end.
struct Extended {
    x: Vec<f64>,
    y: Vec<f64>,
}

impl Extended {
    fn new(positions: &[u64], values: &[f64]) -> Self {
        let n = positions.len();
        let first = positions[0] as f64;
        let last = positions[n - 1] as f64;
        let lead = positions[1] as f64 - first;
        let tail = last - positions[n - 2] as f64;

        let mut x = Vec::with_capacity(n + 2);
        x.push(first - lead);
        x.extend(positions.iter().map(|p| *p as f64));
        x.push(last + tail);

        let mut y = Vec::with_capacity(n + 2);
        y.push(values[0]);
        y.extend_from_slice(values);
        y.push(values[n - 1]);
        Self { x, y }
    }

    fn at(&self, t: f64) -> f64 {
        let upper = self.x.partition_point(|x| *x < t);
        if upper == 0 {
            return self.y[0];
        }
        if upper >= self.x.len() {
            return self.y[self.y.len() - 1];
        }
        let (x0, x1) = (self.x[upper - 1], self.x[upper]);
        let (y0, y1) = (self.y[upper - 1], self.y[upper]);
        y0 + (y1 - y0) * (t - x0) / (x1 - x0)
    }
}
