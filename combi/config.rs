use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

use crate::encoding::GenotypeEncoder;
use crate::peaks::{PeakMode, PeakOptions};
use crate::svm::params::{DEFAULT_C, DEFAULT_EPS};
use crate::svm::SvmParameters;

/// Default feature-chunk budget: 256 MiB.
pub const DEFAULT_CHUNK_BUDGET_BYTES: usize = 256 * 1024 * 1024;
pub const DEFAULT_FILTER_WIDTH: usize = 35;
pub const DEFAULT_P_NORM: f64 = 2.0;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML config file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverBackend {
    /// C-SVC over the sample kernel matrix.
    PrecomputedKernel,
    /// Dual coordinate descent over sparse encoded features.
    SparseLinear,
}

impl fmt::Display for SolverBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PrecomputedKernel => "precomputed-kernel",
            Self::SparseLinear => "sparse-linear",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// One classifier per chromosome.
    PerChromosome,
    /// One classifier across every marker.
    GenomeWide,
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PerChromosome => "per-chromosome",
            Self::GenomeWide => "genome-wide",
        })
    }
}

/// Cut-off a peak must reach to be reported.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SignificanceThreshold {
    /// Minimum filtered marker weight.
    Weight(f64),
    /// Maximum p-value; requires externally supplied p-values.
    PValue(f64),
}

impl SignificanceThreshold {
    /// Minimum height on the scale peaks are detected on.
    pub fn min_height(self) -> f64 {
        match self {
            Self::Weight(w) => w,
            Self::PValue(p) => -p.log10(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CombiConfig {
    pub encoder: GenotypeEncoder,
    pub solver: SolverBackend,
    pub c: f64,
    pub eps: f64,
    /// Solver iteration cap; unset uses the backend default.
    pub max_iterations: Option<usize>,
    pub mode: AnalysisMode,
    pub chunk_budget_bytes: usize,
    pub filter_width: usize,
    pub p_norm: f64,
    pub absolute_filter: bool,
    pub min_peak_distance: u64,
    pub peak_mode: PeakMode,
    pub threshold: SignificanceThreshold,
}

impl Default for CombiConfig {
    fn default() -> Self {
        Self {
            encoder: GenotypeEncoder::Genotypic,
            solver: SolverBackend::PrecomputedKernel,
            c: DEFAULT_C,
            eps: DEFAULT_EPS,
            max_iterations: None,
            mode: AnalysisMode::PerChromosome,
            chunk_budget_bytes: DEFAULT_CHUNK_BUDGET_BYTES,
            filter_width: DEFAULT_FILTER_WIDTH,
            p_norm: DEFAULT_P_NORM,
            absolute_filter: true,
            min_peak_distance: 0,
            peak_mode: PeakMode::PositiveOnly,
            threshold: SignificanceThreshold::Weight(0.0),
        }
    }
}

impl CombiConfig {
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = fs::File::create(path)?;
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&toml_string)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if !(self.c.is_finite() && self.c > 0.0) {
            return invalid(format!("c must be positive, got {}", self.c));
        }
        if !(self.eps.is_finite() && self.eps > 0.0) {
            return invalid(format!("eps must be positive, got {}", self.eps));
        }
        if self.max_iterations == Some(0) {
            return invalid("max_iterations must be at least 1".into());
        }
        if self.chunk_budget_bytes == 0 {
            return invalid("chunk_budget_bytes must be positive".into());
        }
        if self.filter_width == 0 || self.filter_width % 2 == 0 {
            return invalid(format!(
                "filter_width must be odd and positive, got {}",
                self.filter_width
            ));
        }
        if !(self.p_norm.is_finite() && self.p_norm > 0.0) {
            return invalid(format!("p_norm must be positive, got {}", self.p_norm));
        }
        match self.threshold {
            SignificanceThreshold::Weight(w) if !(w.is_finite() && w >= 0.0) => {
                invalid(format!("weight threshold must be non-negative, got {w}"))
            }
            SignificanceThreshold::PValue(p) if !(p > 0.0 && p <= 1.0) => {
                invalid(format!("p-value threshold must lie in (0, 1], got {p}"))
            }
            _ => Ok(()),
        }
    }

    pub fn svm_parameters(&self) -> SvmParameters {
        let mut params = match self.solver {
            SolverBackend::PrecomputedKernel => SvmParameters::precomputed_kernel(self.c, self.eps),
            SolverBackend::SparseLinear => SvmParameters::sparse_linear(self.c, self.eps),
        };
        params.max_iterations = self.max_iterations;
        params
    }

    pub fn peak_options(&self) -> PeakOptions {
        PeakOptions {
            min_height: self.threshold.min_height(),
            min_distance: self.min_peak_distance,
            mode: self.peak_mode,
        }
    }
}
