//! Solver parameters shared by both backends.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::SolverError;

/// Default regularisation constant.
pub const DEFAULT_C: f64 = 1.0;
/// Default stopping tolerance.
pub const DEFAULT_EPS: f64 = 1e-7;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SvmType {
    /// C-support-vector classification.
    CSvc,
    /// L2-regularised L1-loss support vector classification, dual form.
    L2RegL1LossSvcDual,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelType {
    Precomputed,
    Linear,
}

impl fmt::Display for SvmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CSvc => "C-SVC",
            Self::L2RegL1LossSvcDual => "L2R-L1LOSS-SVC-DUAL",
        })
    }
}

impl fmt::Display for KernelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Precomputed => "precomputed",
            Self::Linear => "linear",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SvmParameters {
    pub svm_type: SvmType,
    pub kernel_type: KernelType,
    pub c: f64,
    pub eps: f64,
    /// Iteration cap; `None` uses the backend's own default.
    pub max_iterations: Option<usize>,
}

impl SvmParameters {
    pub fn precomputed_kernel(c: f64, eps: f64) -> Self {
        Self {
            svm_type: SvmType::CSvc,
            kernel_type: KernelType::Precomputed,
            c,
            eps,
            max_iterations: None,
        }
    }

    pub fn sparse_linear(c: f64, eps: f64) -> Self {
        Self {
            svm_type: SvmType::L2RegL1LossSvcDual,
            kernel_type: KernelType::Linear,
            c,
            eps,
            max_iterations: None,
        }
    }

    /// Rejects parameter sets a backend expecting `(svm_type, kernel_type)` cannot run.
    pub fn check(&self, svm_type: SvmType, kernel_type: KernelType) -> Result<(), SolverError> {
        if self.svm_type != svm_type || self.kernel_type != kernel_type {
            return Err(SolverError::UnsupportedCombination {
                svm_type: self.svm_type,
                kernel_type: self.kernel_type,
                expected_svm: svm_type,
                expected_kernel: kernel_type,
            });
        }
        if !(self.c.is_finite() && self.c > 0.0) {
            return Err(SolverError::InvalidParameter(format!(
                "C must be positive and finite, got {}",
                self.c
            )));
        }
        if !(self.eps.is_finite() && self.eps > 0.0) {
            return Err(SolverError::InvalidParameter(format!(
                "eps must be positive and finite, got {}",
                self.eps
            )));
        }
        if self.max_iterations == Some(0) {
            return Err(SolverError::InvalidParameter(
                "max_iterations must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SvmParameters {
    fn default() -> Self {
        Self::precomputed_kernel(DEFAULT_C, DEFAULT_EPS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_pairs_are_rejected() {
        let params = SvmParameters::precomputed_kernel(1.0, 1e-3);
        assert!(params.check(SvmType::CSvc, KernelType::Precomputed).is_ok());
        let err = params
            .check(SvmType::L2RegL1LossSvcDual, KernelType::Linear)
            .unwrap_err();
        assert!(matches!(err, SolverError::UnsupportedCombination { .. }));
        assert!(err.to_string().contains("C-SVC"));

        let mixed = SvmParameters {
            kernel_type: KernelType::Linear,
            ..SvmParameters::precomputed_kernel(1.0, 1e-3)
        };
        assert!(mixed.check(SvmType::CSvc, KernelType::Precomputed).is_err());
    }

    #[test]
    fn non_positive_constants_are_rejected() {
        for (c, eps) in [(0.0, 1e-3), (-1.0, 1e-3), (1.0, 0.0), (f64::NAN, 1e-3)] {
            let params = SvmParameters::sparse_linear(c, eps);
            assert!(matches!(
                params.check(SvmType::L2RegL1LossSvcDual, KernelType::Linear),
                Err(SolverError::InvalidParameter(_))
            ));
        }
    }
}
