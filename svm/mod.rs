//! # Classifier Backends
//!
//! Two interchangeable solvers behind one [`Solver`] contract:
//!
//! - [`KernelSvc`]: C-support-vector classification over a precomputed kernel, solved
//!   with SMO and second-order working-set selection. Produces dual coefficients.
//! - [`LinearSvc`]: L2-regularised L1-loss classification over sparse encoded features,
//!   solved by dual coordinate descent. Produces primal feature weights directly.
//!
//! Each backend accepts exactly one `(SvmType, KernelType)` pair; anything else is
//! rejected before training starts.

pub mod kernel_svc;
pub mod linear_svc;
pub mod params;
pub mod problem;

pub use kernel_svc::KernelSvc;
pub use linear_svc::LinearSvc;
pub use params::{KernelType, SvmParameters, SvmType};
pub use problem::{FeatureNode, PrecomputedProblem, SparseProblem, SvmNode};

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum SolverError {
    #[error(
        "unsupported solver configuration {svm_type}/{kernel_type}; this backend only runs {expected_svm}/{expected_kernel}"
    )]
    UnsupportedCombination {
        svm_type: SvmType,
        kernel_type: KernelType,
        expected_svm: SvmType,
        expected_kernel: KernelType,
    },
    #[error("invalid solver parameter: {0}")]
    InvalidParameter(String),
    #[error("cannot train on an empty problem")]
    EmptyProblem,
    #[error("label {value} at sample {index} is not +1 or -1")]
    InvalidLabel { index: usize, value: f64 },
    #[error("all {count} labels belong to one class ({label}); training needs cases and controls")]
    SingleClass { label: f64, count: usize },
}

/// Dual solution: `coefficients` pairs a 0-based sample index with `y * alpha` for every
/// support vector. The decision function is `sum coef * K(sv, x) + bias`.
#[derive(Clone, Debug, PartialEq)]
pub struct DualModel {
    pub coefficients: Vec<(usize, f64)>,
    pub bias: f64,
    pub iterations: usize,
}

/// Primal solution: one weight per encoded feature column.
#[derive(Clone, Debug, PartialEq)]
pub struct PrimalModel {
    pub weights: Vec<f64>,
    pub iterations: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TrainedModel {
    Dual(DualModel),
    Primal(PrimalModel),
}

impl TrainedModel {
    pub fn iterations(&self) -> usize {
        match self {
            Self::Dual(m) => m.iterations,
            Self::Primal(m) => m.iterations,
        }
    }
}

/// A binary classifier trainer.
pub trait Solver {
    type Problem;

    const SVM_TYPE: SvmType;
    const KERNEL_TYPE: KernelType;

    fn train(
        &self,
        problem: &Self::Problem,
        params: &SvmParameters,
    ) -> Result<TrainedModel, SolverError>;
}

/// Labels must be exactly +1/-1 with both classes present.
pub fn validate_labels(labels: &[f64]) -> Result<(), SolverError> {
    if labels.is_empty() {
        return Err(SolverError::EmptyProblem);
    }
    if let Some((index, &value)) = labels
        .iter()
        .enumerate()
        .find(|(_, v)| **v != 1.0 && **v != -1.0)
    {
        return Err(SolverError::InvalidLabel { index, value });
    }
    let first = labels[0];
    if labels.iter().all(|v| *v == first) {
        return Err(SolverError::SingleClass {
            label: first,
            count: labels.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_validated() {
        assert!(validate_labels(&[1.0, -1.0, 1.0]).is_ok());
        assert_eq!(validate_labels(&[]), Err(SolverError::EmptyProblem));
        assert_eq!(
            validate_labels(&[1.0, 0.0]),
            Err(SolverError::InvalidLabel { index: 1, value: 0.0 })
        );
        assert_eq!(
            validate_labels(&[-1.0, -1.0]),
            Err(SolverError::SingleClass { label: -1.0, count: 2 })
        );
    }
}
