//! L2-regularised L1-loss SVC solved in the dual by coordinate descent with shrinking
//! (Hsieh et al. 2008). No bias term is learned; the model is `sign(w . x)`.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use super::params::{KernelType, SvmParameters, SvmType};
use super::problem::SparseProblem;
use super::{PrimalModel, Solver, SolverError, TrainedModel, validate_labels};

const DEFAULT_MAX_PASSES: usize = 1000;
const SHUFFLE_SEED: u64 = 0x5eed_c0b1;
const PROJECTED_GRADIENT_FLOOR: f64 = 1e-12;

#[derive(Clone, Copy, Debug, Default)]
pub struct LinearSvc;

impl Solver for LinearSvc {
    type Problem = SparseProblem;

    const SVM_TYPE: SvmType = SvmType::L2RegL1LossSvcDual;
    const KERNEL_TYPE: KernelType = KernelType::Linear;

    fn train(
        &self,
        problem: &SparseProblem,
        params: &SvmParameters,
    ) -> Result<TrainedModel, SolverError> {
        params.check(Self::SVM_TYPE, Self::KERNEL_TYPE)?;
        validate_labels(problem.labels())?;
        let max_passes = params.max_iterations.unwrap_or(DEFAULT_MAX_PASSES);
        let (weights, iterations) = solve_dual(problem, params.c, params.eps, max_passes);
        Ok(TrainedModel::Primal(PrimalModel {
            weights,
            iterations,
        }))
    }
}

fn dot(weights: &[f64], problem: &SparseProblem, i: usize) -> f64 {
    problem
        .row(i)
        .iter()
        .map(|n| weights[n.index as usize] * f64::from(n.value))
        .sum()
}

fn solve_dual(problem: &SparseProblem, c: f64, eps: f64, max_passes: usize) -> (Vec<f64>, usize) {
    let l = problem.n_samples();
    let y = problem.labels();
    let mut weights = vec![0.0; problem.n_features()];
    let mut alpha = vec![0.0; l];
    let q_diag: Vec<f64> = (0..l)
        .map(|i| {
            problem
                .row(i)
                .iter()
                .map(|n| f64::from(n.value) * f64::from(n.value))
                .sum()
        })
        .collect();

    let mut index: Vec<usize> = (0..l).collect();
    let mut active_size = l;
    let mut pg_max_old = f64::INFINITY;
    let mut pg_min_old = f64::NEG_INFINITY;
    let mut rng = StdRng::seed_from_u64(SHUFFLE_SEED);
    let mut passes = 0;

    while passes < max_passes {
        let mut pg_max_new = f64::NEG_INFINITY;
        let mut pg_min_new = f64::INFINITY;
        index[..active_size].shuffle(&mut rng);

        let mut s = 0;
        while s < active_size {
            let i = index[s];
            let yi = y[i];
            let g = yi * dot(&weights, problem, i) - 1.0;

            let mut pg = 0.0;
            if alpha[i] == 0.0 {
                if g > pg_max_old {
                    active_size -= 1;
                    index.swap(s, active_size);
                    continue;
                } else if g < 0.0 {
                    pg = g;
                }
            } else if alpha[i] == c {
                if g < pg_min_old {
                    active_size -= 1;
                    index.swap(s, active_size);
                    continue;
                } else if g > 0.0 {
                    pg = g;
                }
            } else {
                pg = g;
            }

            pg_max_new = pg_max_new.max(pg);
            pg_min_new = pg_min_new.min(pg);

            if pg.abs() > PROJECTED_GRADIENT_FLOOR {
                let old = alpha[i];
                // An all-zero row has a linear objective: jump straight to the bound.
                alpha[i] = if q_diag[i] > 0.0 {
                    (alpha[i] - g / q_diag[i]).clamp(0.0, c)
                } else if g < 0.0 {
                    c
                } else {
                    0.0
                };
                let d = (alpha[i] - old) * yi;
                for node in problem.row(i) {
                    weights[node.index as usize] += d * f64::from(node.value);
                }
            }
            s += 1;
        }

        passes += 1;

        if pg_max_new - pg_min_new <= eps {
            if active_size == l {
                break;
            }
            active_size = l;
            pg_max_old = f64::INFINITY;
            pg_min_old = f64::NEG_INFINITY;
            continue;
        }
        pg_max_old = if pg_max_new <= 0.0 { f64::INFINITY } else { pg_max_new };
        pg_min_old = if pg_min_new >= 0.0 { f64::NEG_INFINITY } else { pg_min_new };
    }

    if passes >= max_passes {
        log::warn!(
            "Dual coordinate descent reached {max_passes} passes; consider a larger eps"
        );
    } else {
        log::debug!("Dual coordinate descent converged after {passes} passes");
    }
    let support = alpha.iter().filter(|a| **a > 0.0).count();
    log::debug!("L2R-L1LOSS-SVC: {support} support vectors of {l} samples");

    (weights, passes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::svm::problem::FeatureNode;

    fn dense_rows(points: &[[f32; 2]]) -> Vec<Vec<FeatureNode>> {
        points
            .iter()
            .map(|p| {
                p.iter()
                    .enumerate()
                    .filter(|(_, v)| **v != 0.0)
                    .map(|(i, v)| FeatureNode {
                        index: i as u32,
                        value: *v,
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn separable_points_through_origin_are_classified() {
        let points = [[2.0, 2.0], [3.0, 1.0], [1.0, 3.0], [-2.0, -2.0], [-1.0, -3.0], [-3.0, 0.0]];
        let labels = [1.0, 1.0, 1.0, -1.0, -1.0, -1.0];
        let problem = SparseProblem::from_rows(dense_rows(&points), &labels, 2).unwrap();
        let TrainedModel::Primal(model) = LinearSvc
            .train(&problem, &SvmParameters::sparse_linear(1.0, 1e-6))
            .unwrap()
        else {
            panic!("linear SVC must return a primal model");
        };
        assert_eq!(model.weights.len(), 2);
        for (i, label) in labels.iter().enumerate() {
            let score = dot(&model.weights, &problem, i);
            assert!(score * label > 0.0, "sample {i} misclassified");
        }
    }

    #[test]
    fn training_is_deterministic() {
        let points = [[1.0, 0.0], [0.0, 1.0], [-1.0, 0.5], [0.3, -1.0]];
        let labels = [1.0, 1.0, -1.0, -1.0];
        let problem = SparseProblem::from_rows(dense_rows(&points), &labels, 2).unwrap();
        let params = SvmParameters::sparse_linear(1.0, 1e-7);
        let a = LinearSvc.train(&problem, &params).unwrap();
        let b = LinearSvc.train(&problem, &params).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn zero_rows_do_not_stall_training() {
        let rows = vec![vec![], vec![FeatureNode { index: 1, value: -1.0 }]];
        let problem = SparseProblem::from_rows(rows, &[1.0, -1.0], 3).unwrap();
        let TrainedModel::Primal(model) = LinearSvc
            .train(&problem, &SvmParameters::sparse_linear(1.0, 1e-6))
            .unwrap()
        else {
            panic!("expected primal model");
        };
        assert_eq!(model.weights[0], 0.0);
        assert_eq!(model.weights[2], 0.0);
        assert!(model.weights[1] > 0.0);
        assert!(model.iterations < 10);
    }

    #[test]
    fn kernel_parameters_are_rejected() {
        let problem = SparseProblem::from_rows(vec![vec![], vec![]], &[1.0, -1.0], 1).unwrap();
        assert!(matches!(
            LinearSvc.train(&problem, &SvmParameters::default()),
            Err(SolverError::UnsupportedCombination { .. })
        ));
    }
}
