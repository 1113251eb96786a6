//! C-SVC over a precomputed kernel via sequential minimal optimisation.
//!
//! Working-set selection uses second-order information (Fan, Chen & Lin 2005). The
//! kernel is read exclusively through [`PrecomputedProblem::kernel_value`], and no
//! kernel cache is kept: each Q row is derived from the stored kernel on demand.

use super::params::{KernelType, SvmParameters, SvmType};
use super::problem::PrecomputedProblem;
use super::{DualModel, Solver, SolverError, TrainedModel, validate_labels};

const TAU: f64 = 1e-12;
const MIN_DEFAULT_ITERATIONS: usize = 10_000_000;

#[derive(Clone, Copy, Debug, Default)]
pub struct KernelSvc;

impl Solver for KernelSvc {
    type Problem = PrecomputedProblem;

    const SVM_TYPE: SvmType = SvmType::CSvc;
    const KERNEL_TYPE: KernelType = KernelType::Precomputed;

    fn train(
        &self,
        problem: &PrecomputedProblem,
        params: &SvmParameters,
    ) -> Result<TrainedModel, SolverError> {
        params.check(Self::SVM_TYPE, Self::KERNEL_TYPE)?;
        validate_labels(problem.labels())?;
        let max_iterations = params
            .max_iterations
            .unwrap_or_else(|| MIN_DEFAULT_ITERATIONS.max(problem.n_samples().saturating_mul(100)));
        let mut smo = Smo::new(problem, params.c);
        let iterations = smo.solve(params.eps, max_iterations);
        Ok(TrainedModel::Dual(smo.into_model(iterations)))
    }
}

struct Smo<'a> {
    problem: &'a PrecomputedProblem,
    y: &'a [f64],
    c: f64,
    alpha: Vec<f64>,
    gradient: Vec<f64>,
    q_diag: Vec<f64>,
    q_i: Vec<f64>,
    q_j: Vec<f64>,
}

impl<'a> Smo<'a> {
    fn new(problem: &'a PrecomputedProblem, c: f64) -> Self {
        let n = problem.n_samples();
        Self {
            problem,
            y: problem.labels(),
            c,
            alpha: vec![0.0; n],
            // Linear term p = -1 with alpha = 0.
            gradient: vec![-1.0; n],
            q_diag: (0..n).map(|i| problem.kernel_value(i, i)).collect(),
            q_i: vec![0.0; n],
            q_j: vec![0.0; n],
        }
    }

    #[inline]
    fn is_upper_bound(&self, i: usize) -> bool {
        self.alpha[i] >= self.c
    }

    #[inline]
    fn is_lower_bound(&self, i: usize) -> bool {
        self.alpha[i] <= 0.0
    }

    #[inline]
    fn q(&self, i: usize, j: usize) -> f64 {
        self.y[i] * self.y[j] * self.problem.kernel_value(i, j)
    }

    fn fill_q_row(&self, i: usize, out: &mut [f64]) {
        for (j, value) in out.iter_mut().enumerate() {
            *value = self.q(i, j);
        }
    }

    fn solve(&mut self, eps: f64, max_iterations: usize) -> usize {
        let n = self.alpha.len();
        let mut iterations = 0;
        while iterations < max_iterations {
            let Some((i, j)) = self.select_working_set(eps) else {
                break;
            };
            iterations += 1;

            let mut q_i = std::mem::take(&mut self.q_i);
            let mut q_j = std::mem::take(&mut self.q_j);
            self.fill_q_row(i, &mut q_i);
            self.fill_q_row(j, &mut q_j);

            let old_alpha_i = self.alpha[i];
            let old_alpha_j = self.alpha[j];
            self.update_pair(i, j, q_i[j]);

            let delta_i = self.alpha[i] - old_alpha_i;
            let delta_j = self.alpha[j] - old_alpha_j;
            for k in 0..n {
                self.gradient[k] += q_i[k] * delta_i + q_j[k] * delta_j;
            }
            self.q_i = q_i;
            self.q_j = q_j;
        }

        if iterations >= max_iterations {
            log::warn!(
                "SMO reached the iteration limit ({max_iterations}); the solution may be inaccurate"
            );
        } else {
            log::debug!("SMO converged after {iterations} iterations");
        }
        iterations
    }

    /// Returns `None` once the maximal violating pair is within `eps`.
    fn select_working_set(&self, eps: f64) -> Option<(usize, usize)> {
        let n = self.alpha.len();
        let mut g_max = f64::NEG_INFINITY;
        let mut g_max2 = f64::NEG_INFINITY;
        let mut i_sel = None;

        for t in 0..n {
            if self.y[t] > 0.0 {
                if !self.is_upper_bound(t) && -self.gradient[t] >= g_max {
                    g_max = -self.gradient[t];
                    i_sel = Some(t);
                }
            } else if !self.is_lower_bound(t) && self.gradient[t] >= g_max {
                g_max = self.gradient[t];
                i_sel = Some(t);
            }
        }

        let mut j_sel = None;
        let mut obj_diff_min = f64::INFINITY;
        for j in 0..n {
            if self.y[j] > 0.0 {
                if self.is_lower_bound(j) {
                    continue;
                }
                let grad_diff = g_max + self.gradient[j];
                if self.gradient[j] >= g_max2 {
                    g_max2 = self.gradient[j];
                }
                if grad_diff > 0.0 {
                    if let Some(i) = i_sel {
                        let quad = self.q_diag[i] + self.q_diag[j] - 2.0 * self.y[i] * self.q(i, j);
                        let obj_diff = -(grad_diff * grad_diff) / if quad > 0.0 { quad } else { TAU };
                        if obj_diff <= obj_diff_min {
                            j_sel = Some(j);
                            obj_diff_min = obj_diff;
                        }
                    }
                }
            } else {
                if self.is_upper_bound(j) {
                    continue;
                }
                let grad_diff = g_max - self.gradient[j];
                if -self.gradient[j] >= g_max2 {
                    g_max2 = -self.gradient[j];
                }
                if grad_diff > 0.0 {
                    if let Some(i) = i_sel {
                        let quad = self.q_diag[i] + self.q_diag[j] + 2.0 * self.y[i] * self.q(i, j);
                        let obj_diff = -(grad_diff * grad_diff) / if quad > 0.0 { quad } else { TAU };
                        if obj_diff <= obj_diff_min {
                            j_sel = Some(j);
                            obj_diff_min = obj_diff;
                        }
                    }
                }
            }
        }

        if g_max + g_max2 < eps {
            return None;
        }
        Some((i_sel?, j_sel?))
    }

    /// Two-variable analytic update with box clipping; `q_ij` is `Q(i, j)`.
    fn update_pair(&mut self, i: usize, j: usize, q_ij: f64) {
        let c = self.c;
        let g_i = self.gradient[i];
        let g_j = self.gradient[j];

        if self.y[i] != self.y[j] {
            let mut quad = self.q_diag[i] + self.q_diag[j] + 2.0 * q_ij;
            if quad <= 0.0 {
                quad = TAU;
            }
            let delta = (-g_i - g_j) / quad;
            let diff = self.alpha[i] - self.alpha[j];
            self.alpha[i] += delta;
            self.alpha[j] += delta;

            if diff > 0.0 {
                if self.alpha[j] < 0.0 {
                    self.alpha[j] = 0.0;
                    self.alpha[i] = diff;
                }
            } else if self.alpha[i] < 0.0 {
                self.alpha[i] = 0.0;
                self.alpha[j] = -diff;
            }
            // Equal bounds for both classes, so C_i - C_j is zero.
            if diff > 0.0 {
                if self.alpha[i] > c {
                    self.alpha[i] = c;
                    self.alpha[j] = c - diff;
                }
            } else if self.alpha[j] > c {
                self.alpha[j] = c;
                self.alpha[i] = c + diff;
            }
        } else {
            let mut quad = self.q_diag[i] + self.q_diag[j] - 2.0 * q_ij;
            if quad <= 0.0 {
                quad = TAU;
            }
            let delta = (g_i - g_j) / quad;
            let sum = self.alpha[i] + self.alpha[j];
            self.alpha[i] -= delta;
            self.alpha[j] += delta;

            if sum > c {
                if self.alpha[i] > c {
                    self.alpha[i] = c;
                    self.alpha[j] = sum - c;
                }
            } else if self.alpha[j] < 0.0 {
                self.alpha[j] = 0.0;
                self.alpha[i] = sum;
            }
            if sum > c {
                if self.alpha[j] > c {
                    self.alpha[j] = c;
                    self.alpha[i] = sum - c;
                }
            } else if self.alpha[i] < 0.0 {
                self.alpha[i] = 0.0;
                self.alpha[j] = sum;
            }
        }
    }

    /// Offset `rho` from free support vectors, or the midpoint of the feasible interval.
    fn rho(&self) -> f64 {
        let mut upper = f64::INFINITY;
        let mut lower = f64::NEG_INFINITY;
        let mut free = 0usize;
        let mut free_sum = 0.0;
        for i in 0..self.alpha.len() {
            let yg = self.y[i] * self.gradient[i];
            if self.is_upper_bound(i) {
                if self.y[i] < 0.0 {
                    upper = upper.min(yg);
                } else {
                    lower = lower.max(yg);
                }
            } else if self.is_lower_bound(i) {
                if self.y[i] > 0.0 {
                    upper = upper.min(yg);
                } else {
                    lower = lower.max(yg);
                }
            } else {
                free += 1;
                free_sum += yg;
            }
        }
        if free > 0 {
            free_sum / free as f64
        } else {
            (upper + lower) / 2.0
        }
    }

    fn into_model(self, iterations: usize) -> DualModel {
        let bias = -self.rho();
        let coefficients: Vec<(usize, f64)> = self
            .alpha
            .iter()
            .enumerate()
            .filter(|(_, a)| **a > 0.0)
            .map(|(i, a)| (i, self.y[i] * a))
            .collect();
        log::debug!(
            "C-SVC: {} support vectors of {} samples, bias {bias:.6}",
            coefficients.len(),
            self.alpha.len()
        );
        DualModel {
            coefficients,
            bias,
            iterations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};

    fn linear_kernel(points: &Array2<f64>) -> Array2<f64> {
        points.dot(&points.t())
    }

    fn decision(problem: &PrecomputedProblem, model: &DualModel, sample: usize) -> f64 {
        model
            .coefficients
            .iter()
            .map(|(sv, coef)| coef * problem.kernel_value(*sv, sample))
            .sum::<f64>()
            + model.bias
    }

    #[test]
    fn separable_points_are_classified() {
        let points = array![
            [2.0, 2.0],
            [3.0, 1.0],
            [2.0, 3.0],
            [-2.0, -2.0],
            [-3.0, -1.0],
            [-1.0, -3.0]
        ];
        let labels = [1.0, 1.0, 1.0, -1.0, -1.0, -1.0];
        let kernel = linear_kernel(&points);
        let problem = PrecomputedProblem::from_kernel(kernel.view(), &labels, None).unwrap();
        let params = SvmParameters::precomputed_kernel(10.0, 1e-7);

        let TrainedModel::Dual(model) = KernelSvc.train(&problem, &params).unwrap() else {
            panic!("C-SVC must return a dual model");
        };
        assert!(!model.coefficients.is_empty());
        for (i, label) in labels.iter().enumerate() {
            assert!(decision(&problem, &model, i) * label > 0.0, "sample {i} misclassified");
        }
        // Equality constraint: sum of y * alpha is zero.
        let total: f64 = model.coefficients.iter().map(|(_, c)| c).sum();
        assert_abs_diff_eq!(total, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn symmetric_problem_has_margin_at_support_vectors() {
        // Two points on a line: the max-margin boundary is the origin.
        let points = array![[1.0], [-1.0]];
        let kernel = linear_kernel(&points);
        let problem = PrecomputedProblem::from_kernel(kernel.view(), &[1.0, -1.0], None).unwrap();
        let TrainedModel::Dual(model) = KernelSvc
            .train(&problem, &SvmParameters::precomputed_kernel(100.0, 1e-9))
            .unwrap()
        else {
            panic!("expected dual model");
        };
        assert_abs_diff_eq!(model.bias, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(decision(&problem, &model, 0), 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(decision(&problem, &model, 1), -1.0, epsilon = 1e-9);
    }

    #[test]
    fn coefficients_respect_box_constraint() {
        // Overlapping classes force some alphas to the bound.
        let points = array![[1.0, 0.0], [0.9, 0.1], [1.0, 0.1], [0.95, 0.05]];
        let labels = [1.0, -1.0, -1.0, 1.0];
        let kernel = linear_kernel(&points);
        let problem = PrecomputedProblem::from_kernel(kernel.view(), &labels, None).unwrap();
        let c = 0.5;
        let TrainedModel::Dual(model) = KernelSvc
            .train(&problem, &SvmParameters::precomputed_kernel(c, 1e-6))
            .unwrap()
        else {
            panic!("expected dual model");
        };
        for (_, coef) in &model.coefficients {
            assert!(coef.abs() <= c + 1e-12);
        }
    }

    #[test]
    fn wrong_parameter_pair_is_rejected() {
        let kernel = Array2::<f64>::eye(2);
        let problem = PrecomputedProblem::from_kernel(kernel.view(), &[1.0, -1.0], None).unwrap();
        let err = KernelSvc
            .train(&problem, &SvmParameters::sparse_linear(1.0, 1e-3))
            .unwrap_err();
        assert!(matches!(err, SolverError::UnsupportedCombination { .. }));
    }

    #[test]
    fn single_class_labels_are_rejected() {
        let kernel = Array2::<f64>::eye(2);
        let problem = PrecomputedProblem::from_kernel(kernel.view(), &[1.0, 1.0], None).unwrap();
        assert!(matches!(
            KernelSvc.train(&problem, &SvmParameters::default()),
            Err(SolverError::SingleClass { .. })
        ));
    }
}
