//! Solvers for the small constrained subproblems embedded in the algorithms.
//!
//! [Opdyts](crate::algo::opdyts) solves two nonlinear programs in every round:
//! the selection of a probability distribution over the candidates and the
//! adaptation of its trade-off weights.
//!
//! The adaptation problem is a smooth least-squares fit over a box, which is
//! solved by the projected gradient method with backtracking line search
//! ([`ProjectedGradient`]). The selection problem contains the norm of a
//! weighted sum of vectors, which is not differentiable where the sum
//! vanishes. Symmetric candidates produce exactly such points, so the
//! selection is solved by the derivative-free [`Cobyla`] under linear
//! constraints instead.
//!
//! # References
//!
//! \[1\] [Numerical Optimization](https://link.springer.com/book/10.1007/978-0-387-40065-5)
//!
//! \[2\] [A Direct Search Optimization Method That Models the Objective and
//! Constraint Functions by Linear Interpolation](https://doi.org/10.1007/978-94-015-8330-5_4)
//!
//! \[3\] [Projection onto the probability simplex: An efficient algorithm with
//! a simple proof, and an application](https://arxiv.org/abs/1309.1541)

use getset::{CopyGetters, Setters};
use nalgebra::DVector;
use thiserror::Error;

/// A smooth objective over a convex feasible set.
pub trait Subproblem {
    /// Objective value at `x`.
    fn objective(&self, x: &DVector<f64>) -> f64;

    /// Gradient of the objective at `x`.
    fn gradient(&self, x: &DVector<f64>, grad: &mut DVector<f64>);

    /// Projects `x` onto the feasible set.
    fn project(&self, x: &mut DVector<f64>);
}

/// Options for [`ProjectedGradient`].
#[derive(Debug, Clone, CopyGetters, Setters)]
#[getset(get_copy = "pub", set = "pub")]
pub struct ProjectedGradientOptions {
    /// Maximum number of iterations before the solver gives up.
    max_iters: usize,
    /// Relative tolerance on the decrease of the objective.
    ftol: f64,
    /// Sufficient decrease parameter of the Armijo condition.
    armijo: f64,
    /// Upper bound for the step length.
    max_step: f64,
}

impl Default for ProjectedGradientOptions {
    fn default() -> Self {
        Self {
            max_iters: 10_000,
            ftol: 1e-8,
            armijo: 1e-4,
            max_step: 1e6,
        }
    }
}

/// Error returned from [`ProjectedGradient`] and [`Cobyla`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubsolverError {
    /// The objective or its gradient is not finite.
    #[error("objective or gradient is not finite")]
    InvalidValue,
    /// The solver did not converge within the limit of iterations or
    /// evaluations.
    #[error("no convergence within {0} steps")]
    NotConverged(usize),
    /// The line search found no decrease at a point that is not stationary.
    #[error("line search failed at a non-stationary point (residual {0:e})")]
    LineSearch(f64),
    /// COBYLA stopped without convergence.
    #[error("COBYLA failed: {0}")]
    Cobyla(String),
}

/// Projected gradient method. See [module](self) documentation for more
/// details.
#[derive(Debug, Clone, Default)]
pub struct ProjectedGradient {
    options: ProjectedGradientOptions,
}

impl ProjectedGradient {
    /// Initializes the solver with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Initializes the solver with given options.
    pub fn with_options(options: ProjectedGradientOptions) -> Self {
        Self { options }
    }

    /// Minimizes the subproblem starting from `x`.
    ///
    /// The returned point is feasible.
    pub fn minimize<P: Subproblem>(
        &self,
        problem: &P,
        mut x: DVector<f64>,
    ) -> Result<DVector<f64>, SubsolverError> {
        let ProjectedGradientOptions {
            max_iters,
            ftol,
            armijo,
            max_step,
        } = self.options;

        problem.project(&mut x);

        let mut fx = problem.objective(&x);
        if !fx.is_finite() {
            return Err(SubsolverError::InvalidValue);
        }

        let mut grad = DVector::zeros(x.nrows());
        let mut t = 1.0;

        for _ in 0..max_iters {
            problem.gradient(&x, &mut grad);
            if grad.iter().any(|g| !g.is_finite()) {
                return Err(SubsolverError::InvalidValue);
            }

            t = f64::min(2.0 * t, max_step);

            // Backtracking until the projected step decreases the objective
            // sufficiently.
            let (y, fy, dist) = loop {
                let mut y = &x - &grad * t;
                problem.project(&mut y);

                let dist = (&y - &x).norm_squared();
                let fy = problem.objective(&y);

                if fy.is_finite() && fy <= fx - armijo * dist / t {
                    break (y, fy, dist);
                }

                t *= 0.5;

                if t < 1e-30 {
                    // Only a stationary point may lack a feasible descent.
                    let residual = stationarity(problem, &x, &grad);
                    return if residual <= STATIONARITY_TOL * (1.0 + x.norm()) {
                        Ok(x)
                    } else {
                        Err(SubsolverError::LineSearch(residual))
                    };
                }
            };

            if dist <= 1e-24 || (fx - fy).abs() <= ftol * (1.0 + fx.abs()) {
                return Ok(y);
            }

            x = y;
            fx = fy;
        }

        Err(SubsolverError::NotConverged(max_iters))
    }
}

const STATIONARITY_TOL: f64 = 1e-6;

/// Norm of the projected gradient step `x - P(x - grad)`, which vanishes
/// exactly at the stationary points.
fn stationarity<P: Subproblem>(problem: &P, x: &DVector<f64>, grad: &DVector<f64>) -> f64 {
    let mut y = x - grad;
    problem.project(&mut y);
    (x - y).norm()
}

/// Options for [`Cobyla`].
#[derive(Debug, Clone, CopyGetters, Setters)]
#[getset(get_copy = "pub", set = "pub")]
pub struct CobylaOptions {
    /// Maximum number of objective evaluations.
    max_evals: usize,
    /// Initial size of the trust region.
    initial_step: f64,
    /// Relative tolerance on the parameters, which determines the final size
    /// of the trust region.
    xtol: f64,
}

impl Default for CobylaOptions {
    fn default() -> Self {
        Self {
            max_evals: 20_000,
            initial_step: 0.5,
            xtol: 1e-9,
        }
    }
}

/// Constrained optimization by linear approximations.
///
/// A thin layer over the [`cobyla`] crate that turns its statuses into
/// [`SubsolverError`]. Running out of evaluations is an error, not a result.
#[derive(Debug, Clone, Default)]
pub struct Cobyla {
    options: CobylaOptions,
}

impl Cobyla {
    /// Initializes the solver with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Initializes the solver with given options.
    pub fn with_options(options: CobylaOptions) -> Self {
        Self { options }
    }

    /// Minimizes `objective` within `bounds` subject to `constraints`, each
    /// of which is satisfied where it is nonnegative.
    pub fn minimize<F: cobyla::Func<()>>(
        &self,
        objective: F,
        constraints: &[&dyn cobyla::Func<()>],
        x: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<Vec<f64>, SubsolverError> {
        let CobylaOptions {
            max_evals,
            initial_step,
            xtol,
        } = self.options;

        match cobyla::minimize(
            objective,
            x,
            bounds,
            constraints,
            (),
            max_evals,
            cobyla::RhoBeg::All(initial_step),
            Some(cobyla::StopTols {
                xtol_rel: xtol,
                ..cobyla::StopTols::default()
            }),
        ) {
            Ok((cobyla::SuccessStatus::MaxEvalReached, _, _)) => {
                Err(SubsolverError::NotConverged(max_evals))
            }
            Ok((_, x, fx)) if fx.is_finite() => Ok(x),
            Ok(_) => Err(SubsolverError::InvalidValue),
            Err((status, _, _)) => Err(SubsolverError::Cobyla(format!("{:?}", status))),
        }
    }
}

/// Euclidean projection onto the probability simplex `{ x : x >= 0, sum(x) = 1 }`.
pub fn project_onto_simplex(x: &mut DVector<f64>) {
    let n = x.nrows();

    let mut sorted = x.iter().copied().collect::<Vec<_>>();
    sorted.sort_unstable_by(|a, b| b.total_cmp(a));

    let mut cumsum = 0.0;
    let mut theta = 0.0;

    for (i, value) in sorted.iter().enumerate() {
        cumsum += value;
        let candidate = (cumsum - 1.0) / (i + 1) as f64;

        if value - candidate > 0.0 {
            theta = candidate;
        }
    }

    x.iter_mut().for_each(|xi| *xi = (*xi - theta).max(0.0));

    // Rounding can leave the sum slightly off.
    let sum = x.sum();
    if sum > 0.0 {
        *x /= sum;
    } else {
        x.fill(1.0 / n as f64);
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use nalgebra::dvector;

    use super::*;
    use crate::core::Domain;

    struct Quadratic {
        center: DVector<f64>,
        dom: Domain,
    }

    impl Subproblem for Quadratic {
        fn objective(&self, x: &DVector<f64>) -> f64 {
            (x - &self.center).norm_squared()
        }

        fn gradient(&self, x: &DVector<f64>, grad: &mut DVector<f64>) {
            grad.copy_from(&((x - &self.center) * 2.0));
        }

        fn project(&self, x: &mut DVector<f64>) {
            self.dom.project(x);
        }
    }

    /// Decreasing without bound.
    struct Linear;

    impl Subproblem for Linear {
        fn objective(&self, x: &DVector<f64>) -> f64 {
            -x[0]
        }

        fn gradient(&self, _: &DVector<f64>, grad: &mut DVector<f64>) {
            grad[0] = -1.0;
        }

        fn project(&self, _: &mut DVector<f64>) {}
    }

    struct NotANumber;

    impl Subproblem for NotANumber {
        fn objective(&self, _: &DVector<f64>) -> f64 {
            f64::NAN
        }

        fn gradient(&self, _: &DVector<f64>, grad: &mut DVector<f64>) {
            grad.fill(f64::NAN);
        }

        fn project(&self, _: &mut DVector<f64>) {}
    }

    /// Reports the gradient with a wrong sign.
    struct Inconsistent;

    impl Subproblem for Inconsistent {
        fn objective(&self, x: &DVector<f64>) -> f64 {
            x[0]
        }

        fn gradient(&self, _: &DVector<f64>, grad: &mut DVector<f64>) {
            grad[0] = -1.0;
        }

        fn project(&self, x: &mut DVector<f64>) {
            x[0] = x[0].clamp(0.0, 1.0);
        }
    }

    #[test]
    fn simplex_projection() {
        let mut x = dvector![0.5, 0.5, 0.5];
        project_onto_simplex(&mut x);
        assert_abs_diff_eq!(x, dvector![1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0], epsilon = 1e-12);

        let mut x = dvector![2.0, 0.0, -1.0];
        project_onto_simplex(&mut x);
        assert_abs_diff_eq!(x, dvector![1.0, 0.0, 0.0], epsilon = 1e-12);

        let mut x = dvector![0.3, 0.7];
        project_onto_simplex(&mut x);
        assert_abs_diff_eq!(x, dvector![0.3, 0.7], epsilon = 1e-12);

        let mut x = dvector![0.9, 0.6, -5.0];
        project_onto_simplex(&mut x);
        assert_abs_diff_eq!(x, dvector![0.65, 0.35, 0.0], epsilon = 1e-12);
    }

    #[test]
    fn box_constrained_minimum() {
        let problem = Quadratic {
            center: dvector![2.0, -0.5, 0.25],
            dom: [(0.0, 1.0), (0.0, 1.0), (0.0, 1.0)].into_iter().collect(),
        };

        let x = ProjectedGradient::new()
            .minimize(&problem, dvector![0.0, 0.0, 0.0])
            .unwrap();

        assert_abs_diff_eq!(x, dvector![1.0, 0.0, 0.25], epsilon = 1e-6);
    }

    #[test]
    fn failures_are_reported() {
        let mut options = ProjectedGradientOptions::default();
        options.set_max_iters(50);
        let solver = ProjectedGradient::with_options(options);

        assert_eq!(
            solver.minimize(&Linear, dvector![0.0]),
            Err(SubsolverError::NotConverged(50))
        );
        assert_eq!(
            solver.minimize(&NotANumber, dvector![0.0]),
            Err(SubsolverError::InvalidValue)
        );
        assert!(matches!(
            solver.minimize(&Inconsistent, dvector![0.5]),
            Err(SubsolverError::LineSearch(residual)) if residual > 0.4
        ));
    }

    #[test]
    fn stationary_corner_is_accepted() {
        // The minimum of x0 + x1 over the unit box lies in a corner where the
        // gradient does not vanish.
        let problem = Quadratic {
            center: dvector![-1.0, -1.0],
            dom: [(0.0, 1.0), (0.0, 1.0)].into_iter().collect(),
        };

        let x = ProjectedGradient::new()
            .minimize(&problem, dvector![1.0, 1.0])
            .unwrap();

        assert_abs_diff_eq!(x, dvector![0.0, 0.0], epsilon = 1e-9);
    }

    #[test]
    fn cobyla_linear_constraints() {
        // Closest point to (1, 2) on the segment x0 + x1 = 1 within the unit
        // box.
        let objective = |x: &[f64], _: &mut ()| (x[0] - 1.0).powi(2) + (x[1] - 2.0).powi(2);
        let lower = |x: &[f64], _: &mut ()| x[0] + x[1] - 1.0;
        let upper = |x: &[f64], _: &mut ()| 1.0 - x[0] - x[1];
        let constraints: Vec<&dyn cobyla::Func<()>> = vec![&lower, &upper];

        let x = Cobyla::new()
            .minimize(objective, &constraints, &[0.5, 0.5], &[(0.0, 1.0), (0.0, 1.0)])
            .unwrap();

        assert_abs_diff_eq!(x[0], 0.0, epsilon = 1e-5);
        assert_abs_diff_eq!(x[1], 1.0, epsilon = 1e-5);
    }

    #[test]
    fn cobyla_evaluation_limit_is_an_error() {
        let mut options = CobylaOptions::default();
        options.set_max_evals(5);

        let objective = |x: &[f64], _: &mut ()| (x[0] - 0.3).powi(2) + (x[1] - 0.6).powi(2);

        assert_eq!(
            Cobyla::with_options(options).minimize(
                objective,
                &[],
                &[0.0, 0.0],
                &[(-1.0, 1.0), (-1.0, 1.0)]
            ),
            Err(SubsolverError::NotConverged(5))
        );
    }
}
