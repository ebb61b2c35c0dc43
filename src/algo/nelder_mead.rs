//! Nelder-Mead (simplex) method.
//!
//! [Nelder-Mead](https://en.wikipedia.org/wiki/Nelder%E2%80%93Mead_method)
//! simplex-reflection method is a popular derivative-free local optimization
//! algorithm. It keeps a [simplex](https://en.wikipedia.org/wiki/Simplex) of
//! _N + 1_ points which is reflected, expanded or contracted based on the
//! comparison of the objective values.
//!
//! The method is mostly sequential: after the initial simplex, an iteration
//! evaluates one to three points one after another. Only the initial simplex
//! and the shrinkage of the whole simplex are submitted as batches. Points
//! outside the bounds of the problem are projected onto them.
//!
//! When the simplex collapses, the calibration is marked as converged.
//!
//! # References
//!
//! \[1\] [Numerical
//! Optimization](https://link.springer.com/book/10.1007/978-0-387-40065-5)
//!
//! \[2\] [Implementing the Nelder-Mead simplex algorithm with adaptive
//! parameters](https://link.springer.com/article/10.1007/s10589-010-9329-3)
//!
//! \[3\] [Less is more: Simplified Nelder-Mead method for large unconstrained
//! optimization](https://api.semanticscholar.org/CorpusID:59403095)
//!
//! \[4\] [Gilding the Lily: A Variant of the Nelder-Mead Algorithm Based on
//! Golden-Section
//! Search](https://link.springer.com/article/10.1023/A:1014842520519)

use getset::{CopyGetters, Setters};
use nalgebra::DVector;
use thiserror::Error;

use crate::core::{
    Algorithm, ConfigurationError, Domain, Logger, Problem, ProblemExt, RunConfig, Simulator,
};
use crate::driver::OptimizerDriver;
use crate::evaluator::{Annotations, EvaluationError};

/// Family of coefficients for reflection, expansion and contractions.
#[derive(Debug, Clone, Copy)]
pub enum CoefficientsFamily {
    /// Standard ("textbook") choice.
    Standard,
    /// The coefficients are adjusted compared to standard by taking problem
    /// dimension into account to avoid diminishing of expansion and
    /// contraction steps in higher dimensions.
    Balanced,
    /// The coefficients are chosen such that the algorithm becomes a
    /// golden-section search.
    GoldenSection,
    /// The coefficients are left unchanged so it is the responsibility of the
    /// user to set them through [`NelderMeadOptions`].
    Fixed,
}

/// Options for [`NelderMead`] algorithm.
#[derive(Debug, Clone, CopyGetters, Setters)]
#[getset(get_copy = "pub", set = "pub")]
pub struct NelderMeadOptions {
    /// Family for coefficients adaptation or fixed coefficients. Default:
    /// standard (see [`CoefficientsFamily`]).
    family: CoefficientsFamily,
    /// Coefficient for reflection operation. Default: `-1`.
    reflection_coeff: f64,
    /// Coefficient for expansion operation. Default: `-2`.
    expansion_coeff: f64,
    /// Coefficient for outer contraction operation. Default: `-0.5`.
    outer_contraction_coeff: f64,
    /// Coefficient for inner contraction operation. Default: `0.5`.
    inner_contraction_coeff: f64,
    /// Coefficient for shrinking operation. Default: `0.5`.
    shrink_coeff: f64,
    /// Offset of the initial simplex points from the starting point along
    /// the coordinate axes. Default: `0.5`.
    initial_step: f64,
}

impl Default for NelderMeadOptions {
    fn default() -> Self {
        Self {
            family: CoefficientsFamily::Standard,
            reflection_coeff: -1.0,
            expansion_coeff: -2.0,
            outer_contraction_coeff: -0.5,
            inner_contraction_coeff: 0.5,
            shrink_coeff: 0.5,
            initial_step: 0.5,
        }
    }
}

impl NelderMeadOptions {
    fn overwrite_coeffs(&mut self, n: usize) {
        let Self {
            family,
            reflection_coeff,
            expansion_coeff,
            outer_contraction_coeff,
            inner_contraction_coeff,
            shrink_coeff,
            ..
        } = self;

        match family {
            CoefficientsFamily::Standard => {
                *reflection_coeff = -1.0;
                *expansion_coeff = -2.0;
                *outer_contraction_coeff = -0.5;
                *inner_contraction_coeff = -*outer_contraction_coeff;
                *shrink_coeff = 0.5;
            }
            CoefficientsFamily::Balanced => {
                let n_inv = 1.0 / n as f64;

                *reflection_coeff = -1.0;
                *expansion_coeff = -(2.0 * n_inv + 1.0);
                *outer_contraction_coeff = -(1.0 - n_inv);
                *inner_contraction_coeff = -*outer_contraction_coeff;
                *shrink_coeff = 1.0 - n_inv;
            }
            CoefficientsFamily::GoldenSection => {
                let alpha = 1.0 / (0.5 * (5f64.sqrt() + 1.0));
                *reflection_coeff = -1.0;
                *expansion_coeff = -1.0 / alpha;
                *outer_contraction_coeff = -alpha;
                *inner_contraction_coeff = alpha.powi(2);
                *shrink_coeff = -alpha.powi(2);
            }
            CoefficientsFamily::Fixed => {
                // Leave unchanged.
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.initial_step > 0.0) {
            return Err(ConfigurationError::InvalidOption {
                name: "initial_step",
                reason: "must be positive",
            });
        }

        Ok(())
    }
}

/// Error returned from [`NelderMead`] algorithm.
#[derive(Debug, Error)]
pub enum NelderMeadError {
    /// Evaluation of a job failed.
    #[error("{0}")]
    Evaluation(#[from] EvaluationError),
    /// Simplex contains too many invalid values (NaN, infinity).
    #[error("simplex contains too many invalid values")]
    SimplexInvalid,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Transformation {
    Reflection,
    Expansion,
    OuterContraction,
    InnerContraction,
    Shrinkage,
}

impl Transformation {
    fn as_str(&self) -> &'static str {
        match self {
            Transformation::Reflection => "reflection",
            Transformation::Expansion => "expansion",
            Transformation::OuterContraction => "outer contraction",
            Transformation::InnerContraction => "inner contraction",
            Transformation::Shrinkage => "shrinkage",
        }
    }
}

/// Nelder-Mead algorithm. See [module](self) documentation for more details.
pub struct NelderMead {
    options: NelderMeadOptions,
    dom: Domain,
    start: DVector<f64>,
    simplex: Vec<DVector<f64>>,
    objectives: Vec<f64>,
    sort_perm: Vec<usize>,
    iter: usize,
    logger: Logger,
}

impl NelderMead {
    /// Initializes Nelder-Mead algorithm with default options.
    pub fn new<P: Problem>(problem: &P) -> Result<Self, ConfigurationError> {
        Self::with_options(problem, NelderMeadOptions::default())
    }

    /// Initializes Nelder-Mead algorithm with given options.
    pub fn with_options<P: Problem>(
        problem: &P,
        mut options: NelderMeadOptions,
    ) -> Result<Self, ConfigurationError> {
        options.validate()?;

        let dom = problem.domain();
        let mut start = problem.starting_point()?;
        dom.project(&mut start);

        options.overwrite_coeffs(dom.dim());

        Ok(Self {
            options,
            dom,
            start,
            simplex: Vec::new(),
            objectives: Vec::new(),
            sort_perm: Vec::new(),
            iter: 0,
            logger: Logger::default(),
        })
    }

    /// Sets the logger.
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Best point of the simplex and its objective value. Not available
    /// before the first iteration.
    pub fn best(&self) -> Option<(&DVector<f64>, f64)> {
        self.sort_perm
            .first()
            .map(|&i| (&self.simplex[i], self.objectives[i]))
    }

    /// Number of finished iterations, including the initialization of the
    /// simplex.
    pub fn iter(&self) -> usize {
        self.iter
    }

    /// Resets the internal state of the algorithm.
    pub fn reset(&mut self) {
        // Causes simplex to be initialized again.
        self.simplex.clear();
        self.objectives.clear();
        self.sort_perm.clear();
    }

    fn evaluate<P: Problem, S: Simulator>(
        &self,
        driver: &OptimizerDriver<P, S>,
        points: &[DVector<f64>],
        operation: &str,
    ) -> Result<Vec<f64>, EvaluationError> {
        let annotations = Annotations::new()
            .with("type", operation)
            .with("iteration", self.iter);

        let mut ids = Vec::with_capacity(points.len());
        for x in points {
            ids.push(driver.submit(x.clone(), RunConfig::new(), annotations.clone())?);
        }

        driver.wait(&ids)?;

        let mut objectives = Vec::with_capacity(ids.len());
        for id in ids {
            objectives.push(nan_to_inf(driver.get(id)?.objective));
            driver.clean(id);
        }

        Ok(objectives)
    }

    fn evaluate_one<P: Problem, S: Simulator>(
        &self,
        driver: &OptimizerDriver<P, S>,
        x: &DVector<f64>,
        transformation: Transformation,
    ) -> Result<f64, EvaluationError> {
        let objectives =
            self.evaluate(driver, std::slice::from_ref(x), transformation.as_str())?;
        Ok(objectives[0])
    }

    /// Point on the line from `from` through `to` at parameter `t`, projected
    /// into the domain.
    fn on_line(&self, from: &DVector<f64>, to: &DVector<f64>, t: f64) -> (DVector<f64>, bool) {
        let mut x = (to - from) * t + from;
        let not_feasible = self.dom.project(&mut x);
        (x, not_feasible)
    }

    fn sort(&mut self) {
        let objectives = &self.objectives;
        self.sort_perm
            .sort_by(|a, b| objectives[*a].total_cmp(&objectives[*b]));
    }

    fn initialize<P: Problem, S: Simulator>(
        &mut self,
        driver: &OptimizerDriver<P, S>,
    ) -> Result<(), NelderMeadError> {
        let n = self.dom.dim();
        let step = self.options.initial_step;

        let mut points = Vec::with_capacity(n + 1);
        points.push(self.start.clone());

        for j in 0..n {
            let mut xi = self.start.clone();
            xi[j] += step;

            if self.dom.project_in(&mut xi, j) && xi[j] == self.start[j] {
                // The starting point lies on the upper bound.
                xi[j] = self.start[j] - step;
                self.dom.project_in(&mut xi, j);
            }

            points.push(xi);
        }

        let objectives = self.evaluate(driver, &points, "simplex")?;
        let error_count = objectives.iter().filter(|o| !o.is_finite()).count();

        if error_count >= points.len() / 2 {
            // The simplex is too degenerate.
            self.logger.warn(format_args!(
                "{} out of {} points in simplex have invalid value",
                error_count,
                points.len()
            ));
            return Err(NelderMeadError::SimplexInvalid);
        }

        self.simplex = points;
        self.objectives = objectives;
        self.sort_perm = (0..=n).collect();
        self.sort();

        Ok(())
    }

    /// Replaces the point at given index of the simplex.
    fn replace(&mut self, index: usize, x: DVector<f64>, objective: f64) {
        self.simplex[index] = x;
        self.objectives[index] = objective;
    }
}

impl<P: Problem, S: Simulator> Algorithm<P, S> for NelderMead {
    const NAME: &'static str = "Nelder-Mead";

    type Error = NelderMeadError;

    fn advance(&mut self, driver: &OptimizerDriver<P, S>) -> Result<(), Self::Error> {
        if self.simplex.is_empty() {
            self.logger.info(format_args!("initializing Nelder-Mead simplex"));
            self.initialize(driver)?;
            self.iter += 1;
            return Ok(());
        }

        let NelderMeadOptions {
            reflection_coeff,
            expansion_coeff,
            outer_contraction_coeff,
            inner_contraction_coeff,
            shrink_coeff,
            ..
        } = self.options;

        let n = self.dom.dim();
        let best = self.sort_perm[0];
        let second_worst = self.sort_perm[n - 1];
        let worst = self.sort_perm[n];

        let mut centroid = DVector::zeros(n);
        for &i in &self.sort_perm[..n] {
            centroid += &self.simplex[i];
        }
        centroid /= n as f64;

        self.logger
            .debug(format_args!("centroid of simplex: {:?}", centroid.as_slice()));

        let (reflection, reflection_not_feasible) =
            self.on_line(&centroid, &self.simplex[worst], reflection_coeff);
        let reflection_objective =
            self.evaluate_one(driver, &reflection, Transformation::Reflection)?;

        let (transformation, not_feasible) = if self.objectives[best] <= reflection_objective
            && reflection_objective < self.objectives[second_worst]
        {
            // Reflected point is neither best nor worst in the new simplex.
            // Just replace the worst point.
            self.replace(worst, reflection, reflection_objective);
            (Transformation::Reflection, reflection_not_feasible)
        } else if reflection_objective < self.objectives[best] {
            // Reflected point is better than the current best. Try to go
            // farther along this direction.
            let (expansion, expansion_not_feasible) =
                self.on_line(&centroid, &self.simplex[worst], expansion_coeff);
            let expansion_objective =
                self.evaluate_one(driver, &expansion, Transformation::Expansion)?;

            if expansion_objective < reflection_objective {
                self.replace(worst, expansion, expansion_objective);
                (Transformation::Expansion, expansion_not_feasible)
            } else {
                self.replace(worst, reflection, reflection_objective);
                (Transformation::Reflection, reflection_not_feasible)
            }
        } else {
            // Reflected point is still worse than the second to last point.
            // Try to do a contraction.
            let contracted = if reflection_objective < self.objectives[worst] {
                let (contraction, contraction_not_feasible) =
                    self.on_line(&centroid, &self.simplex[worst], outer_contraction_coeff);
                let contraction_objective =
                    self.evaluate_one(driver, &contraction, Transformation::OuterContraction)?;

                if contraction_objective <= reflection_objective {
                    self.replace(worst, contraction, contraction_objective);
                    Some((Transformation::OuterContraction, contraction_not_feasible))
                } else {
                    None
                }
            } else {
                let (contraction, contraction_not_feasible) =
                    self.on_line(&centroid, &self.simplex[worst], inner_contraction_coeff);
                let contraction_objective =
                    self.evaluate_one(driver, &contraction, Transformation::InnerContraction)?;

                if contraction_objective <= self.objectives[worst] {
                    self.replace(worst, contraction, contraction_objective);
                    Some((Transformation::InnerContraction, contraction_not_feasible))
                } else {
                    None
                }
            };

            match contracted {
                Some(contracted) => contracted,
                None => {
                    // Neither outside nor inside contraction was acceptable.
                    // Shrink the simplex towards the best point.
                    let indices = self.sort_perm[1..].to_vec();
                    let points = indices
                        .iter()
                        .map(|&i| {
                            let xi = &self.simplex[i];
                            (xi - &self.simplex[best]) * shrink_coeff + &self.simplex[best]
                        })
                        .collect::<Vec<_>>();

                    let objectives =
                        self.evaluate(driver, &points, Transformation::Shrinkage.as_str())?;

                    for ((i, xi), objective) in indices.into_iter().zip(points).zip(objectives) {
                        self.replace(i, xi, objective);
                    }

                    (Transformation::Shrinkage, false)
                }
            }
        };

        // Establish the ordering of simplex points.
        self.sort();

        let best = self.objectives[self.sort_perm[0]];
        let worst = self.objectives[self.sort_perm[n]];

        self.logger.debug(format_args!(
            "performed {}{},\tf = {} - {}",
            transformation.as_str(),
            if not_feasible { " with projection" } else { "" },
            best,
            worst
        ));

        if transformation == Transformation::Shrinkage
            || transformation == Transformation::InnerContraction
            || not_feasible
        {
            // Without reduction of the objective, the simplex may have
            // collapsed. The criterion is taken from "Less is more: Simplified
            // Nelder-Mead method for large unconstrained optimization".
            let eps = f64::EPSILON.sqrt();

            let numer = (worst - best) * 2.0;
            let denom = worst + best + eps;

            if numer / denom <= eps {
                self.logger.info(format_args!(
                    "simplex collapsed: {} / {} <= {}",
                    numer, denom, eps
                ));
                driver.mark_converged();
            }
        }

        self.iter += 1;
        Ok(())
    }
}

fn nan_to_inf(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        // Not finite also covers NaN and negative infinity.
        f64::INFINITY
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::dvector;

    use super::*;
    use crate::core::{Outcome, Restart, SimulationError};
    use crate::testing::*;
    use crate::{Evaluator, ProblemDescriptor};

    #[test]
    fn quadratic_sum() {
        let problem = ProblemDescriptor::new(2).with_initial(vec![1.0, 1.0]);
        let mut algo = NelderMead::new(&problem).unwrap();

        let driver = OptimizerDriver::new(
            problem,
            Evaluator::new(QuadraticSum::new(vec![2.0, 4.0])),
        );
        driver.run(&mut algo).unwrap();

        assert!(driver.best_objective() < 1e-8);
        assert_eq!(algo.best().unwrap().1, driver.best_objective());
        assert_eq!(driver.evaluator().cached(), 0);
    }

    #[test]
    fn considering_domain() {
        // The minimum within the bounds is in the corner (0.5, 0.5).
        let problem =
            ProblemDescriptor::bounded([(0.5, 2.0), (0.5, 2.0)]).with_initial(vec![2.0, 2.0]);
        let mut algo = NelderMead::new(&problem).unwrap();

        let driver = OptimizerDriver::builder(
            problem,
            Evaluator::new(QuadraticSum::new(vec![2.0, 4.0])),
        )
        .with_maximum_evaluations(200)
        .build();
        driver.run(&mut algo).unwrap();

        assert_eq!(driver.best_objective(), 1.5);
        assert_eq!(driver.best_parameters(), Some(dvector![0.5, 0.5]));
        assert!(driver.finished());
        assert!(driver.evaluations() < 200);

        let dom = driver.problem().domain();
        assert!(driver
            .history()
            .iter()
            .all(|evaluation| dom.contains(&DVector::from_column_slice(evaluation.parameters()))));
    }

    #[test]
    fn flat_objective_collapses_simplex() {
        let problem = ProblemDescriptor::new(2).with_initial(vec![1.0, 1.0]);
        let mut algo = NelderMead::new(&problem).unwrap();

        let driver = OptimizerDriver::new(
            problem,
            Evaluator::new(QuadraticSum::new(vec![0.0, 0.0])),
        );

        // Initial simplex, then reflection and inner contraction.
        assert_eq!(driver.run(&mut algo).unwrap(), 2);
        assert_eq!(driver.evaluations(), 5);
        assert!(driver.finished());
    }

    struct NotANumber;

    impl Simulator for NotANumber {
        fn run(
            &self,
            _: &DVector<f64>,
            _: &RunConfig,
            _: Option<&Restart>,
        ) -> Result<Outcome, SimulationError> {
            Ok(Outcome::new(f64::NAN))
        }
    }

    #[test]
    fn invalid_simplex_is_reported() {
        let problem = ProblemDescriptor::new(2).with_initial(vec![1.0, 1.0]);
        let mut algo = NelderMead::new(&problem).unwrap();
        let driver = OptimizerDriver::new(problem, Evaluator::new(NotANumber));

        assert!(matches!(
            driver.step(&mut algo),
            Err(NelderMeadError::SimplexInvalid)
        ));
        assert_eq!(driver.evaluations(), 3);
        assert!(algo.best().is_none());
    }

    #[test]
    fn balanced_coefficients() {
        let mut options = NelderMeadOptions::default();
        options.set_family(CoefficientsFamily::Balanced);

        let problem = ProblemDescriptor::new(4).with_initial(vec![0.0; 4]);
        let algo = NelderMead::with_options(&problem, options).unwrap();

        assert_eq!(algo.options.expansion_coeff(), -1.5);
        assert_eq!(algo.options.outer_contraction_coeff(), -0.75);
        assert_eq!(algo.options.inner_contraction_coeff(), 0.75);
        assert_eq!(algo.options.shrink_coeff(), 0.75);
    }

    #[test]
    fn invalid_options_are_rejected() {
        let mut options = NelderMeadOptions::default();
        options.set_initial_step(0.0);

        assert!(matches!(
            NelderMead::with_options(&ProblemDescriptor::new(1).with_initial(vec![0.0]), options),
            Err(ConfigurationError::InvalidOption {
                name: "initial_step",
                ..
            })
        ));

        assert!(matches!(
            NelderMead::new(&ProblemDescriptor::new(2)),
            Err(ConfigurationError::MissingInitial)
        ));
    }
}
