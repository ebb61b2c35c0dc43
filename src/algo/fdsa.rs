//! Finite-difference stochastic approximation.
//!
//! The Kiefer-Wolfowitz counterpart of [SPSA](super::spsa). The gradient is
//! estimated by central differences in every coordinate separately, which
//! takes `2 N` evaluations per iteration, and follows the same decaying gain
//! schedule:
//!
//! ```text
//! g_k,i = (f(theta + c_k e_i) - f(theta - c_k e_i)) / (2 c_k)
//! theta <- theta - a_k g_k
//! ```
//!
//! All `2 N` simulations of an iteration are submitted at once, so they run in
//! parallel with a pool of workers.

use nalgebra::DVector;

use crate::core::{
    Algorithm, ConfigurationError, Domain, Logger, Problem, ProblemExt, RunConfig, Simulator,
};
use crate::driver::OptimizerDriver;
use crate::evaluator::{Annotations, EvaluationError};

pub use super::spsa::SpsaOptions as FdsaOptions;

/// FDSA algorithm. See [module](self) documentation for more details.
pub struct Fdsa {
    options: FdsaOptions,
    dom: Domain,
    theta: DVector<f64>,
    iter: usize,
    logger: Logger,
}

impl Fdsa {
    /// Initializes FDSA algorithm with default options.
    pub fn new<P: Problem>(problem: &P) -> Result<Self, ConfigurationError> {
        Self::with_options(problem, FdsaOptions::default())
    }

    /// Initializes FDSA algorithm with given options.
    pub fn with_options<P: Problem>(
        problem: &P,
        options: FdsaOptions,
    ) -> Result<Self, ConfigurationError> {
        options.validate()?;

        Ok(Self {
            options,
            dom: problem.domain(),
            theta: problem.starting_point()?,
            iter: 0,
            logger: Logger::default(),
        })
    }

    /// Sets the logger.
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Current parameters.
    pub fn theta(&self) -> &DVector<f64> {
        &self.theta
    }

    /// Number of finished iterations.
    pub fn iter(&self) -> usize {
        self.iter
    }
}

impl<P: Problem, S: Simulator> Algorithm<P, S> for Fdsa {
    const NAME: &'static str = "FDSA";

    type Error = EvaluationError;

    fn advance(&mut self, driver: &OptimizerDriver<P, S>) -> Result<(), Self::Error> {
        let k = self.iter;
        let ck = self.options.perturbation(k);
        let ak = self.options.gain(k);
        let n = self.theta.nrows();

        self.logger.info(format_args!(
            "FDSA iteration {}: c_k = {}, a_k = {}",
            k, ck, ak
        ));

        let mut ids = Vec::with_capacity(2 * n);

        for i in 0..n {
            for (sign, step) in [("+", ck), ("-", -ck)] {
                let mut x = self.theta.clone();
                x[i] += step;

                let annotations = Annotations::new()
                    .with("type", "gradient")
                    .with("iteration", k)
                    .with("dimension", i)
                    .with("sign", sign)
                    .with("perturbation", ck);

                ids.push(driver.submit(x, RunConfig::new(), annotations)?);
            }
        }

        driver.wait(&ids)?;

        let mut gradient = DVector::zeros(n);

        for (i, pair) in ids.chunks(2).enumerate() {
            let f_plus = driver.get(pair[0])?.objective;
            let f_minus = driver.get(pair[1])?.objective;
            gradient[i] = (f_plus - f_minus) / (2.0 * ck);
        }

        for id in ids {
            driver.clean(id);
        }

        self.theta -= gradient * ak;

        if self.options.project() {
            self.dom.project(&mut self.theta);
        }

        self.logger.debug(format_args!("theta = {:?}", self.theta.as_slice()));

        self.iter += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::testing::*;
    use crate::{Evaluator, ProblemDescriptor};

    #[test]
    fn quadratic_sum() {
        let problem = ProblemDescriptor::new(2).with_initial(vec![1.0, 1.0]);
        let mut algo = Fdsa::new(&problem).unwrap();

        let driver = OptimizerDriver::new(
            problem,
            Evaluator::new(QuadraticSum::new(vec![2.0, 4.0])),
        );
        driver.run(&mut algo).unwrap();

        assert!(driver.best_objective() < 1e-4);
        assert_eq!(algo.iter(), 25);
    }

    #[test]
    fn central_differences_are_exact_for_quadratics() {
        let problem = ProblemDescriptor::new(2).with_initial(vec![1.0, -1.0]);
        let mut options = FdsaOptions::default();
        options.set_gain_factor(0.1);
        let mut algo = Fdsa::with_options(&problem, options).unwrap();

        let driver = OptimizerDriver::new(
            problem,
            Evaluator::new(QuadraticSum::new(vec![2.0, 4.0])),
        );
        driver.step(&mut algo).unwrap();

        // Gradient at (1, -1) is (4, -8).
        assert_abs_diff_eq!(algo.theta()[0], 1.0 - 0.1 * 4.0, epsilon = 1e-9);
        assert_abs_diff_eq!(algo.theta()[1], -1.0 + 0.1 * 8.0, epsilon = 1e-9);
        assert_eq!(driver.evaluations(), 4);
        assert_eq!(driver.evaluator().cached(), 0);
    }
}
