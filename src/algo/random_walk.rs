//! Uniform random search in a bounded domain.
//!
//! Every iteration draws a batch of independent parameter vectors uniformly
//! within the bounds, evaluates them in parallel and discards them. There is
//! no state other than the random number generator, which makes it a useful
//! baseline for the other algorithms.

use getset::{CopyGetters, Setters};
use nalgebra::DVector;
use rand::Rng;

use crate::core::{
    Algorithm, ConfigurationError, Domain, Logger, Problem, ProblemExt, RunConfig, Simulator,
};
use crate::driver::OptimizerDriver;
use crate::evaluator::{Annotations, EvaluationError};

/// Options for [`RandomWalk`] algorithm.
#[derive(Debug, Clone, CopyGetters, Setters)]
#[getset(get_copy = "pub", set = "pub")]
pub struct RandomWalkOptions {
    /// Number of samples per iteration. If not set, the number of workers of
    /// the evaluator is used (at least one).
    parallel: Option<usize>,
}

impl Default for RandomWalkOptions {
    fn default() -> Self {
        Self { parallel: None }
    }
}

/// Random walk algorithm. See [module](self) documentation for more details.
pub struct RandomWalk<R> {
    options: RandomWalkOptions,
    dom: Domain,
    rng: R,
    iter: usize,
    logger: Logger,
}

impl<R: Rng> RandomWalk<R> {
    /// Initializes random walk algorithm with default options.
    pub fn new<P: Problem>(problem: &P, rng: R) -> Result<Self, ConfigurationError> {
        Self::with_options(problem, RandomWalkOptions::default(), rng)
    }

    /// Initializes random walk algorithm with given options.
    ///
    /// Fails if the problem is not bounded.
    pub fn with_options<P: Problem>(
        problem: &P,
        options: RandomWalkOptions,
        rng: R,
    ) -> Result<Self, ConfigurationError> {
        let dom = problem.bounded_domain()?;

        if options.parallel == Some(0) {
            return Err(ConfigurationError::InvalidOption {
                name: "parallel",
                reason: "must be positive",
            });
        }

        Ok(Self {
            options,
            dom,
            rng,
            iter: 0,
            logger: Logger::default(),
        })
    }

    /// Sets the logger.
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Number of finished iterations.
    pub fn iter(&self) -> usize {
        self.iter
    }
}

impl<P: Problem, S: Simulator, R: Rng> Algorithm<P, S> for RandomWalk<R> {
    const NAME: &'static str = "Random walk";

    type Error = EvaluationError;

    fn advance(&mut self, driver: &OptimizerDriver<P, S>) -> Result<(), Self::Error> {
        let parallel = self
            .options
            .parallel
            .unwrap_or_else(|| driver.evaluator().workers().max(1));

        self.logger.info(format_args!(
            "random walk iteration {} with {} samples",
            self.iter, parallel
        ));

        let mut ids = Vec::with_capacity(parallel);

        for sample in 0..parallel {
            let mut x = DVector::zeros(self.dom.dim());
            self.dom.sample(&mut x, &mut self.rng);

            let annotations = Annotations::new()
                .with("type", "random_walk")
                .with("iteration", self.iter)
                .with("sample", sample);

            ids.push(driver.submit(x, RunConfig::new(), annotations)?);
        }

        driver.wait(&ids)?;

        for id in ids {
            driver.get(id)?;
            driver.clean(id);
        }

        self.iter += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::testing::*;
    use crate::{Evaluator, ProblemDescriptor};

    fn run(seed: u64, parallel: usize) -> OptimizerDriver<ProblemDescriptor, QuadraticSum> {
        let problem = ProblemDescriptor::bounded([(-2.0, 2.0), (-2.0, 2.0)]);
        let mut options = RandomWalkOptions::default();
        options.set_parallel(Some(parallel));

        let mut algo =
            RandomWalk::with_options(&problem, options, StdRng::seed_from_u64(seed)).unwrap();

        let driver = OptimizerDriver::new(
            problem,
            Evaluator::new(QuadraticSum::new(vec![2.0, 4.0])),
        );
        driver.run(&mut algo).unwrap();
        driver
    }

    #[test]
    fn quadratic_sum() {
        let driver = run(42, 4);

        assert!(driver.best_objective() < 1.0);
        assert_eq!(driver.evaluations(), 100);
        assert_eq!(driver.evaluator().cached(), 0);
    }

    #[test]
    fn samples_lie_within_bounds() {
        let driver = run(7, 3);
        let dom: Domain = [(-2.0, 2.0), (-2.0, 2.0)].into_iter().collect();

        for evaluation in driver.history() {
            let x = DVector::from_column_slice(evaluation.parameters());
            assert!(dom.contains(&x), "{:?} outside of bounds", x);
        }
    }

    #[test]
    fn seeded_runs_are_identical() {
        let parameters = |driver: OptimizerDriver<ProblemDescriptor, QuadraticSum>| {
            driver
                .history()
                .iter()
                .map(|evaluation| evaluation.parameters().clone())
                .collect::<Vec<_>>()
        };

        assert_eq!(parameters(run(5, 4)), parameters(run(5, 4)));
        assert_ne!(parameters(run(5, 4)), parameters(run(6, 4)));
    }

    #[test]
    fn unbounded_problem_is_rejected() {
        let problem = ProblemDescriptor::new(2);

        assert!(matches!(
            RandomWalk::new(&problem, StdRng::seed_from_u64(0)),
            Err(ConfigurationError::MissingBounds)
        ));
    }

    #[test]
    fn parallel_defaults_to_workers() {
        let problem = ProblemDescriptor::bounded([(-1.0, 1.0)]);
        let mut algo = RandomWalk::new(&problem, StdRng::seed_from_u64(0)).unwrap();

        let driver = OptimizerDriver::new(
            problem,
            Evaluator::builder(QuadraticSum::new(vec![1.0]))
                .with_workers(3)
                .with_ping_time(std::time::Duration::ZERO)
                .build(),
        );
        driver.step(&mut algo).unwrap();

        assert_eq!(driver.evaluations(), 3);
        assert_eq!(algo.iter(), 1);
    }
}
