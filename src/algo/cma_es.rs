//! Covariance matrix adaptation evolution strategy.
//!
//! CMA-ES samples a generation of candidates from a multivariate normal
//! distribution, evaluates all of them in parallel and moves the mean of the
//! distribution towards the weighted average of the best half. The covariance
//! matrix and the global step size are adapted from the history of successful
//! steps (the evolution paths), so the distribution gradually aligns with the
//! local shape of the objective.
//!
//! The algorithm does not use bounds of the problem. The search starts from
//! the initial values, or from the center of a bounded domain.
//!
//! # References
//!
//! \[1\] [The CMA Evolution Strategy: A Tutorial](https://arxiv.org/abs/1604.00772)
//!
//! \[2\] [CMA-ES on Wikipedia](https://en.wikipedia.org/wiki/CMA-ES)

use getset::{CopyGetters, Setters};
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::core::{Algorithm, ConfigurationError, Logger, Problem, ProblemExt, RunConfig, Simulator};
use crate::driver::OptimizerDriver;
use crate::evaluator::{Annotations, EvaluationError};

/// Ratio of the extreme eigenvalues of the covariance matrix above which the
/// distribution is considered degenerate.
const CONDITION_LIMIT: f64 = 1e7;

/// Options for [`CmaEs`] algorithm.
#[derive(Debug, Clone, CopyGetters, Setters)]
#[getset(get_copy = "pub", set = "pub")]
pub struct CmaEsOptions {
    /// Number of candidates per generation (`lambda`). If not set, the
    /// recommended `4 + floor(3 ln N)` is used.
    candidate_set_size: Option<usize>,
    /// Initial step size `sigma`.
    initial_step_size: f64,
}

impl Default for CmaEsOptions {
    fn default() -> Self {
        Self {
            candidate_set_size: None,
            initial_step_size: 0.3,
        }
    }
}

/// Recommended number of candidates per generation for given dimension.
pub fn default_candidate_set_size(n: usize) -> usize {
    4 + (3.0 * (n as f64).ln()).floor() as usize
}

/// Strategy parameters that stay fixed for the whole run.
#[derive(Debug, Clone)]
struct Constants {
    n: usize,
    lambda: usize,
    mu: usize,
    weights: DVector<f64>,
    mueff: f64,
    cc: f64,
    cs: f64,
    c1: f64,
    cmu: f64,
    damps: f64,
    chi_n: f64,
}

impl Constants {
    fn new(n: usize, lambda: usize) -> Self {
        let nf = n as f64;
        let mu = lambda / 2;

        let half = lambda as f64 / 2.0;
        let mut weights = DVector::from_fn(mu, |i, _| (half + 0.5).ln() - ((i + 1) as f64).ln());
        weights /= weights.sum();
        let mueff = 1.0 / weights.norm_squared();

        let cc = (4.0 + mueff / nf) / (nf + 4.0 + 2.0 * mueff / nf);
        let cs = (mueff + 2.0) / (nf + mueff + 5.0);
        let c1 = 2.0 / ((nf + 1.3).powi(2) + mueff);
        let cmu = f64::min(
            1.0 - c1,
            2.0 * (mueff - 2.0 + 1.0 / mueff) / ((nf + 2.0).powi(2) + mueff),
        );
        let damps = 1.0 + 2.0 * f64::max(0.0, ((mueff - 1.0) / (nf + 1.0)).sqrt() - 1.0) + cs;
        let chi_n = nf.sqrt() * (1.0 - 1.0 / (4.0 * nf) + 1.0 / (21.0 * nf * nf));

        Self {
            n,
            lambda,
            mu,
            weights,
            mueff,
            cc,
            cs,
            c1,
            cmu,
            damps,
            chi_n,
        }
    }

    /// Number of evaluations between two eigendecompositions of the
    /// covariance matrix.
    fn eigen_period(&self) -> f64 {
        self.lambda as f64 / (self.c1 + self.cmu) / self.n as f64 / 10.0
    }
}

/// CMA-ES algorithm. See [module](self) documentation for more details.
pub struct CmaEs<R> {
    consts: Constants,
    mean: DVector<f64>,
    sigma: f64,
    pc: DVector<f64>,
    ps: DVector<f64>,
    b: DMatrix<f64>,
    d: DVector<f64>,
    c: DMatrix<f64>,
    inv_sqrt_c: DMatrix<f64>,
    counteval: usize,
    eigeneval: usize,
    generation: usize,
    ill_conditioned: bool,
    rng: R,
    logger: Logger,
}

impl<R: Rng> CmaEs<R> {
    /// Initializes CMA-ES algorithm with default options.
    pub fn new<P: Problem>(problem: &P, rng: R) -> Result<Self, ConfigurationError> {
        Self::with_options(problem, CmaEsOptions::default(), rng)
    }

    /// Initializes CMA-ES algorithm with given options.
    pub fn with_options<P: Problem>(
        problem: &P,
        options: CmaEsOptions,
        rng: R,
    ) -> Result<Self, ConfigurationError> {
        let mean = problem.starting_point()?;
        let n = mean.nrows();

        if !(options.initial_step_size > 0.0) {
            return Err(ConfigurationError::InvalidOption {
                name: "initial_step_size",
                reason: "must be positive",
            });
        }

        let recommended = default_candidate_set_size(n);
        let lambda = options.candidate_set_size.unwrap_or(recommended);

        if lambda < 2 {
            return Err(ConfigurationError::InvalidOption {
                name: "candidate_set_size",
                reason: "must be at least 2",
            });
        }

        Ok(Self {
            consts: Constants::new(n, lambda),
            mean,
            sigma: options.initial_step_size,
            pc: DVector::zeros(n),
            ps: DVector::zeros(n),
            b: DMatrix::identity(n, n),
            d: DVector::from_element(n, 1.0),
            c: DMatrix::identity(n, n),
            inv_sqrt_c: DMatrix::identity(n, n),
            counteval: 0,
            eigeneval: 0,
            generation: 0,
            ill_conditioned: false,
            rng,
            logger: Logger::default(),
        })
    }

    /// Sets the logger.
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Number of candidates per generation.
    pub fn candidate_set_size(&self) -> usize {
        self.consts.lambda
    }

    /// Current mean of the distribution.
    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    /// Current step size.
    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Current covariance matrix.
    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.c
    }

    /// Number of finished generations.
    pub fn generation(&self) -> usize {
        self.generation
    }

    /// Returns `true` if the covariance matrix was found ill-conditioned at
    /// its last decomposition.
    pub fn is_ill_conditioned(&self) -> bool {
        self.ill_conditioned
    }

    fn sample(&mut self) -> DVector<f64> {
        let n = self.consts.n;
        let rng = &mut self.rng;
        let z = DVector::from_fn(n, |_, _| rng.sample::<f64, _>(StandardNormal));

        &self.mean + (&self.b * z.component_mul(&self.d)) * self.sigma
    }

    fn annotations(&self) -> Annotations {
        let covariance = self
            .c
            .row_iter()
            .map(|row| row.iter().copied().collect::<Vec<_>>())
            .collect::<Vec<_>>();

        Annotations::new()
            .with("type", "cma_es")
            .with("generation", self.generation)
            .with("mean", self.mean.iter().copied().collect::<Vec<_>>())
            .with("sigma", self.sigma)
            .with("covariance", covariance)
    }

    fn decompose(&mut self) {
        self.eigeneval = self.counteval;

        let c = (&self.c + self.c.transpose()) / 2.0;
        let eigen = c.clone().symmetric_eigen();
        self.c = c;

        let eigenvalues = eigen.eigenvalues.map(|e| e.max(1e-20));
        self.d = eigenvalues.map(f64::sqrt);
        self.b = eigen.eigenvectors;

        let d_inv = self.d.map(|di| 1.0 / di);
        self.inv_sqrt_c = &self.b * DMatrix::from_diagonal(&d_inv) * self.b.transpose();

        let condition = eigenvalues.max() / eigenvalues.min();
        self.ill_conditioned = condition > CONDITION_LIMIT;

        if self.ill_conditioned {
            self.logger.warn(format_args!(
                "covariance matrix is ill-conditioned (condition number {:e})",
                condition
            ));
        }
    }
}

impl<P: Problem, S: Simulator, R: Rng> Algorithm<P, S> for CmaEs<R> {
    const NAME: &'static str = "CMA-ES";

    type Error = EvaluationError;

    fn advance(&mut self, driver: &OptimizerDriver<P, S>) -> Result<(), Self::Error> {
        let Constants {
            n,
            lambda,
            mu,
            mueff,
            cc,
            cs,
            c1,
            cmu,
            damps,
            chi_n,
            ..
        } = self.consts;

        if self.generation == 0 {
            let recommended = default_candidate_set_size(n);

            if lambda < recommended {
                self.logger.warn(format_args!(
                    "using requested candidate set size {} (recommended is at least {})",
                    lambda, recommended
                ));
            }
        }

        self.logger.info(format_args!(
            "CMA-ES generation {}: sigma = {}",
            self.generation, self.sigma
        ));

        self.counteval += lambda;

        let annotations = self.annotations();
        let mut candidates = Vec::with_capacity(lambda);

        for _ in 0..lambda {
            let x = self.sample();
            let id = driver.submit(x.clone(), RunConfig::new(), annotations.clone())?;
            candidates.push((id, x));
        }

        let ids = candidates.iter().map(|(id, _)| *id).collect::<Vec<_>>();
        driver.wait(&ids)?;

        let mut ranked = Vec::with_capacity(lambda);
        for (id, x) in candidates {
            let objective = driver.get(id)?.objective;
            driver.clean(id);
            ranked.push((objective, x));
        }

        ranked.sort_by(|(a, _), (b, _)| a.total_cmp(b));

        let previous = self.mean.clone();
        let mut mean = DVector::zeros(n);
        for ((_, x), wi) in ranked.iter().take(mu).zip(self.consts.weights.iter()) {
            mean += x * *wi;
        }
        self.mean = mean;

        let step = (&self.mean - &previous) / self.sigma;

        self.ps = &self.ps * (1.0 - cs) + (&self.inv_sqrt_c * &step) * (cs * (2.0 - cs) * mueff).sqrt();

        let ps_norm = self.ps.norm();
        let generations = self.counteval as f64 / lambda as f64;
        let hsig = ps_norm / (1.0 - (1.0 - cs).powf(2.0 * generations)).sqrt() / chi_n
            < 1.4 + 2.0 / (n as f64 + 1.0);
        let hsig = if hsig { 1.0 } else { 0.0 };

        self.pc = &self.pc * (1.0 - cc) + &step * (hsig * (cc * (2.0 - cc) * mueff).sqrt());

        let mut rank_mu = DMatrix::zeros(n, n);
        for ((_, x), wi) in ranked.iter().take(mu).zip(self.consts.weights.iter()) {
            let y = (x - &previous) / self.sigma;
            rank_mu += &y * y.transpose() * *wi;
        }

        let rank_one = &self.pc * self.pc.transpose() + &self.c * ((1.0 - hsig) * cc * (2.0 - cc));
        self.c = &self.c * (1.0 - c1 - cmu) + rank_one * c1 + rank_mu * cmu;

        self.sigma *= ((cs / damps) * (ps_norm / chi_n - 1.0)).exp();

        if (self.counteval - self.eigeneval) as f64 > self.consts.eigen_period() {
            self.decompose();
        }

        self.logger.debug(format_args!(
            "best objective in generation = {}, mean = {:?}",
            ranked[0].0,
            self.mean.as_slice()
        ));

        self.generation += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use approx::assert_abs_diff_eq;
    use log::Level;
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::testing::*;
    use crate::{Evaluator, ProblemDescriptor};

    fn problem() -> ProblemDescriptor {
        ProblemDescriptor::new(2).with_initial(vec![1.0, 1.0])
    }

    #[test]
    fn quadratic_sum() {
        let problem = problem();
        let mut algo = CmaEs::new(&problem, StdRng::seed_from_u64(3)).unwrap();

        let driver = OptimizerDriver::new(
            problem,
            Evaluator::new(QuadraticSum::new(vec![2.0, 4.0])),
        );
        driver.run(&mut algo).unwrap();

        let best = driver
            .history()
            .iter()
            .take(100)
            .map(|evaluation| evaluation.objective())
            .fold(f64::INFINITY, f64::min);

        assert!(best < 1.0);
        assert_eq!(driver.evaluations(), 102);
        assert_eq!(algo.generation(), 17);
        assert_eq!(driver.evaluator().cached(), 0);
    }

    #[test]
    fn strategy_parameters() {
        assert_eq!(default_candidate_set_size(1), 4);
        assert_eq!(default_candidate_set_size(2), 6);
        assert_eq!(default_candidate_set_size(10), 10);

        let consts = Constants::new(2, 6);
        assert_eq!(consts.mu, 3);
        assert_abs_diff_eq!(consts.weights.sum(), 1.0, epsilon = 1e-12);
        assert!(consts.weights[0] > consts.weights[1]);
        assert!(consts.weights[1] > consts.weights[2]);
        assert!(consts.mueff > 1.0 && consts.mueff < 3.0);
        assert!(consts.c1 + consts.cmu <= 1.0);
    }

    #[test]
    fn undersized_candidate_set_is_reported() {
        let run = |lambda: usize| {
            let capture = Arc::new(Capture::default());

            let mut options = CmaEsOptions::default();
            options.set_candidate_set_size(Some(lambda));

            let problem = problem();
            let mut algo = CmaEs::with_options(&problem, options, StdRng::seed_from_u64(0))
                .unwrap()
                .with_logger(Logger::new(capture.clone(), "test"));
            assert_eq!(algo.candidate_set_size(), lambda);

            let driver = OptimizerDriver::new(
                problem,
                Evaluator::new(QuadraticSum::new(vec![2.0, 4.0])),
            );
            driver.step(&mut algo).unwrap();
            assert_eq!(driver.evaluations(), lambda);

            capture.contains(Level::Warn, "candidate set size")
        };

        assert!(run(4));
        assert!(!run(20));
    }

    #[test]
    fn ill_conditioning_is_reported() {
        let capture = Arc::new(Capture::default());

        let problem = problem();
        let mut algo = CmaEs::new(&problem, StdRng::seed_from_u64(0))
            .unwrap()
            .with_logger(Logger::new(capture.clone(), "test"));

        let driver = OptimizerDriver::builder(
            problem,
            Evaluator::new(QuadraticSum::new(vec![1e9, 1.0])),
        )
        .with_maximum_evaluations(5000)
        .build();

        while !algo.is_ill_conditioned() && !driver.finished() {
            driver.step(&mut algo).unwrap();
        }

        assert!(algo.is_ill_conditioned());
        assert!(capture.contains(Level::Warn, "ill-conditioned"));
    }

    #[test]
    fn eigendecomposition_is_skipped_within_period() {
        let n = 100;
        let problem = ProblemDescriptor::new(n).with_initial(vec![1.0; n]);
        let mut algo = CmaEs::new(&problem, StdRng::seed_from_u64(0)).unwrap();

        let lambda = algo.candidate_set_size();
        let period = algo.consts.eigen_period();
        assert_eq!(lambda, 17);
        assert!(period > lambda as f64 && period < 2.0 * lambda as f64);

        let driver = OptimizerDriver::new(
            problem,
            Evaluator::new(QuadraticSum::new(vec![1.0; n])),
        );

        // Decomposition happens every other generation.
        let mut decompositions = Vec::new();
        for _ in 0..4 {
            driver.step(&mut algo).unwrap();
            decompositions.push(algo.eigeneval);
        }

        assert_eq!(decompositions, vec![0, 2 * lambda, 2 * lambda, 4 * lambda]);
    }

    #[test]
    fn seeded_runs_are_identical() {
        let run = |seed: u64| {
            let problem = problem();
            let mut algo = CmaEs::new(&problem, StdRng::seed_from_u64(seed)).unwrap();
            let driver = OptimizerDriver::builder(
                problem,
                Evaluator::new(QuadraticSum::new(vec![2.0, 4.0])),
            )
            .with_maximum_evaluations(30)
            .build();
            driver.run(&mut algo).unwrap();
            (algo.mean().clone(), algo.sigma())
        };

        assert_eq!(run(11), run(11));
        assert_ne!(run(11), run(12));
    }

    #[test]
    fn invalid_options_are_rejected() {
        let mut options = CmaEsOptions::default();
        options.set_initial_step_size(0.0);

        assert!(matches!(
            CmaEs::with_options(&problem(), options, StdRng::seed_from_u64(0)),
            Err(ConfigurationError::InvalidOption {
                name: "initial_step_size",
                ..
            })
        ));

        assert!(matches!(
            CmaEs::new(&ProblemDescriptor::new(2), StdRng::seed_from_u64(0)),
            Err(ConfigurationError::MissingInitial)
        ));
    }
}
