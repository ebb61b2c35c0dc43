//! Simultaneous perturbation stochastic approximation.
//!
//! SPSA estimates the gradient of a noisy objective from only two
//! evaluations per iteration, no matter the dimension. All parameters are
//! perturbed at once along a random direction with components ±1:
//!
//! ```text
//! c_k = c / (k + 1)^gamma
//! a_k = a / (k + 1 + A)^alpha
//!
//! g_k = (f(theta + c_k delta) - f(theta - c_k delta)) / (2 c_k delta)
//! theta <- theta - a_k g_k
//! ```
//!
//! The update is not projected onto the bounds of the problem unless
//! [`SpsaOptions::set_project`] is enabled.
//!
//! # References
//!
//! \[1\] [An Overview of the Simultaneous Perturbation Method for Efficient
//! Optimization](https://www.jhuapl.edu/SPSA/PDF-SPSA/Spall_An_Overview.PDF)
//!
//! \[2\] [Implementation of the Simultaneous Perturbation Algorithm for
//! Stochastic Optimization](https://doi.org/10.1109/7.705889)

use getset::{CopyGetters, Setters};
use nalgebra::DVector;
use rand::Rng;

use crate::core::{
    Algorithm, ConfigurationError, Domain, Logger, Problem, ProblemExt, RunConfig, Simulator,
};
use crate::driver::OptimizerDriver;
use crate::evaluator::{Annotations, EvaluationError};

/// Options for [`Spsa`] algorithm.
#[derive(Debug, Clone, CopyGetters, Setters)]
#[getset(get_copy = "pub", set = "pub")]
pub struct SpsaOptions {
    /// Factor `c` of the perturbation magnitude.
    perturbation_factor: f64,
    /// Exponent `gamma` of the perturbation decay.
    perturbation_exponent: f64,
    /// Factor `a` of the gain.
    gain_factor: f64,
    /// Exponent `alpha` of the gain decay.
    gain_exponent: f64,
    /// Offset `A` delaying the gain decay.
    stability_offset: f64,
    /// Project the parameters onto the domain after every update.
    project: bool,
}

impl Default for SpsaOptions {
    fn default() -> Self {
        Self {
            perturbation_factor: 0.01,
            perturbation_exponent: 0.101,
            gain_factor: 0.25,
            gain_exponent: 0.602,
            stability_offset: 0.0,
            project: false,
        }
    }
}

impl SpsaOptions {
    /// Perturbation magnitude `c_k` in iteration `k`.
    pub fn perturbation(&self, k: usize) -> f64 {
        self.perturbation_factor / ((k + 1) as f64).powf(self.perturbation_exponent)
    }

    /// Gain `a_k` in iteration `k`.
    pub fn gain(&self, k: usize) -> f64 {
        self.gain_factor / ((k + 1) as f64 + self.stability_offset).powf(self.gain_exponent)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.perturbation_factor > 0.0) {
            return Err(ConfigurationError::InvalidOption {
                name: "perturbation_factor",
                reason: "must be positive",
            });
        }

        if !(self.gain_factor > 0.0) {
            return Err(ConfigurationError::InvalidOption {
                name: "gain_factor",
                reason: "must be positive",
            });
        }

        Ok(())
    }
}

/// SPSA algorithm. See [module](self) documentation for more details.
pub struct Spsa<R> {
    options: SpsaOptions,
    dom: Domain,
    theta: DVector<f64>,
    rng: R,
    iter: usize,
    logger: Logger,
}

impl<R: Rng> Spsa<R> {
    /// Initializes SPSA algorithm with default options.
    pub fn new<P: Problem>(problem: &P, rng: R) -> Result<Self, ConfigurationError> {
        Self::with_options(problem, SpsaOptions::default(), rng)
    }

    /// Initializes SPSA algorithm with given options.
    ///
    /// The search starts from the initial values of the problem, or from the
    /// center of its domain if it is bounded.
    pub fn with_options<P: Problem>(
        problem: &P,
        options: SpsaOptions,
        rng: R,
    ) -> Result<Self, ConfigurationError> {
        options.validate()?;

        Ok(Self {
            options,
            dom: problem.domain(),
            theta: problem.starting_point()?,
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

    /// Current parameters.
    pub fn theta(&self) -> &DVector<f64> {
        &self.theta
    }

    /// Number of finished iterations.
    pub fn iter(&self) -> usize {
        self.iter
    }
}

impl<P: Problem, S: Simulator, R: Rng> Algorithm<P, S> for Spsa<R> {
    const NAME: &'static str = "SPSA";

    type Error = EvaluationError;

    fn advance(&mut self, driver: &OptimizerDriver<P, S>) -> Result<(), Self::Error> {
        let k = self.iter;
        let ck = self.options.perturbation(k);
        let ak = self.options.gain(k);

        self.logger.info(format_args!(
            "SPSA iteration {}: c_k = {}, a_k = {}",
            k, ck, ak
        ));

        let rng = &mut self.rng;
        let delta = DVector::from_fn(self.theta.nrows(), |_, _| {
            if rng.gen_bool(0.5) {
                1.0
            } else {
                -1.0
            }
        });

        let annotations = |sign: &str| {
            Annotations::new()
                .with("type", "gradient")
                .with("iteration", k)
                .with("sign", sign)
                .with("perturbation", ck)
        };

        let plus = driver.submit(
            &self.theta + &delta * ck,
            RunConfig::new(),
            annotations("+"),
        )?;
        let minus = driver.submit(
            &self.theta - &delta * ck,
            RunConfig::new(),
            annotations("-"),
        )?;

        driver.wait(&[plus, minus])?;

        let f_plus = driver.get(plus)?.objective;
        let f_minus = driver.get(minus)?.objective;
        driver.clean(plus);
        driver.clean(minus);

        let gradient = delta.map(|di| (f_plus - f_minus) / (2.0 * ck * di));
        self.theta -= gradient * ak;

        if self.options.project {
            self.dom.project(&mut self.theta);
        }

        self.logger.debug(format_args!(
            "f+ = {}, f- = {}, theta = {:?}",
            f_plus,
            f_minus,
            self.theta.as_slice()
        ));

        self.iter += 1;
        Ok(())
    }
}
