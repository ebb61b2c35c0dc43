use crate::driver::OptimizerDriver;

use super::{problem::Problem, simulator::Simulator};

/// Common interface for all calibration algorithms.
///
/// The essential method is [`advance`](Algorithm::advance) which performs one
/// iteration of the algorithm: it proposes candidates, submits them through
/// the driver, waits for the results and updates its internal state. The
/// [driver](OptimizerDriver) repeats the calls until the evaluation budget is
/// exhausted.
///
/// The state of an algorithm is owned by the instance and never shared. That
/// includes its random number generator, which is passed at construction.
///
/// ## Implementing an algorithm
///
/// Here is an algorithm that keeps evaluating random points from the domain,
/// one at a time.
///
/// ```rust
/// use transcal::nalgebra::DVector;
/// use transcal::*;
/// use rand::Rng;
///
/// struct Random<R> {
///     domain: Domain,
///     rng: R,
/// }
///
/// impl<P: Problem, S: Simulator, R: Rng> Algorithm<P, S> for Random<R> {
///     const NAME: &'static str = "Random";
///     type Error = EvaluationError;
///
///     fn advance(&mut self, driver: &OptimizerDriver<P, S>) -> Result<(), Self::Error> {
///         let mut x = DVector::zeros(self.domain.dim());
///         self.domain.sample(&mut x, &mut self.rng);
///
///         let id = driver.submit(x, RunConfig::new(), Annotations::new())?;
///         driver.wait(&[id])?;
///         driver.get(id)?;
///         driver.clean(id);
///         Ok(())
///     }
/// }
/// ```
pub trait Algorithm<P: Problem, S: Simulator> {
    /// Name of the algorithm.
    const NAME: &'static str;

    /// Error type of the iteration. It is usual that one of the error kinds is
    /// propagation of the [`EvaluationError`](crate::EvaluationError) from the
    /// driver.
    type Error;

    /// Performs one iteration of the algorithm.
    ///
    /// Implementations must not submit more than one batch of candidates
    /// after [`OptimizerDriver::finished`] becomes true.
    fn advance(&mut self, driver: &OptimizerDriver<P, S>) -> Result<(), Self::Error>;
}
