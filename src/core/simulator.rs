use std::fmt;

use nalgebra::DVector;
use serde::Serialize;
use thiserror::Error;

/// Identifier of a simulation job.
///
/// Identifiers are sequence numbers issued by the [`Evaluator`](crate::Evaluator)
/// and never reused within a run, so that a stale identifier is detected
/// instead of silently referring to a different job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(pub(crate) u64);

impl JobId {
    /// The sequence number of the job.
    pub fn index(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Configuration of a single simulation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunConfig {
    /// Number of simulation iterations. `None` leaves the choice to the
    /// evaluator defaults or the simulator itself.
    pub iterations: Option<usize>,
    /// Job whose terminal state the run resumes from.
    pub restart: Option<JobId>,
}

impl RunConfig {
    /// Empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of simulation iterations.
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = Some(iterations);
        self
    }

    /// Resumes the run from the terminal state of the given job.
    pub fn with_restart(mut self, restart: JobId) -> Self {
        self.restart = Some(restart);
        self
    }

    /// Fills the fields that are not set from `defaults`.
    pub fn or(self, defaults: &RunConfig) -> Self {
        Self {
            iterations: self.iterations.or(defaults.iterations),
            restart: self.restart.or(defaults.restart),
        }
    }
}

/// Result of a finished simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Objective value. Lower is better.
    pub objective: f64,
    /// Auxiliary simulation state, if the simulator exposes one.
    pub state: Option<DVector<f64>>,
}

impl Outcome {
    /// Outcome without a state.
    pub fn new(objective: f64) -> Self {
        Self {
            objective,
            state: None,
        }
    }

    /// Outcome with a state.
    pub fn with_state(objective: f64, state: DVector<f64>) -> Self {
        Self {
            objective,
            state: Some(state),
        }
    }
}

/// Terminal state of a finished job that a new run resumes from.
///
/// The outcome is handed over exactly as it was cached, so that a simulator
/// can continue bit for bit from where the previous run stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct Restart {
    /// Job that produced the state.
    pub id: JobId,
    /// Parameters of that job.
    pub parameters: DVector<f64>,
    /// Its cached outcome.
    pub outcome: Outcome,
}

/// Error returned from a [`Simulator`].
#[derive(Debug, Error)]
pub enum SimulationError {
    /// The parameters cannot be simulated.
    #[error("invalid parameters")]
    InvalidParameters,
    /// The restart state is not compatible with the run.
    #[error("cannot restart from job {0}")]
    InvalidRestart(JobId),
    /// The simulator panicked.
    #[error("simulator panicked: {0}")]
    Panicked(String),
    /// Custom error specific to the simulator.
    #[error("{0}")]
    Custom(Box<dyn std::error::Error + Send + Sync>),
}

/// The simulator to be calibrated.
///
/// Given parameters and a run configuration, the simulator produces an
/// objective value and optionally an auxiliary state vector. When `restart`
/// is given, the run must resume exactly from that terminal state.
/// Algorithms like [Opdyts](crate::algo::opdyts) compute state deltas under
/// this assumption.
///
/// Runs may be dispatched on worker threads, hence the `Send + Sync` bound.
///
/// ```rust
/// use transcal::nalgebra::DVector;
/// use transcal::{Outcome, Restart, RunConfig, SimulationError, Simulator};
///
/// struct Parabola;
///
/// impl Simulator for Parabola {
///     fn run(
///         &self,
///         parameters: &DVector<f64>,
///         _config: &RunConfig,
///         _restart: Option<&Restart>,
///     ) -> Result<Outcome, SimulationError> {
///         Ok(Outcome::new(parameters.norm_squared()))
///     }
/// }
/// ```
pub trait Simulator: Send + Sync + 'static {
    /// Runs the simulation to completion.
    fn run(
        &self,
        parameters: &DVector<f64>,
        config: &RunConfig,
        restart: Option<&Restart>,
    ) -> Result<Outcome, SimulationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_config_defaults_fill_unset_fields() {
        let defaults = RunConfig::new().with_iterations(10);

        let config = RunConfig::new().with_restart(JobId(3)).or(&defaults);
        assert_eq!(config.iterations, Some(10));
        assert_eq!(config.restart, Some(JobId(3)));

        let config = RunConfig::new().with_iterations(1).or(&defaults);
        assert_eq!(config.iterations, Some(1));
        assert_eq!(config.restart, None);
    }
}
