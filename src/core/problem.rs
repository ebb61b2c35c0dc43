use nalgebra::DVector;
use thiserror::Error;

use super::domain::Domain;

/// The definition of a calibration problem.
///
/// A problem declares the parameter space that algorithms search in. At the
/// very least, the [domain](Domain) must be given, which also determines the
/// dimension. The remaining attributes are capabilities that only some
/// algorithms require. Algorithms check the capabilities they need when they
/// are constructed and fail with [`ConfigurationError`] before any simulation
/// is started.
///
/// For the common case, [`ProblemDescriptor`] implements this trait and
/// avoids the need for a custom type.
pub trait Problem {
    /// Get the domain (bound constraints) of the parameters.
    fn domain(&self) -> Domain;

    /// Dimension of the parameter vector.
    fn dim(&self) -> usize {
        self.domain().dim()
    }

    /// Initial values of the parameters, if known.
    fn initial(&self) -> Option<DVector<f64>> {
        None
    }

    /// Dimension of the auxiliary simulation state vector, if the simulator
    /// exposes one.
    fn number_of_states(&self) -> Option<usize> {
        None
    }
}

/// Error raised when a problem or an algorithm is configured in a way that
/// cannot work. It is always raised before any job is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// The algorithm requires bounded parameters.
    #[error("problem does not declare finite bounds for all parameters")]
    MissingBounds,
    /// The algorithm requires initial values.
    #[error("problem does not declare initial parameter values")]
    MissingInitial,
    /// The algorithm requires a simulation state.
    #[error("problem does not declare the number of states")]
    MissingStates,
    /// The length of a parameter vector does not match the problem.
    #[error("expected {expected} parameters, got {actual}")]
    DimensionMismatch {
        /// Dimension of the problem.
        expected: usize,
        /// Length of the given vector.
        actual: usize,
    },
    /// The candidate set must consist of pairs of symmetric candidates.
    #[error("candidate set size must be even, got {0}")]
    OddCandidateSetSize(usize),
    /// An option has a value outside of its valid range.
    #[error("invalid value of option `{name}`: {reason}")]
    InvalidOption {
        /// Name of the option.
        name: &'static str,
        /// What is wrong.
        reason: &'static str,
    },
}

/// Capability checks on top of [`Problem`] used by the algorithms at
/// construction time.
pub trait ProblemExt: Problem {
    /// Returns the domain if all parameters are bounded.
    fn bounded_domain(&self) -> Result<Domain, ConfigurationError> {
        let dom = self.domain();

        if dom.is_bounded() {
            Ok(dom)
        } else {
            Err(ConfigurationError::MissingBounds)
        }
    }

    /// Returns the initial values, checking their dimension.
    fn required_initial(&self) -> Result<DVector<f64>, ConfigurationError> {
        let initial = self.initial().ok_or(ConfigurationError::MissingInitial)?;
        self.check_dim(&initial)?;
        Ok(initial)
    }

    /// Returns the number of states.
    fn required_states(&self) -> Result<usize, ConfigurationError> {
        match self.number_of_states() {
            Some(0) | None => Err(ConfigurationError::MissingStates),
            Some(states) => Ok(states),
        }
    }

    /// Starting point for local algorithms. These are the initial values if
    /// available, otherwise the center of a bounded domain.
    fn starting_point(&self) -> Result<DVector<f64>, ConfigurationError> {
        match self.initial() {
            Some(initial) => {
                self.check_dim(&initial)?;
                Ok(initial)
            }
            None => self
                .domain()
                .center()
                .ok_or(ConfigurationError::MissingInitial),
        }
    }

    /// Checks that the vector has the dimension of the problem.
    fn check_dim(&self, x: &DVector<f64>) -> Result<(), ConfigurationError> {
        let expected = self.dim();

        if x.nrows() == expected {
            Ok(())
        } else {
            Err(ConfigurationError::DimensionMismatch {
                expected,
                actual: x.nrows(),
            })
        }
    }
}

impl<P: Problem + ?Sized> ProblemExt for P {}

/// A ready-made [`Problem`] assembled from its attributes.
///
/// ```rust
/// use transcal::{Problem, ProblemDescriptor};
///
/// let problem = ProblemDescriptor::bounded([(-5.0, 5.0), (0.0, 1.0)])
///     .with_initial(vec![1.0, 0.5])
///     .with_states(2);
///
/// assert_eq!(problem.dim(), 2);
/// assert_eq!(problem.number_of_states(), Some(2));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ProblemDescriptor {
    domain: Domain,
    initial: Option<DVector<f64>>,
    states: Option<usize>,
}

impl ProblemDescriptor {
    /// Problem with unbounded parameters of given dimension.
    pub fn new(dim: usize) -> Self {
        Self::with_domain(Domain::unconstrained(dim))
    }

    /// Problem with one `(lower, upper)` pair per parameter.
    pub fn bounded<I: IntoIterator<Item = (f64, f64)>>(bounds: I) -> Self {
        Self::with_domain(bounds.into_iter().collect())
    }

    /// Problem over the given domain.
    pub fn with_domain(domain: Domain) -> Self {
        Self {
            domain,
            initial: None,
            states: None,
        }
    }

    /// Sets the initial parameter values.
    pub fn with_initial(mut self, initial: Vec<f64>) -> Self {
        assert_eq!(
            initial.len(),
            self.domain.dim(),
            "initial values have invalid dimension"
        );

        self.initial = Some(DVector::from_vec(initial));
        self
    }

    /// Sets the dimension of the simulation state.
    pub fn with_states(mut self, states: usize) -> Self {
        self.states = Some(states);
        self
    }
}

impl Problem for ProblemDescriptor {
    fn domain(&self) -> Domain {
        self.domain.clone()
    }

    fn dim(&self) -> usize {
        self.domain.dim()
    }

    fn initial(&self) -> Option<DVector<f64>> {
        self.initial.clone()
    }

    fn number_of_states(&self) -> Option<usize> {
        self.states
    }
}
