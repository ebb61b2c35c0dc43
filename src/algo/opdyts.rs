//! Optimization of dynamic transport simulations.
//!
//! Opdyts is designed for simulators whose convergence to an equilibrium is
//! itself expensive. Instead of running every candidate to equilibrium, it
//! advances a set of candidates by one transition at a time and decides which
//! one to advance next by trading off three quantities of a probability
//! distribution `alpha` over the candidates:
//!
//! * transient performance `sum(alpha_i f_i)`, the expected objective value,
//! * equilibrium gap `|sum(alpha_i delta_i)|`, the drift of the simulation
//!   state caused by the last transitions,
//! * uniformity gap `sum(alpha_i^2)`, which penalizes concentration on few
//!   candidates.
//!
//! The weights `v` and `w` of the two gaps are fitted after every round from
//! the observed performance of the selected candidates.
//!
//! A round proceeds as follows:
//!
//! 1. Propose `K` candidates as symmetric pairs `theta +- L d` around the
//!    reference point, with `d` drawn uniformly from `[-1, 1]^N`, and run one
//!    transition of each, restarted from the reference job.
//! 2. Repeatedly solve the approximate selection problem for `alpha`, draw a
//!    candidate from it and advance it by one transition, until a candidate
//!    has made `T` transitions.
//! 3. Promote that candidate to the new reference and solve the adaptation
//!    problem for `v` and `w`.
//!
//! If the calibration finishes while candidates are still transitioning, the
//! round is discarded and the reference point stays unchanged. The initial
//! job and the candidates of a round are always submitted as a whole.
//!
//! The algorithm requires the problem to declare initial values and the
//! number of states, and the simulator to return a state and support
//! restarts.
//!
//! # References
//!
//! \[1\] [Simulation-based optimization of large agent-based transport models
//! with dynamic transient states](https://doi.org/10.1287/trsc.2015.0623)

use getset::{CopyGetters, Setters};
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use serde::Serialize;
use thiserror::Error;

use crate::core::{
    Algorithm, ConfigurationError, Domain, JobId, Logger, Problem, ProblemExt, RunConfig,
    Simulator,
};
use crate::driver::OptimizerDriver;
use crate::evaluator::{Annotations, EvaluationError};
use crate::subproblem::{
    project_onto_simplex, Cobyla, ProjectedGradient, Subproblem, SubsolverError,
};

/// Options for [`Opdyts`] algorithm.
#[derive(Debug, Clone, CopyGetters, Setters)]
#[getset(get_copy = "pub", set = "pub")]
pub struct OpdytsOptions {
    /// Number of candidates per round. Must be even.
    candidate_set_size: usize,
    /// Number of transitions the selected candidate makes in a round.
    number_of_transitions: usize,
    /// Scale of the random perturbations of the reference point.
    perturbation_length: f64,
    /// Decay of older rounds in the adaptation problem.
    adaptation_weight: f64,
}

impl Default for OpdytsOptions {
    fn default() -> Self {
        Self {
            candidate_set_size: 4,
            number_of_transitions: 4,
            perturbation_length: 1.0,
            adaptation_weight: 0.3,
        }
    }
}

impl OpdytsOptions {
    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.candidate_set_size % 2 != 0 {
            return Err(ConfigurationError::OddCandidateSetSize(
                self.candidate_set_size,
            ));
        }

        if self.candidate_set_size == 0 {
            return Err(ConfigurationError::InvalidOption {
                name: "candidate_set_size",
                reason: "must be positive",
            });
        }

        if self.number_of_transitions == 0 {
            return Err(ConfigurationError::InvalidOption {
                name: "number_of_transitions",
                reason: "must be positive",
            });
        }

        if !(self.perturbation_length > 0.0) {
            return Err(ConfigurationError::InvalidOption {
                name: "perturbation_length",
                reason: "must be positive",
            });
        }

        if !(self.adaptation_weight > 0.0) {
            return Err(ConfigurationError::InvalidOption {
                name: "adaptation_weight",
                reason: "must be positive",
            });
        }

        Ok(())
    }
}

/// Error returned from [`Opdyts`] algorithm.
#[derive(Debug, Error)]
pub enum OpdytsError {
    /// Evaluation of a job failed.
    #[error("{0}")]
    Evaluation(#[from] EvaluationError),
    /// The approximate selection problem could not be solved.
    #[error("approximate selection problem failed (v = {v}, w = {w})")]
    Selection {
        /// Error of the sub-solver.
        source: SubsolverError,
        /// Weight of the equilibrium gap.
        v: f64,
        /// Weight of the uniformity gap.
        w: f64,
        /// State deltas of the candidates, one per row.
        deltas: DMatrix<f64>,
        /// Objective values of the candidates.
        objectives: DVector<f64>,
    },
    /// The adaptation problem could not be solved.
    #[error("adaptation problem failed after {rounds} rounds")]
    Adaptation {
        /// Error of the sub-solver.
        source: SubsolverError,
        /// Number of recorded rounds.
        rounds: usize,
    },
    /// The simulator returned no state or a state of wrong length.
    #[error("job {id} returned state of length {actual:?}, expected {expected}")]
    StateMismatch {
        /// The job.
        id: JobId,
        /// Number of states of the problem.
        expected: usize,
        /// Length of the returned state, if any.
        actual: Option<usize>,
    },
}

/// The job that the candidates of a round are restarted from.
#[derive(Debug, Clone)]
pub struct Reference {
    /// Job of the reference point.
    pub id: JobId,
    /// Parameters of the reference point.
    pub parameters: DVector<f64>,
    /// Final state of the job.
    pub state: DVector<f64>,
    /// Objective value of the job.
    pub objective: f64,
}

/// Quantities of the selection distribution before one transition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransitionRecord {
    /// Expected objective value.
    pub transient_performance: f64,
    /// Norm of the expected state delta.
    pub equilibrium_gap: f64,
    /// Sum of squared probabilities.
    pub uniformity_gap: f64,
}

/// Summary of a finished round, used to fit the gap weights.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundRecord {
    /// Objective value of the promoted candidate.
    pub selection_performance: f64,
    /// Records of all transitions in the round, in order.
    pub transitions: Vec<TransitionRecord>,
}

/// Finds the distribution over the candidates that minimizes the weighted
/// sum of transient performance, equilibrium gap and uniformity gap.
#[derive(Debug, Clone)]
pub struct ApproximateSelectionProblem<'a> {
    v: f64,
    w: f64,
    deltas: &'a DMatrix<f64>,
    objectives: &'a DVector<f64>,
}

impl<'a> ApproximateSelectionProblem<'a> {
    /// Initializes the problem. Row `i` of `deltas` is the state delta of
    /// candidate `i`.
    pub(crate) fn new(
        v: f64,
        w: f64,
        deltas: &'a DMatrix<f64>,
        objectives: &'a DVector<f64>,
    ) -> Self {
        debug_assert_eq!(deltas.nrows(), objectives.nrows(), "candidate count mismatch");
        Self {
            v,
            w,
            deltas,
            objectives,
        }
    }

    /// Expected objective value under `alpha`.
    pub fn transient_performance(&self, alpha: &DVector<f64>) -> f64 {
        alpha.dot(self.objectives)
    }

    /// Norm of the expected state delta under `alpha`.
    pub fn equilibrium_gap(&self, alpha: &DVector<f64>) -> f64 {
        self.expected_delta(alpha).norm()
    }

    /// Sum of squared probabilities.
    pub fn uniformity_gap(&self, alpha: &DVector<f64>) -> f64 {
        alpha.norm_squared()
    }

    /// All three quantities at once.
    pub fn record(&self, alpha: &DVector<f64>) -> TransitionRecord {
        TransitionRecord {
            transient_performance: self.transient_performance(alpha),
            equilibrium_gap: self.equilibrium_gap(alpha),
            uniformity_gap: self.uniformity_gap(alpha),
        }
    }

    /// Value of the weighted sum under `alpha`.
    pub fn objective(&self, alpha: &DVector<f64>) -> f64 {
        self.transient_performance(alpha)
            + self.v * self.equilibrium_gap(alpha)
            + self.w * self.uniformity_gap(alpha)
    }

    /// Solves the problem starting from the uniform distribution.
    ///
    /// The sum constraint is passed as a pair of inequalities. The solution is
    /// projected onto the simplex to remove the remaining constraint
    /// violation.
    pub fn solve(&self) -> Result<DVector<f64>, SubsolverError> {
        let k = self.objectives.nrows();

        let objective =
            |alpha: &[f64], _: &mut ()| self.objective(&DVector::from_column_slice(alpha));
        let at_least_one = |alpha: &[f64], _: &mut ()| alpha.iter().sum::<f64>() - 1.0;
        let at_most_one = |alpha: &[f64], _: &mut ()| 1.0 - alpha.iter().sum::<f64>();
        let constraints: Vec<&dyn cobyla::Func<()>> = vec![&at_least_one, &at_most_one];

        let uniform = vec![1.0 / k as f64; k];
        let bounds = vec![(0.0, 1.0); k];

        let alpha = Cobyla::new().minimize(objective, &constraints, &uniform, &bounds)?;

        let mut alpha = DVector::from_vec(alpha);
        project_onto_simplex(&mut alpha);
        Ok(alpha)
    }

    fn expected_delta(&self, alpha: &DVector<f64>) -> DVector<f64> {
        self.deltas.tr_mul(alpha)
    }
}

/// Fits the gap weights `v` and `w` in `[0, 1]` to the history of rounds.
///
/// For round `r` of `R` and its transition `t`, the residual is
/// `|tp_rt - sp_r| - v eq_rt - w ug_rt` and its square is weighted by
/// `adaptation_weight^(R - r)`.
#[derive(Debug, Clone)]
pub struct AdaptationProblem<'a> {
    weight: f64,
    rounds: &'a [RoundRecord],
    dom: Domain,
}

impl<'a> AdaptationProblem<'a> {
    /// Initializes the problem.
    pub fn new(weight: f64, rounds: &'a [RoundRecord]) -> Self {
        Self {
            weight,
            rounds,
            dom: [(0.0, 1.0), (0.0, 1.0)].into_iter().collect(),
        }
    }

    /// Solves the problem starting from given weights.
    pub fn solve(&self, v: f64, w: f64) -> Result<(f64, f64), SubsolverError> {
        let vw = ProjectedGradient::new().minimize(self, DVector::from_column_slice(&[v, w]))?;
        Ok((vw[0], vw[1]))
    }

    fn terms(&self) -> impl Iterator<Item = (f64, f64, &TransitionRecord)> + '_ {
        let count = self.rounds.len();

        self.rounds.iter().enumerate().flat_map(move |(r, round)| {
            let decay = self.weight.powi((count - r) as i32);
            let selection = round.selection_performance;

            round
                .transitions
                .iter()
                .map(move |transition| (decay, selection, transition))
        })
    }

    fn residual(v: f64, w: f64, selection: f64, transition: &TransitionRecord) -> f64 {
        (transition.transient_performance - selection).abs()
            - v * transition.equilibrium_gap
            - w * transition.uniformity_gap
    }
}

impl Subproblem for AdaptationProblem<'_> {
    fn objective(&self, vw: &DVector<f64>) -> f64 {
        self.terms()
            .map(|(decay, selection, transition)| {
                decay * Self::residual(vw[0], vw[1], selection, transition).powi(2)
            })
            .sum()
    }

    fn gradient(&self, vw: &DVector<f64>, grad: &mut DVector<f64>) {
        grad.fill(0.0);

        for (decay, selection, transition) in self.terms() {
            let e = Self::residual(vw[0], vw[1], selection, transition);
            grad[0] -= 2.0 * decay * e * transition.equilibrium_gap;
            grad[1] -= 2.0 * decay * e * transition.uniformity_gap;
        }
    }

    fn project(&self, vw: &mut DVector<f64>) {
        self.dom.project(vw);
    }
}

/// Opdyts algorithm. See [module](self) documentation for more details.
pub struct Opdyts<R> {
    options: OpdytsOptions,
    initial: DVector<f64>,
    states: usize,
    reference: Option<Reference>,
    v: f64,
    w: f64,
    history: Vec<RoundRecord>,
    round: usize,
    rng: R,
    logger: Logger,
}

impl<R: Rng> Opdyts<R> {
    /// Initializes Opdyts algorithm with default options.
    pub fn new<P: Problem>(problem: &P, rng: R) -> Result<Self, ConfigurationError> {
        Self::with_options(problem, OpdytsOptions::default(), rng)
    }

    /// Initializes Opdyts algorithm with given options.
    ///
    /// Fails if the candidate set size is odd or the problem does not declare
    /// initial values and the number of states.
    pub fn with_options<P: Problem>(
        problem: &P,
        options: OpdytsOptions,
        rng: R,
    ) -> Result<Self, ConfigurationError> {
        options.validate()?;

        Ok(Self {
            options,
            initial: problem.required_initial()?,
            states: problem.required_states()?,
            reference: None,
            v: 0.0,
            w: 0.0,
            history: Vec::new(),
            round: 0,
            rng,
            logger: Logger::default(),
        })
    }

    /// Sets the logger.
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Weight of the equilibrium gap.
    pub fn v(&self) -> f64 {
        self.v
    }

    /// Weight of the uniformity gap.
    pub fn w(&self) -> f64 {
        self.w
    }

    /// Records of all finished rounds.
    pub fn history(&self) -> &[RoundRecord] {
        &self.history
    }

    /// Current reference point. Not available before the first iteration.
    pub fn reference(&self) -> Option<&Reference> {
        self.reference.as_ref()
    }

    /// Number of finished rounds.
    pub fn round(&self) -> usize {
        self.round
    }

    fn state(&self, id: JobId, state: Option<DVector<f64>>) -> Result<DVector<f64>, OpdytsError> {
        match state {
            Some(state) if state.nrows() == self.states => Ok(state),
            state => Err(OpdytsError::StateMismatch {
                id,
                expected: self.states,
                actual: state.map(|state| state.nrows()),
            }),
        }
    }

    fn initialize<P: Problem, S: Simulator>(
        &self,
        driver: &OptimizerDriver<P, S>,
    ) -> Result<Reference, OpdytsError> {
        self.logger.info(format_args!("initializing Opdyts"));

        let annotations = Annotations::new()
            .with("type", "initial")
            .with("transient", true);

        let id = driver.submit(
            self.initial.clone(),
            RunConfig::new().with_iterations(1),
            annotations,
        )?;
        driver.wait(&[id])?;
        let outcome = driver.get(id)?;

        Ok(Reference {
            id,
            parameters: self.initial.clone(),
            state: self.state(id, outcome.state)?,
            objective: outcome.objective,
        })
    }
}

/// Candidates of a single round.
struct Candidates {
    ids: Vec<JobId>,
    parameters: Vec<DVector<f64>>,
    states: Vec<DVector<f64>>,
    deltas: DMatrix<f64>,
    objectives: DVector<f64>,
    transitions: Vec<usize>,
}

impl<P: Problem, S: Simulator, R: Rng> Algorithm<P, S> for Opdyts<R> {
    const NAME: &'static str = "Opdyts";

    type Error = OpdytsError;

    fn advance(&mut self, driver: &OptimizerDriver<P, S>) -> Result<(), Self::Error> {
        let reference = match &self.reference {
            Some(reference) => reference.clone(),
            None => {
                let reference = self.initialize(driver)?;
                self.reference = Some(reference.clone());
                reference
            }
        };

        let OpdytsOptions {
            candidate_set_size: k,
            number_of_transitions,
            perturbation_length,
            adaptation_weight,
        } = self.options;

        let n = reference.parameters.nrows();

        self.logger.info(format_args!(
            "Opdyts round {}: v = {}, w = {}",
            self.round, self.v, self.w
        ));

        let mut parameters = Vec::with_capacity(k);
        for _ in 0..k / 2 {
            let rng = &mut self.rng;
            let direction = DVector::from_fn(n, |_, _| rng.gen_range(-1.0..=1.0));
            let step = direction * perturbation_length;

            parameters.push(&reference.parameters + &step);
            parameters.push(&reference.parameters - &step);
        }

        let annotations = Annotations::new()
            .with("type", "candidate")
            .with("v", self.v)
            .with("w", self.w)
            .with("transient", true)
            .with("iteration", self.round);

        let mut ids = Vec::with_capacity(k);
        for (c, x) in parameters.iter().enumerate() {
            let id = driver.submit(
                x.clone(),
                RunConfig::new().with_restart(reference.id),
                annotations.clone().with("candidate", c),
            )?;
            ids.push(id);
        }

        driver.wait(&ids)?;

        let mut candidates = Candidates {
            ids,
            parameters,
            states: Vec::with_capacity(k),
            deltas: DMatrix::zeros(k, self.states),
            objectives: DVector::zeros(k),
            transitions: vec![1; k],
        };

        for c in 0..k {
            let id = candidates.ids[c];
            let outcome = driver.get(id)?;
            let state = self.state(id, outcome.state)?;

            candidates
                .deltas
                .set_row(c, &(&state - &reference.state).transpose());
            candidates.objectives[c] = outcome.objective;
            candidates.states.push(state);
        }

        let mut transitions = Vec::new();

        while candidates.transitions.iter().copied().max().unwrap_or(0) < number_of_transitions {
            if driver.finished() {
                // The reference stays, the unfinished round is not recorded.
                self.logger.info(format_args!(
                    "calibration finished during Opdyts round {}, discarding its candidates",
                    self.round
                ));

                for id in &candidates.ids {
                    driver.clean(*id);
                }

                return Ok(());
            }

            let selection =
                ApproximateSelectionProblem::new(self.v, self.w, &candidates.deltas, &candidates.objectives);

            let alpha = selection.solve().map_err(|source| OpdytsError::Selection {
                source,
                v: self.v,
                w: self.w,
                deltas: candidates.deltas.clone(),
                objectives: candidates.objectives.clone(),
            })?;

            let record = selection.record(&alpha);
            transitions.push(record);

            self.logger.debug(format_args!(
                "transient performance = {}, equilibrium gap = {}, uniformity gap = {}",
                record.transient_performance, record.equilibrium_gap, record.uniformity_gap
            ));

            let u = self.rng.gen::<f64>();
            let mut cumulative = 0.0;
            let mut c = 0;
            for ai in alpha.iter() {
                cumulative += ai;
                if u > cumulative {
                    c += 1;
                }
            }
            let c = c.min(k - 1);

            candidates.transitions[c] += 1;
            let transient = candidates.transitions[c] < number_of_transitions;

            self.logger.debug(format_args!("transitioning candidate {}", c));

            let annotations = Annotations::new()
                .with("type", "transition")
                .with("v", self.v)
                .with("w", self.w)
                .with("iteration", self.round)
                .with("candidate", c)
                .with("transient_performance", record.transient_performance)
                .with("equilibrium_gap", record.equilibrium_gap)
                .with("uniformity_gap", record.uniformity_gap)
                .with("transient", transient);

            let previous = candidates.ids[c];
            let id = driver.submit(
                candidates.parameters[c].clone(),
                RunConfig::new().with_restart(previous),
                annotations,
            )?;
            driver.wait(&[id])?;
            let outcome = driver.get(id)?;
            driver.clean(previous);

            let state = self.state(id, outcome.state)?;
            candidates
                .deltas
                .set_row(c, &(&state - &candidates.states[c]).transpose());
            candidates.states[c] = state;
            candidates.objectives[c] = outcome.objective;
            candidates.ids[c] = id;
        }

        let mut index = 0;
        for (c, count) in candidates.transitions.iter().enumerate() {
            if *count > candidates.transitions[index] {
                index = c;
            }
        }

        self.logger.info(format_args!(
            "selected candidate {} with objective {}",
            index, candidates.objectives[index]
        ));

        for (c, id) in candidates.ids.iter().enumerate() {
            if c != index {
                driver.clean(*id);
            }
        }
        driver.clean(reference.id);

        self.reference = Some(Reference {
            id: candidates.ids[index],
            parameters: candidates.parameters.swap_remove(index),
            state: candidates.states.swap_remove(index),
            objective: candidates.objectives[index],
        });

        self.history.push(RoundRecord {
            selection_performance: candidates.objectives[index],
            transitions,
        });

        let adaptation = AdaptationProblem::new(adaptation_weight, &self.history);
        let (v, w) = adaptation
            .solve(self.v, self.w)
            .map_err(|source| OpdytsError::Adaptation {
                source,
                rounds: self.history.len(),
            })?;

        self.v = v;
        self.w = w;

        self.logger.info(format_args!(
            "solved adaptation problem: v = {}, w = {}",
            self.v, self.w
        ));

        self.round += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use nalgebra::dvector;
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::core::{Outcome, Restart, SimulationError};
    use crate::testing::*;
    use crate::{Evaluator, ProblemDescriptor};

    fn problem() -> ProblemDescriptor {
        ProblemDescriptor::new(2)
            .with_initial(vec![1.0, 1.0])
            .with_states(2)
    }

    fn options() -> OpdytsOptions {
        let mut options = OpdytsOptions::default();
        options.set_perturbation_length(0.5);
        options
    }

    fn run(seed: u64) -> (Opdyts<StdRng>, OptimizerDriver<ProblemDescriptor, Relaxation>) {
        let problem = problem();
        let mut algo =
            Opdyts::with_options(&problem, options(), StdRng::seed_from_u64(seed)).unwrap();

        let driver = OptimizerDriver::builder(
            problem,
            Evaluator::new(Relaxation::new(vec![2.0, 4.0], 0.5)),
        )
        .with_maximum_evaluations(120)
        .build();
        driver.run(&mut algo).unwrap();

        (algo, driver)
    }

    #[test]
    fn relaxation() {
        let (algo, driver) = run(0);
        let simulator = Relaxation::new(vec![2.0, 4.0], 0.5);

        let reference = algo.reference().unwrap();
        assert!(simulator.objective(&reference.parameters) < 3.0);
        assert!(driver.best_objective() < 1.5);

        assert!((0.0..=1.0).contains(&algo.v()));
        assert!((0.0..=1.0).contains(&algo.w()));
        assert_eq!(algo.history().len(), algo.round());

        // Only the reference job stays in the cache.
        assert_eq!(driver.evaluator().cached(), 1);
    }

    #[test]
    fn rounds_follow_the_transition_target() {
        let problem = problem();
        let mut algo = Opdyts::with_options(&problem, options(), StdRng::seed_from_u64(1)).unwrap();

        let driver = OptimizerDriver::new(
            problem,
            Evaluator::new(Relaxation::new(vec![2.0, 4.0], 0.5)),
        );
        driver.step(&mut algo).unwrap();

        let round = &algo.history()[0];
        // At least three more transitions of the selected candidate, at most
        // three of every candidate.
        assert!(round.transitions.len() >= 3);
        assert!(round.transitions.len() <= 4 * 3);
        assert_eq!(driver.evaluations(), 1 + 4 + round.transitions.len());
        assert_eq!(round.selection_performance, algo.reference().unwrap().objective);
    }

    #[test]
    fn seeded_runs_are_identical() {
        let parameters = |seed: u64| {
            run(seed)
                .1
                .history()
                .iter()
                .map(|evaluation| evaluation.parameters().clone())
                .collect::<Vec<_>>()
        };

        assert_eq!(parameters(3), parameters(3));
        assert_ne!(parameters(3), parameters(4));
    }

    #[test]
    fn odd_candidate_set_size_is_rejected() {
        let mut options = OpdytsOptions::default();
        options.set_candidate_set_size(3);

        let problem = problem();
        let evaluator = Evaluator::new(Relaxation::new(vec![2.0, 4.0], 0.5));

        assert!(matches!(
            Opdyts::with_options(&problem, options, StdRng::seed_from_u64(0)),
            Err(ConfigurationError::OddCandidateSetSize(3))
        ));
        assert_eq!(evaluator.submitted(), 0);
    }

    #[test]
    fn missing_problem_attributes_are_rejected() {
        assert!(matches!(
            Opdyts::new(&ProblemDescriptor::new(2).with_states(2), StdRng::seed_from_u64(0)),
            Err(ConfigurationError::MissingInitial)
        ));
        assert!(matches!(
            Opdyts::new(
                &ProblemDescriptor::new(2).with_initial(vec![0.0, 0.0]),
                StdRng::seed_from_u64(0)
            ),
            Err(ConfigurationError::MissingStates)
        ));
    }

    struct Stateless;

    impl Simulator for Stateless {
        fn run(
            &self,
            parameters: &DVector<f64>,
            _: &RunConfig,
            _: Option<&Restart>,
        ) -> Result<Outcome, SimulationError> {
            Ok(Outcome::new(parameters.norm_squared()))
        }
    }

    #[test]
    fn missing_state_is_reported() {
        let problem = problem();
        let mut algo = Opdyts::new(&problem, StdRng::seed_from_u64(0)).unwrap();
        let driver = OptimizerDriver::new(problem, Evaluator::new(Stateless));

        assert!(matches!(
            driver.step(&mut algo),
            Err(OpdytsError::StateMismatch {
                expected: 2,
                actual: None,
                ..
            })
        ));
        assert_eq!(driver.evaluations(), 1);

        let problem = ProblemDescriptor::new(2)
            .with_initial(vec![1.0, 1.0])
            .with_states(3);
        let mut algo = Opdyts::new(&problem, StdRng::seed_from_u64(0)).unwrap();
        let driver = OptimizerDriver::new(
            problem,
            Evaluator::new(Relaxation::new(vec![2.0, 4.0], 0.5)),
        );

        assert!(matches!(
            driver.step(&mut algo),
            Err(OpdytsError::StateMismatch {
                expected: 3,
                actual: Some(2),
                ..
            })
        ));
    }

    #[test]
    fn selection_lies_on_simplex() {
        let mut rng = StdRng::seed_from_u64(9);

        for _ in 0..20 {
            let k = rng.gen_range(2..8usize);
            let m = rng.gen_range(1..5usize);
            let deltas = DMatrix::from_fn(k, m, |_, _| rng.gen_range(-2.0..2.0));
            let objectives = DVector::from_fn(k, |_, _| rng.gen_range(0.0..10.0));
            let v = rng.gen::<f64>();
            let w = rng.gen::<f64>();

            let alpha = ApproximateSelectionProblem::new(v, w, &deltas, &objectives)
                .solve()
                .unwrap();

            assert_abs_diff_eq!(alpha.sum(), 1.0, epsilon = 1e-9);
            assert!(alpha.iter().all(|ai| (0.0..=1.0).contains(ai)));
        }
    }

    #[test]
    fn selection_prefers_better_candidates() {
        let deltas = DMatrix::zeros(2, 1);
        let objectives = dvector![1.0, 2.0];

        // Without the uniformity gap all mass goes to the better candidate.
        let alpha = ApproximateSelectionProblem::new(0.0, 0.0, &deltas, &objectives)
            .solve()
            .unwrap();
        assert_abs_diff_eq!(alpha, dvector![1.0, 0.0], epsilon = 1e-6);

        // With w = 1, the minimum of a1 + 2 a2 + a1^2 + a2^2 is at (0.75, 0.25).
        let problem = ApproximateSelectionProblem::new(0.0, 1.0, &deltas, &objectives);
        let alpha = problem.solve().unwrap();
        assert_abs_diff_eq!(alpha, dvector![0.75, 0.25], epsilon = 1e-4);
        assert_abs_diff_eq!(problem.uniformity_gap(&alpha), 0.625, epsilon = 1e-4);
    }

    #[test]
    fn selection_with_symmetric_deltas() {
        // Pairs of opposite deltas, as produced by symmetric candidates near
        // equilibrium. The uniform distribution has zero equilibrium gap, but
        // the minimum is at the better balanced pair (0, 2/3, 1/3, 0).
        let deltas = DMatrix::from_row_slice(4, 2, &[1.0, 0.5, -1.0, -0.5, 2.0, 1.0, -2.0, -1.0]);
        let objectives = dvector![1.0, 1.1, 0.9, 1.2];
        let expected = dvector![0.0, 2.0 / 3.0, 1.0 / 3.0, 0.0];

        for v in [0.1, 1.0] {
            let problem = ApproximateSelectionProblem::new(v, 0.0, &deltas, &objectives);
            let alpha = problem.solve().unwrap();

            assert_abs_diff_eq!(alpha, expected, epsilon = 1e-3);
            assert_abs_diff_eq!(problem.objective(&alpha), 31.0 / 30.0, epsilon = 1e-4);
            assert!(problem.objective(&alpha) < problem.objective(&dvector![0.25, 0.25, 0.25, 0.25]));
        }
    }

    #[test]
    fn round_stops_at_budget() {
        let problem = problem();
        let mut algo = Opdyts::with_options(&problem, options(), StdRng::seed_from_u64(1)).unwrap();

        // Initial job and four candidates leave room for two transitions, one
        // less than the selected candidate needs.
        let driver = OptimizerDriver::builder(
            problem,
            Evaluator::new(Relaxation::new(vec![2.0, 4.0], 0.5)),
        )
        .with_maximum_evaluations(7)
        .build();
        driver.run(&mut algo).unwrap();

        assert_eq!(driver.evaluations(), 7);
        assert_eq!(algo.round(), 0);
        assert!(algo.history().is_empty());
        assert_eq!(algo.reference().unwrap().parameters, dvector![1.0, 1.0]);
        assert_eq!(driver.evaluator().cached(), 1);
    }

    #[test]
    fn adaptation_fits_gap_weights() {
        // Observed performance gaps equal to 0.5 eq + 0.25 ug exactly.
        let transitions = [(1.0, 0.5), (2.0, 1.0), (0.5, 2.0)]
            .iter()
            .map(|&(eq, ug)| TransitionRecord {
                transient_performance: 3.0 + 0.5 * eq + 0.25 * ug,
                equilibrium_gap: eq,
                uniformity_gap: ug,
            })
            .collect();

        let rounds = vec![RoundRecord {
            selection_performance: 3.0,
            transitions,
        }];

        let (v, w) = AdaptationProblem::new(0.3, &rounds).solve(0.0, 0.0).unwrap();
        assert_abs_diff_eq!(v, 0.5, epsilon = 1e-3);
        assert_abs_diff_eq!(w, 0.25, epsilon = 1e-3);
    }

    #[test]
    fn adaptation_stays_in_box() {
        let rounds = vec![RoundRecord {
            selection_performance: 0.0,
            transitions: vec![TransitionRecord {
                transient_performance: 10.0,
                equilibrium_gap: 1.0,
                uniformity_gap: 1.0,
            }],
        }];

        let (v, w) = AdaptationProblem::new(0.3, &rounds).solve(0.0, 0.0).unwrap();
        assert_abs_diff_eq!(v, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(w, 1.0, epsilon = 1e-12);
    }
}
