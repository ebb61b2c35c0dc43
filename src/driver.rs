//! High-level API for running a calibration.
//!
//! The [`OptimizerDriver`] encapsulates the problem, the
//! [evaluator](crate::Evaluator) and the evaluation budget. Algorithms submit
//! their candidates through the driver, which counts every submission, keeps
//! track of the best result and the history of all retrieved evaluations.
//!
//! The simplest way of using the driver is to initialize it with the defaults
//! and run an algorithm until the budget is exhausted:
//!
//! ```rust
//! use rand::{rngs::StdRng, SeedableRng};
//! use transcal::algo::Spsa;
//! use transcal::{Evaluator, OptimizerDriver, ProblemDescriptor};
//! # use transcal::nalgebra::DVector;
//! # use transcal::{Outcome, Restart, RunConfig, SimulationError, Simulator};
//! #
//! # struct Parabola;
//! #
//! # impl Simulator for Parabola {
//! #     fn run(
//! #         &self,
//! #         parameters: &DVector<f64>,
//! #         _config: &RunConfig,
//! #         _restart: Option<&Restart>,
//! #     ) -> Result<Outcome, SimulationError> {
//! #         Ok(Outcome::new(parameters.norm_squared()))
//! #     }
//! # }
//!
//! let problem = ProblemDescriptor::new(2).with_initial(vec![1.0, 1.0]);
//! let mut algo = Spsa::new(&problem, StdRng::seed_from_u64(42)).unwrap();
//!
//! let driver = OptimizerDriver::new(problem, Evaluator::new(Parabola));
//! driver.run(&mut algo).expect("calibration failed");
//!
//! println!("best = {} at {:?}", driver.best_objective(), driver.best_parameters());
//! ```
//!
//! If you need to specify additional settings, use the builder:
//!
//! ```rust
//! use transcal::{Evaluator, OptimizerDriver, ProblemDescriptor};
//! # use transcal::nalgebra::DVector;
//! # use transcal::{Outcome, Restart, RunConfig, SimulationError, Simulator};
//! #
//! # struct Parabola;
//! #
//! # impl Simulator for Parabola {
//! #     fn run(
//! #         &self,
//! #         parameters: &DVector<f64>,
//! #         _config: &RunConfig,
//! #         _restart: Option<&Restart>,
//! #     ) -> Result<Outcome, SimulationError> {
//! #         Ok(Outcome::new(parameters.norm_squared()))
//! #     }
//! # }
//!
//! let problem = ProblemDescriptor::bounded([(-1.0, 1.0), (-1.0, 1.0)]);
//!
//! let driver = OptimizerDriver::builder(problem, Evaluator::new(Parabola))
//!     .with_maximum_evaluations(500)
//!     .with_history_sink(std::io::sink())
//!     .build();
//! ```

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use getset::{CopyGetters, Getters, Setters};
use nalgebra::DVector;
use parking_lot::Mutex;
use serde::Serialize;

use crate::core::{Algorithm, JobId, Logger, Outcome, Problem, ProblemExt, RunConfig, Simulator};
use crate::evaluator::{Annotations, EvaluationError, Evaluator};

/// A retrieved evaluation in the history of the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Getters, CopyGetters)]
pub struct Evaluation {
    /// Position in the history.
    #[getset(get_copy = "pub")]
    index: usize,
    /// Job that produced the evaluation.
    #[getset(get_copy = "pub")]
    id: JobId,
    /// Evaluated parameters.
    #[getset(get = "pub")]
    parameters: Vec<f64>,
    /// Objective value.
    #[getset(get_copy = "pub")]
    objective: f64,
    /// Annotations of the job.
    #[getset(get = "pub")]
    annotations: Annotations,
}

/// Options for the [`OptimizerDriver`].
#[derive(Debug, Clone, CopyGetters, Setters)]
#[getset(get_copy = "pub", set = "pub")]
pub struct DriverOptions {
    /// Number of submitted jobs after which the calibration is finished.
    maximum_evaluations: usize,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            maximum_evaluations: 100,
        }
    }
}

type Sink = Box<dyn Write + Send>;

/// Builder for the [`OptimizerDriver`].
pub struct OptimizerBuilder<P, S: Simulator> {
    problem: P,
    evaluator: Evaluator<S>,
    options: DriverOptions,
    sink: Option<Sink>,
    logger: Logger,
}

impl<P: Problem, S: Simulator> OptimizerBuilder<P, S> {
    /// Sets the evaluation budget.
    pub fn with_maximum_evaluations(mut self, maximum_evaluations: usize) -> Self {
        self.options.set_maximum_evaluations(maximum_evaluations);
        self
    }

    /// Sets all options at once.
    pub fn with_options(mut self, options: DriverOptions) -> Self {
        self.options = options;
        self
    }

    /// Writes every recorded evaluation as a line of JSON into the writer.
    pub fn with_history_sink<W: Write + Send + 'static>(mut self, sink: W) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Appends every recorded evaluation as a line of JSON to the file at
    /// given path.
    pub fn with_log_path<Q: AsRef<Path>>(self, path: Q) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(self.with_history_sink(BufWriter::new(file)))
    }

    /// Sets the logger.
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Builds the [`OptimizerDriver`].
    pub fn build(self) -> OptimizerDriver<P, S> {
        let Self {
            problem,
            evaluator,
            options,
            sink,
            logger,
        } = self;

        OptimizerDriver {
            problem,
            evaluator,
            options,
            progress: Mutex::new(Progress {
                evaluations: 0,
                converged: false,
                best: None,
                history: Vec::new(),
                recorded: HashSet::new(),
                sink,
            }),
            logger,
        }
    }
}

struct Progress {
    evaluations: usize,
    converged: bool,
    best: Option<(f64, DVector<f64>)>,
    history: Vec<Evaluation>,
    recorded: HashSet<JobId>,
    sink: Option<Sink>,
}

impl Progress {
    /// Writes the evaluation to the sink before any state changes, so that a
    /// failed write leaves the job unrecorded.
    fn record(&mut self, evaluation: Evaluation) -> Result<(), EvaluationError> {
        if let Some(sink) = self.sink.as_mut() {
            let mut line = serde_json::to_vec(&evaluation)?;
            line.push(b'\n');
            sink.write_all(&line)?;
            sink.flush()?;
        }

        let improved = self
            .best
            .as_ref()
            .map_or(!evaluation.objective.is_nan(), |(best, _)| {
                evaluation.objective < *best
            });

        if improved {
            self.best = Some((
                evaluation.objective,
                DVector::from_column_slice(&evaluation.parameters),
            ));
        }

        self.recorded.insert(evaluation.id);
        self.history.push(evaluation);
        Ok(())
    }
}

/// The driver of a calibration run.
///
/// For default settings, use [`OptimizerDriver::new`]. For more flexibility,
/// use [`OptimizerDriver::builder`]. For the usage of the driver, see
/// [module](self) documentation.
///
/// All methods take `&self`. The counters, the best result and the history
/// are guarded by a lock, so several algorithms may drive the same run from
/// different threads.
pub struct OptimizerDriver<P, S: Simulator> {
    problem: P,
    evaluator: Evaluator<S>,
    options: DriverOptions,
    progress: Mutex<Progress>,
    logger: Logger,
}

impl<P: Problem, S: Simulator> OptimizerDriver<P, S> {
    /// Returns the builder for specifying additional settings.
    pub fn builder(problem: P, evaluator: Evaluator<S>) -> OptimizerBuilder<P, S> {
        OptimizerBuilder {
            problem,
            evaluator,
            options: DriverOptions::default(),
            sink: None,
            logger: Logger::default(),
        }
    }

    /// Initializes the driver with the default settings.
    pub fn new(problem: P, evaluator: Evaluator<S>) -> Self {
        Self::builder(problem, evaluator).build()
    }

    /// Returns reference to the problem.
    pub fn problem(&self) -> &P {
        &self.problem
    }

    /// Returns reference to the evaluator.
    pub fn evaluator(&self) -> &Evaluator<S> {
        &self.evaluator
    }

    /// Returns reference to the options.
    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// Submits a job, checking the dimension of the parameters.
    ///
    /// Every successful submission counts towards the evaluation budget.
    pub fn submit(
        &self,
        parameters: DVector<f64>,
        config: RunConfig,
        annotations: Annotations,
    ) -> Result<JobId, EvaluationError> {
        self.problem.check_dim(&parameters)?;

        let id = self.evaluator.submit(parameters, config, annotations)?;
        self.progress.lock().evaluations += 1;

        Ok(id)
    }

    /// Blocks until the given jobs are finished.
    pub fn wait(&self, ids: &[JobId]) -> Result<(), EvaluationError> {
        self.evaluator.wait(ids)
    }

    /// Blocks until all submitted jobs are finished.
    pub fn wait_all(&self) -> Result<(), EvaluationError> {
        self.evaluator.wait_all()
    }

    /// Gets the outcome of a finished job.
    ///
    /// The first retrieval of every job is appended to the history and taken
    /// into account for the best result.
    pub fn get(&self, id: JobId) -> Result<Outcome, EvaluationError> {
        let job = self.evaluator.job(id)?;
        let outcome = job.outcome()?.clone();

        let mut progress = self.progress.lock();

        if !progress.recorded.contains(&id) {
            let evaluation = Evaluation {
                index: progress.history.len(),
                id,
                parameters: job.parameters().iter().copied().collect(),
                objective: outcome.objective,
                annotations: job.annotations().clone(),
            };

            self.logger.debug(format_args!(
                "evaluation {} (job {}): objective = {}",
                evaluation.index, id, evaluation.objective
            ));

            progress.record(evaluation)?;
        }

        Ok(outcome)
    }

    /// Removes a finished job from the cache of the evaluator.
    pub fn clean(&self, id: JobId) {
        self.evaluator.clean(id);
    }

    /// Removes all finished jobs from the cache of the evaluator.
    pub fn clean_all(&self) {
        self.evaluator.clean_all();
    }

    /// Number of submitted jobs.
    pub fn evaluations(&self) -> usize {
        self.progress.lock().evaluations
    }

    /// Marks the calibration as converged.
    pub fn mark_converged(&self) {
        self.progress.lock().converged = true;
    }

    /// Returns `true` if the budget is exhausted or the calibration
    /// converged.
    pub fn finished(&self) -> bool {
        let progress = self.progress.lock();
        progress.converged || progress.evaluations >= self.options.maximum_evaluations
    }

    /// Best objective value retrieved so far. Infinity if there is none.
    pub fn best_objective(&self) -> f64 {
        self.progress
            .lock()
            .best
            .as_ref()
            .map_or(f64::INFINITY, |(objective, _)| *objective)
    }

    /// Parameters of the best objective value.
    pub fn best_parameters(&self) -> Option<DVector<f64>> {
        self.progress
            .lock()
            .best
            .as_ref()
            .map(|(_, parameters)| parameters.clone())
    }

    /// Snapshot of the evaluation history.
    pub fn history(&self) -> Vec<Evaluation> {
        self.progress.lock().history.clone()
    }

    /// Does one iteration of the algorithm.
    pub fn step<A: Algorithm<P, S>>(&self, algo: &mut A) -> Result<(), A::Error> {
        algo.advance(self)
    }

    /// Runs the algorithm until the calibration is finished. Returns the
    /// number of iterations.
    pub fn run<A: Algorithm<P, S>>(&self, algo: &mut A) -> Result<usize, A::Error> {
        self.find(algo, |_| false)
    }

    /// Runs the algorithm until the calibration is finished or given stopping
    /// criterion is satisfied. Returns the number of iterations.
    pub fn find<A, C>(&self, algo: &mut A, stop: C) -> Result<usize, A::Error>
    where
        A: Algorithm<P, S>,
        C: Fn(IterState) -> bool,
    {
        self.logger.info(format_args!(
            "running {} with budget of {} evaluations",
            A::NAME,
            self.options.maximum_evaluations
        ));

        let mut iter = 0;

        while !self.finished() {
            algo.advance(self)?;
            iter += 1;

            let state = IterState {
                iter,
                evaluations: self.evaluations(),
                best_objective: self.best_objective(),
            };

            if stop(state) {
                break;
            }
        }

        self.logger.info(format_args!(
            "{} finished after {} iterations and {} evaluations, best objective = {}",
            A::NAME,
            iter,
            self.evaluations(),
            self.best_objective()
        ));

        Ok(iter)
    }
}

/// State of the calibration after an iteration.
#[derive(Debug, Clone, Copy, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct IterState {
    /// Number of finished iterations.
    iter: usize,
    /// Number of submitted jobs.
    evaluations: usize,
    /// Best objective value so far.
    best_objective: f64,
}
