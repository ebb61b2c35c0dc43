//! Asynchronous evaluation of simulation jobs.
//!
//! The [`Evaluator`] accepts parameter vectors, dispatches the simulation runs
//! and caches their results under opaque [job identifiers](JobId). Submitting
//! never blocks; the caller blocks in [`Evaluator::wait`] until the jobs it is
//! interested in are finished and then retrieves the results with
//! [`Evaluator::get`].
//!
//! By default, simulations run inline during the submission, which is
//! convenient for cheap deterministic simulators in tests. For real
//! simulators, use a pool of worker threads:
//!
//! ```rust
//! use std::time::Duration;
//!
//! use transcal::nalgebra::dvector;
//! use transcal::{Annotations, Evaluator, Outcome, Restart, RunConfig, SimulationError, Simulator};
//! # use transcal::nalgebra::DVector;
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
//! let evaluator = Evaluator::builder(Parabola)
//!     .with_workers(4)
//!     .with_ping_time(Duration::from_millis(1))
//!     .build();
//!
//! let id = evaluator
//!     .submit(dvector![1.0, 2.0], RunConfig::new(), Annotations::new())
//!     .unwrap();
//! evaluator.wait(&[id]).unwrap();
//!
//! assert_eq!(evaluator.get(id).unwrap().objective, 5.0);
//! evaluator.clean(id);
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use getset::{CopyGetters, Getters, Setters};
use nalgebra::DVector;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::{
    ConfigurationError, JobId, Logger, Outcome, Restart, RunConfig, SimulationError, Simulator,
};

/// Free-form metadata attached to a job for logging.
///
/// The evaluator stores annotations along with the job but never interprets
/// them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Annotations(Map<String, Value>);

impl Annotations {
    /// Empty annotations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry.
    pub fn with<V: Into<Value>>(mut self, key: &str, value: V) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts an entry, replacing the previous value under the same key.
    pub fn insert<V: Into<Value>>(&mut self, key: &str, value: V) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Gets the value under given key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Submitted, waiting for a worker.
    Pending,
    /// Being simulated.
    Running,
    /// Finished with an outcome.
    Done,
    /// Finished with an error.
    Failed,
}

#[derive(Debug, Clone)]
enum Stage {
    Pending,
    Running,
    Done(Outcome),
    Failed(Arc<SimulationError>),
}

/// A simulation job known to the [`Evaluator`].
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct Job {
    /// Identifier of the job.
    #[getset(get_copy = "pub")]
    id: JobId,
    /// Simulated parameters.
    #[getset(get = "pub")]
    parameters: DVector<f64>,
    /// Run configuration after applying the evaluator defaults.
    #[getset(get_copy = "pub")]
    config: RunConfig,
    /// Annotations given at submission.
    #[getset(get = "pub")]
    annotations: Annotations,
    stage: Stage,
}

impl Job {
    /// Current status.
    pub fn status(&self) -> JobStatus {
        match self.stage {
            Stage::Pending => JobStatus::Pending,
            Stage::Running => JobStatus::Running,
            Stage::Done(_) => JobStatus::Done,
            Stage::Failed(_) => JobStatus::Failed,
        }
    }

    /// Returns `true` if the job is done or failed.
    pub fn is_finished(&self) -> bool {
        matches!(self.stage, Stage::Done(_) | Stage::Failed(_))
    }

    /// Outcome of a job that is done.
    pub fn outcome(&self) -> Result<&Outcome, EvaluationError> {
        match &self.stage {
            Stage::Done(outcome) => Ok(outcome),
            Stage::Failed(source) => Err(EvaluationError::SimulationFailed {
                id: self.id,
                source: source.clone(),
            }),
            Stage::Pending | Stage::Running => Err(EvaluationError::NotReady(self.id)),
        }
    }

    fn start(&mut self) {
        if let Stage::Pending = self.stage {
            self.stage = Stage::Running;
        }
    }

    fn finish(&mut self, result: Result<Outcome, SimulationError>) {
        // The result of a job never changes once set.
        if !self.is_finished() {
            self.stage = match result {
                Ok(outcome) => Stage::Done(outcome),
                Err(error) => Stage::Failed(Arc::new(error)),
            };
        }
    }
}

/// Error returned from the [`Evaluator`] and the [driver](crate::OptimizerDriver).
#[derive(Debug, Error)]
pub enum EvaluationError {
    /// The submission is not compatible with the problem.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),
    /// The job was never submitted or was already cleaned.
    #[error("unknown job {0}")]
    UnknownJob(JobId),
    /// The job is not finished yet.
    #[error("job {0} is not finished")]
    NotReady(JobId),
    /// The simulation of the job failed.
    #[error("simulation of job {id} failed")]
    SimulationFailed {
        /// The failed job.
        id: JobId,
        /// Error of the simulator.
        #[source]
        source: Arc<SimulationError>,
    },
    /// An evaluation could not be serialized for the history.
    #[error("cannot serialize evaluation")]
    Serialization(#[from] serde_json::Error),
    /// The evaluation history could not be written.
    #[error("cannot write evaluation history")]
    History(#[from] std::io::Error),
}

/// Options for the [`Evaluator`].
#[derive(Debug, Clone, CopyGetters, Setters)]
#[getset(get_copy = "pub", set = "pub")]
pub struct EvaluatorOptions {
    /// Number of worker threads. With zero workers, simulations run inline in
    /// [`Evaluator::submit`].
    workers: usize,
    /// Polling interval of [`Evaluator::wait`]. Zero only yields the thread
    /// between polls.
    ping_time: Duration,
    /// Run configuration used for the fields that a submission leaves unset.
    defaults: RunConfig,
}

impl Default for EvaluatorOptions {
    fn default() -> Self {
        Self {
            workers: 0,
            ping_time: Duration::from_millis(10),
            defaults: RunConfig::new(),
        }
    }
}

/// Builder for the [`Evaluator`].
pub struct EvaluatorBuilder<S> {
    simulator: S,
    options: EvaluatorOptions,
    logger: Logger,
}

impl<S: Simulator> EvaluatorBuilder<S> {
    /// Sets the number of worker threads.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.options.set_workers(workers);
        self
    }

    /// Sets the polling interval.
    pub fn with_ping_time(mut self, ping_time: Duration) -> Self {
        self.options.set_ping_time(ping_time);
        self
    }

    /// Sets the default run configuration.
    pub fn with_defaults(mut self, defaults: RunConfig) -> Self {
        self.options.set_defaults(defaults);
        self
    }

    /// Sets all options at once.
    pub fn with_options(mut self, options: EvaluatorOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the logger.
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Builds the [`Evaluator`], spawning the workers.
    pub fn build(self) -> Evaluator<S> {
        let Self {
            simulator,
            options,
            logger,
        } = self;

        let simulator = Arc::new(simulator);
        let jobs = Arc::new(Mutex::new(HashMap::new()));

        let pool = if options.workers > 0 {
            let (sender, receiver) = crossbeam_channel::unbounded();

            let workers = (0..options.workers)
                .map(|_| {
                    let simulator = Arc::clone(&simulator);
                    let jobs = Arc::clone(&jobs);
                    let receiver = receiver.clone();
                    let logger = logger.clone();
                    thread::spawn(move || work(&*simulator, &jobs, receiver, &logger))
                })
                .collect();

            logger.debug(format_args!("started {} workers", options.workers));

            Some(Pool {
                sender: Some(sender),
                workers,
            })
        } else {
            None
        };

        Evaluator {
            simulator,
            jobs,
            next_id: AtomicU64::new(0),
            options,
            pool,
            logger,
        }
    }
}

type Jobs = Mutex<HashMap<JobId, Job>>;

struct Request {
    id: JobId,
    parameters: DVector<f64>,
    config: RunConfig,
    restart: Option<Restart>,
}

struct Pool {
    sender: Option<Sender<Request>>,
    workers: Vec<JoinHandle<()>>,
}

impl Drop for Pool {
    fn drop(&mut self) {
        // Disconnecting the channel lets the workers finish the queued jobs
        // and exit.
        self.sender.take();

        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn work<S: Simulator>(simulator: &S, jobs: &Jobs, requests: Receiver<Request>, logger: &Logger) {
    for request in requests.iter() {
        if let Some(job) = jobs.lock().get_mut(&request.id) {
            job.start();
        }

        let result = execute(simulator, &request);
        complete(jobs, request.id, result, logger);
    }
}

fn execute<S: Simulator>(simulator: &S, request: &Request) -> Result<Outcome, SimulationError> {
    panic::catch_unwind(AssertUnwindSafe(|| {
        simulator.run(
            &request.parameters,
            &request.config,
            request.restart.as_ref(),
        )
    }))
    .unwrap_or_else(|payload| Err(SimulationError::Panicked(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn complete(jobs: &Jobs, id: JobId, result: Result<Outcome, SimulationError>, logger: &Logger) {
    match &result {
        Ok(outcome) => logger.trace(format_args!(
            "job {} finished with objective {}",
            id, outcome.objective
        )),
        Err(error) => logger.warn(format_args!("simulation of job {} failed: {}", id, error)),
    }

    // A job cleaned in the meantime is not resurrected.
    if let Some(job) = jobs.lock().get_mut(&id) {
        job.finish(result);
    }
}

/// The evaluator of simulation jobs. See [module](self) documentation for more
/// details.
pub struct Evaluator<S: Simulator> {
    simulator: Arc<S>,
    jobs: Arc<Jobs>,
    next_id: AtomicU64,
    options: EvaluatorOptions,
    pool: Option<Pool>,
    logger: Logger,
}

impl<S: Simulator> Evaluator<S> {
    /// Returns the builder for specifying additional settings.
    pub fn builder(simulator: S) -> EvaluatorBuilder<S> {
        EvaluatorBuilder {
            simulator,
            options: EvaluatorOptions::default(),
            logger: Logger::default(),
        }
    }

    /// Initializes the evaluator with the default settings, which runs the
    /// simulations inline.
    pub fn new(simulator: S) -> Self {
        Self::builder(simulator).build()
    }

    /// Options of the evaluator.
    pub fn options(&self) -> &EvaluatorOptions {
        &self.options
    }

    /// Number of worker threads. Zero for inline evaluation.
    pub fn workers(&self) -> usize {
        self.options.workers
    }

    /// Number of jobs submitted so far.
    pub fn submitted(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Number of jobs currently held in the cache.
    pub fn cached(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Submits a simulation job and returns its identifier without waiting
    /// for the result.
    ///
    /// If the run configuration names a restart job, that job must be done.
    /// Its parameters and outcome are handed over to the simulator unchanged.
    pub fn submit(
        &self,
        parameters: DVector<f64>,
        config: RunConfig,
        annotations: Annotations,
    ) -> Result<JobId, EvaluationError> {
        let config = config.or(&self.options.defaults);

        let restart = match config.restart {
            Some(restart) => {
                let jobs = self.jobs.lock();
                let job = jobs
                    .get(&restart)
                    .ok_or(EvaluationError::UnknownJob(restart))?;

                Some(Restart {
                    id: restart,
                    parameters: job.parameters.clone(),
                    outcome: job.outcome()?.clone(),
                })
            }
            None => None,
        };

        let id = JobId(self.next_id.fetch_add(1, Ordering::SeqCst));

        self.logger.debug(format_args!(
            "submitting job {} with parameters {:?}",
            id,
            parameters.as_slice()
        ));

        self.jobs.lock().insert(
            id,
            Job {
                id,
                parameters: parameters.clone(),
                config,
                annotations,
                stage: Stage::Pending,
            },
        );

        let request = Request {
            id,
            parameters,
            config,
            restart,
        };

        match self.pool.as_ref().and_then(|pool| pool.sender.as_ref()) {
            Some(sender) => {
                if let Err(rejected) = sender.send(request) {
                    let error = SimulationError::Custom("worker pool is disconnected".into());
                    complete(&self.jobs, rejected.0.id, Err(error), &self.logger);
                }
            }
            None => {
                if let Some(job) = self.jobs.lock().get_mut(&id) {
                    job.start();
                }

                let result = execute(&*self.simulator, &request);
                complete(&self.jobs, id, result, &self.logger);
            }
        }

        Ok(id)
    }

    /// Blocks until all given jobs are done or failed.
    pub fn wait(&self, ids: &[JobId]) -> Result<(), EvaluationError> {
        self.poll(|jobs| {
            for id in ids {
                match jobs.get(id) {
                    None => return Err(EvaluationError::UnknownJob(*id)),
                    Some(job) if !job.is_finished() => return Ok(false),
                    Some(_) => {}
                }
            }

            Ok(true)
        })
    }

    /// Blocks until all jobs in the cache are done or failed.
    pub fn wait_all(&self) -> Result<(), EvaluationError> {
        self.poll(|jobs| Ok(jobs.values().all(Job::is_finished)))
    }

    fn poll<F>(&self, mut finished: F) -> Result<(), EvaluationError>
    where
        F: FnMut(&HashMap<JobId, Job>) -> Result<bool, EvaluationError>,
    {
        loop {
            if finished(&self.jobs.lock())? {
                return Ok(());
            }

            if self.options.ping_time.is_zero() {
                thread::yield_now();
            } else {
                thread::sleep(self.options.ping_time);
            }
        }
    }

    /// Gets the cached outcome of a job that is done.
    pub fn get(&self, id: JobId) -> Result<Outcome, EvaluationError> {
        self.jobs
            .lock()
            .get(&id)
            .ok_or(EvaluationError::UnknownJob(id))?
            .outcome()
            .cloned()
    }

    /// Gets a snapshot of the job.
    pub fn job(&self, id: JobId) -> Result<Job, EvaluationError> {
        self.jobs
            .lock()
            .get(&id)
            .cloned()
            .ok_or(EvaluationError::UnknownJob(id))
    }

    /// Gets the status of the job.
    pub fn status(&self, id: JobId) -> Result<JobStatus, EvaluationError> {
        self.jobs
            .lock()
            .get(&id)
            .map(Job::status)
            .ok_or(EvaluationError::UnknownJob(id))
    }

    /// Removes a finished job from the cache.
    ///
    /// Cleaning an unknown, already cleaned or unfinished job does nothing.
    pub fn clean(&self, id: JobId) {
        let mut jobs = self.jobs.lock();

        if jobs.get(&id).map_or(false, Job::is_finished) {
            jobs.remove(&id);
            self.logger.trace(format_args!("cleaned job {}", id));
        }
    }

    /// Removes all finished jobs from the cache.
    pub fn clean_all(&self) {
        self.jobs.lock().retain(|_, job| !job.is_finished());
    }
}
