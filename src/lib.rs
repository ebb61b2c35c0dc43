#![allow(clippy::many_single_char_names)]
#![allow(clippy::type_complexity)]
#![warn(missing_docs)]

//! # Transcal
//!
//! Calibration of expensive, stochastic black-box simulators (such as
//! agent-based transport demand models) with derivative-free optimization
//! algorithms.
//!
//! A calibration repeatedly proposes parameter vectors, runs the simulator
//! for each of them and steers the search by the returned objective values.
//! Simulations are slow, so the library is built around an asynchronous
//! [`Evaluator`] that runs many of them in parallel, while the algorithms stay
//! single-threaded and simply block until the results of a batch are
//! available.
//!
//! ## Algorithms
//!
//! * [CMA-ES](algo::cma_es) -- Recommended default for problems with a handful
//!   of parameters.
//! * [SPSA](algo::spsa) -- Stochastic gradient descent with two simulations
//!   per iteration regardless of the dimension.
//! * [FDSA](algo::fdsa) -- Finite-difference counterpart of SPSA.
//! * [Opdyts](algo::opdyts) -- For simulators whose convergence to an
//!   equilibrium is itself costly.
//! * [Nelder-Mead](algo::nelder_mead) -- Local simplex search.
//! * [Random walk](algo::random_walk) -- Uniform random search, mostly as a
//!   baseline.
//!
//! ## Problem
//!
//! The parameters are described by a [`Problem`]: their number, optional
//! bounds and initial values, and for algorithms that work with the internal
//! state of the simulation, the length of that state. For most uses, the
//! ready-made [`ProblemDescriptor`] is enough.
//!
//! ```rust
//! use transcal::ProblemDescriptor;
//!
//! let problem = ProblemDescriptor::bounded([(-2.0, 2.0), (0.0, 1.0)])
//!     .with_initial(vec![0.5, 0.5]);
//! ```
//!
//! The simulator itself is any type that implements the [`Simulator`] trait.
//! It receives the parameters, the run configuration (number of iterations,
//! the job to restart from) and returns the objective value to be minimized,
//! optionally together with the final state of the simulation.
//!
//! ```rust
//! use transcal::nalgebra::DVector;
//! use transcal::{Outcome, Restart, RunConfig, SimulationError, Simulator};
//!
//! struct Model;
//!
//! impl Simulator for Model {
//!     fn run(
//!         &self,
//!         parameters: &DVector<f64>,
//!         _config: &RunConfig,
//!         _restart: Option<&Restart>,
//!     ) -> Result<Outcome, SimulationError> {
//!         // Run the simulation and compare its output with reference data.
//!         let error = (parameters[0] - 1.0).powi(2) + (parameters[1] - 0.25).powi(2);
//!         Ok(Outcome::new(error))
//!     }
//! }
//! ```
//!
//! ## Calibrating
//!
//! The [`OptimizerDriver`] ties the problem and the evaluator together and
//! runs an algorithm until the evaluation budget is exhausted or a stopping
//! criterion is met.
//!
//! ```rust
//! use rand::{rngs::StdRng, SeedableRng};
//! use transcal::algo::CmaEs;
//! use transcal::{Evaluator, OptimizerDriver, ProblemDescriptor};
//! # use transcal::nalgebra::DVector;
//! # use transcal::{Outcome, Restart, RunConfig, SimulationError, Simulator};
//! #
//! # struct Model;
//! #
//! # impl Simulator for Model {
//! #     fn run(
//! #         &self,
//! #         parameters: &DVector<f64>,
//! #         _config: &RunConfig,
//! #         _restart: Option<&Restart>,
//! #     ) -> Result<Outcome, SimulationError> {
//! #         Ok(Outcome::new((parameters[0] - 1.0).powi(2) + (parameters[1] - 0.25).powi(2)))
//! #     }
//! # }
//!
//! let problem = ProblemDescriptor::new(2).with_initial(vec![0.0, 0.0]);
//! let mut algo = CmaEs::new(&problem, StdRng::seed_from_u64(42)).unwrap();
//!
//! let evaluator = Evaluator::builder(Model).with_workers(4).build();
//! let driver = OptimizerDriver::builder(problem, evaluator)
//!     .with_maximum_evaluations(200)
//!     .build();
//!
//! let iters = driver
//!     .find(&mut algo, |state| {
//!         println!(
//!             "iter = {}\tevaluations = {}\tbest = {}",
//!             state.iter(),
//!             state.evaluations(),
//!             state.best_objective()
//!         );
//!         state.best_objective() <= 1e-4
//!     })
//!     .expect("calibration failed");
//!
//! println!("{} iterations, best = {:?}", iters, driver.best_parameters());
//! ```
//!
//! ## Logging
//!
//! All components log through the [`log`](https://docs.rs/log) facade by
//! default. A [`Logger`] with a custom sink or target can be passed to the
//! evaluator, the driver and every algorithm to keep the records of
//! concurrent calibration runs apart.
//!
//! ## License
//!
//! Licensed under MIT.

pub mod algo;
mod core;
pub mod driver;
pub mod evaluator;
pub mod subproblem;

pub use core::*;
pub use driver::{Evaluation, IterState, OptimizerDriver};
pub use evaluator::{Annotations, EvaluationError, Evaluator, Job, JobStatus};

#[cfg(feature = "testing")]
pub mod testing;

#[cfg(not(feature = "testing"))]
pub(crate) mod testing;

pub use nalgebra;
