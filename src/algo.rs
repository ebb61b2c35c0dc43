//! Collection of calibration algorithms.
//!
//! * [CMA-ES](cma_es) -- Recommended default for problems with a handful of
//!   parameters and a simulator that reaches its equilibrium in a single run.
//! * [SPSA](spsa) -- Stochastic gradient descent that needs only two
//!   simulations per iteration regardless of the dimension.
//! * [FDSA](fdsa) -- Finite-difference counterpart of SPSA, useful for
//!   low-dimensional problems with noisy objectives.
//! * [Opdyts](opdyts) -- For simulators whose convergence to equilibrium is
//!   itself costly. Requires restarts and a simulation state.
//! * [Nelder-Mead](nelder_mead) -- Sequential simplex method for a local
//!   search from a good starting point.
//! * [Random walk](random_walk) -- Uniform random search in a bounded domain.
//!   Mostly as a baseline.

pub mod cma_es;
pub mod fdsa;
pub mod nelder_mead;
pub mod opdyts;
pub mod random_walk;
pub mod spsa;

pub use cma_es::CmaEs;
pub use fdsa::Fdsa;
pub use nelder_mead::NelderMead;
pub use opdyts::Opdyts;
pub use random_walk::RandomWalk;
pub use spsa::Spsa;
