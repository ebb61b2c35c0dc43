//! Core abstractions and types for transcal.
//!
//! *Users* are mainly interested in implementing the [`Simulator`] trait and
//! describing the parameter space with a [`Problem`] (or the ready-made
//! [`ProblemDescriptor`]).
//!
//! Algorithms *developers* are interested in implementing the [`Algorithm`]
//! trait and using the capability checks of [`ProblemExt`].

mod algorithm;
mod domain;
mod logger;
mod problem;
mod simulator;

pub use algorithm::*;
pub use domain::*;
pub use logger::*;
pub use problem::*;
pub use simulator::*;
