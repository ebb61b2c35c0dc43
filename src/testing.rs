//! Testing simulators and utilities useful for benchmarking, debugging and
//! smoke testing.
//!
//! [`QuadraticSum`] is recommended for first tests of algorithms that do not
//! need a simulation state. [`Relaxation`] models a simulation that converges
//! to its equilibrium over iterations and supports restarts, which is what
//! [Opdyts](crate::algo::opdyts) is designed for.

#![allow(unused)]

use std::io::{self, Write};
use std::sync::Arc;

use log::{Level, Log, Metadata, Record};
use nalgebra::DVector;
use parking_lot::Mutex;

use crate::core::{Outcome, Restart, RunConfig, SimulationError, Simulator};

/// Weighted sum of squares of the parameters, with the minimum of zero at the
/// origin.
///
/// The state of the simulation is the parameter vector itself.
#[derive(Debug, Clone)]
pub struct QuadraticSum {
    weights: Vec<f64>,
}

impl QuadraticSum {
    /// Initializes the simulator with a weight per parameter.
    pub fn new(weights: Vec<f64>) -> Self {
        assert!(!weights.is_empty(), "empty weights");
        Self { weights }
    }

    /// The objective value for given parameters.
    pub fn objective(&self, x: &DVector<f64>) -> f64 {
        self.weights
            .iter()
            .zip(x.iter())
            .map(|(w, xi)| w * xi * xi)
            .sum()
    }
}

impl Simulator for QuadraticSum {
    fn run(
        &self,
        parameters: &DVector<f64>,
        _: &RunConfig,
        _: Option<&Restart>,
    ) -> Result<Outcome, SimulationError> {
        if parameters.nrows() != self.weights.len() {
            return Err(SimulationError::InvalidParameters);
        }

        Ok(Outcome::with_state(
            self.objective(parameters),
            parameters.clone(),
        ))
    }
}

/// Simulation whose state relaxes towards the parameters.
///
/// Every iteration moves the state by a fraction `rate` of the remaining
/// distance to the parameters. A run starts from the zero state, or from the
/// state of the restart job. The objective is the weighted sum of squares of
/// the state, so the equilibrium objective of parameters `x` is the weighted
/// sum of squares of `x`.
#[derive(Debug, Clone)]
pub struct Relaxation {
    weights: Vec<f64>,
    rate: f64,
}

impl Relaxation {
    /// Initializes the simulator with a weight per parameter and the
    /// relaxation rate.
    pub fn new(weights: Vec<f64>, rate: f64) -> Self {
        assert!(!weights.is_empty(), "empty weights");
        assert!(rate > 0.0 && rate <= 1.0, "rate out of (0, 1]");
        Self { weights, rate }
    }

    /// The objective value of given state.
    pub fn objective(&self, state: &DVector<f64>) -> f64 {
        self.weights
            .iter()
            .zip(state.iter())
            .map(|(w, si)| w * si * si)
            .sum()
    }
}

impl Simulator for Relaxation {
    fn run(
        &self,
        parameters: &DVector<f64>,
        config: &RunConfig,
        restart: Option<&Restart>,
    ) -> Result<Outcome, SimulationError> {
        let n = self.weights.len();

        if parameters.nrows() != n {
            return Err(SimulationError::InvalidParameters);
        }

        let mut state = match restart {
            Some(restart) => match &restart.outcome.state {
                Some(state) if state.nrows() == n => state.clone(),
                _ => return Err(SimulationError::InvalidRestart(restart.id)),
            },
            None => DVector::zeros(n),
        };

        for _ in 0..config.iterations.unwrap_or(1) {
            let step = (parameters - &state) * self.rate;
            state += step;
        }

        Ok(Outcome::with_state(self.objective(&state), state))
    }
}

/// Simulator whose every run fails.
#[derive(Debug, Clone, Copy)]
pub struct Failing;

impl Simulator for Failing {
    fn run(
        &self,
        _: &DVector<f64>,
        _: &RunConfig,
        _: Option<&Restart>,
    ) -> Result<Outcome, SimulationError> {
        Err(SimulationError::Custom("simulation diverged".into()))
    }
}

/// A record captured by [`Capture`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedRecord {
    /// Level of the record.
    pub level: Level,
    /// Target of the record.
    pub target: String,
    /// Formatted message.
    pub message: String,
}

/// Log sink that keeps all records in memory.
#[derive(Debug, Default)]
pub struct Capture {
    records: Mutex<Vec<CapturedRecord>>,
}

impl Capture {
    /// All records captured so far.
    pub fn records(&self) -> Vec<CapturedRecord> {
        self.records.lock().clone()
    }

    /// Returns `true` if a record of given level contains the text.
    pub fn contains(&self, level: Level, text: &str) -> bool {
        self.records
            .lock()
            .iter()
            .any(|record| record.level == level && record.message.contains(text))
    }
}

impl Log for Capture {
    fn enabled(&self, _: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        self.records.lock().push(CapturedRecord {
            level: record.level(),
            target: record.target().to_string(),
            message: record.args().to_string(),
        });
    }

    fn flush(&self) {}
}

/// In-memory writer that can be shared with the driver as a history sink.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    /// Written contents.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
