use std::io;
use std::sync::Arc;

use log::{Level, Log, Metadata, Record};
use rand::{rngs::StdRng, SeedableRng};
use transcal::algo::opdyts::{Opdyts, OpdytsOptions};
use transcal::testing::Relaxation;
use transcal::{Evaluator, Logger, OptimizerDriver, ProblemDescriptor};

struct Stderr;

impl Log for Stderr {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

fn main() -> Result<(), String> {
    let logger = Logger::new(Arc::new(Stderr), "opdyts-demo");

    let problem = ProblemDescriptor::new(3)
        .with_initial(vec![1.0, -1.0, 0.5])
        .with_states(3);

    let mut options = OpdytsOptions::default();
    options.set_perturbation_length(0.5);

    let mut algo = Opdyts::with_options(&problem, options, StdRng::seed_from_u64(7))
        .map_err(|error| format!("{error}"))?
        .with_logger(logger.clone());

    let evaluator = Evaluator::builder(Relaxation::new(vec![1.0, 2.0, 4.0], 0.3))
        .with_workers(4)
        .with_logger(logger.clone())
        .build();

    // Every evaluation is written as a JSON line to the standard output.
    let driver = OptimizerDriver::builder(problem, evaluator)
        .with_maximum_evaluations(200)
        .with_history_sink(io::stdout())
        .with_logger(logger)
        .build();

    driver.run(&mut algo).map_err(|error| format!("{error}"))?;

    if let Some(reference) = algo.reference() {
        eprintln!(
            "reference = {:?}, v = {}, w = {}",
            reference.parameters.as_slice(),
            algo.v(),
            algo.w()
        );
    }

    Ok(())
}
