use rand::{rngs::StdRng, SeedableRng};
use transcal::algo::CmaEs;
use transcal::nalgebra::DVector;
use transcal::{
    Evaluator, OptimizerDriver, Outcome, ProblemDescriptor, Restart, RunConfig, SimulationError,
    Simulator,
};

// Noisy mode share model: the objective is the squared distance of the
// simulated shares from the reference shares.
struct ModeShares {
    reference: Vec<f64>,
}

impl Simulator for ModeShares {
    fn run(
        &self,
        parameters: &DVector<f64>,
        _config: &RunConfig,
        _restart: Option<&Restart>,
    ) -> Result<Outcome, SimulationError> {
        let utilities = parameters.iter().map(|p| p.exp()).collect::<Vec<_>>();
        let total = 1.0 + utilities.iter().sum::<f64>();

        let error = utilities
            .iter()
            .zip(self.reference.iter())
            .map(|(u, r)| (u / total - r).powi(2))
            .sum();

        Ok(Outcome::new(error))
    }
}

fn main() -> Result<(), String> {
    let problem = ProblemDescriptor::bounded([(-5.0, 5.0), (-5.0, 5.0)])
        .with_initial(vec![0.0, 0.0]);

    let mut algo =
        CmaEs::new(&problem, StdRng::seed_from_u64(1)).map_err(|error| format!("{error}"))?;

    let simulator = ModeShares {
        reference: vec![0.2, 0.5],
    };
    let evaluator = Evaluator::builder(simulator).with_workers(4).build();
    let driver = OptimizerDriver::builder(problem, evaluator)
        .with_maximum_evaluations(300)
        .build();

    let tolerance = 1e-8;

    driver
        .find(&mut algo, |state| {
            println!(
                "iter = {}\tevaluations = {}\tbest = {}",
                state.iter(),
                state.evaluations(),
                state.best_objective()
            );
            state.best_objective() <= tolerance
        })
        .map_err(|error| format!("{error}"))?;

    println!("parameters = {:?}", driver.best_parameters());

    if driver.best_objective() <= tolerance {
        Ok(())
    } else {
        Err("did not converge".to_string())
    }
}
