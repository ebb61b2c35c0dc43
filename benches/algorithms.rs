use criterion::{criterion_group, criterion_main, Criterion};
use rand::{rngs::StdRng, SeedableRng};
use transcal::{
    algo::{opdyts::OpdytsOptions, CmaEs, Fdsa, NelderMead, Opdyts, RandomWalk, Spsa},
    testing::*,
    Algorithm, Evaluator, OptimizerDriver, ProblemDescriptor, Simulator,
};

const BUDGET: usize = 200;

fn calibrate<S, A>(problem: ProblemDescriptor, simulator: S, mut algo: A) -> f64
where
    S: Simulator,
    A: Algorithm<ProblemDescriptor, S>,
    A::Error: std::fmt::Debug,
{
    let driver = OptimizerDriver::builder(problem, Evaluator::new(simulator))
        .with_maximum_evaluations(BUDGET)
        .build();

    driver.run(&mut algo).unwrap();
    driver.best_objective()
}

fn quadratic_sum(c: &mut Criterion) {
    let weights = vec![1.0, 2.0, 4.0, 8.0];
    let problem = ProblemDescriptor::bounded([(-2.0, 2.0); 4]).with_initial(vec![1.0; 4]);

    c.bench_function("CMA-ES quadratic sum", |b| {
        b.iter(|| {
            let algo = CmaEs::new(&problem, StdRng::seed_from_u64(0)).unwrap();
            calibrate(problem.clone(), QuadraticSum::new(weights.clone()), algo)
        })
    });

    c.bench_function("SPSA quadratic sum", |b| {
        b.iter(|| {
            let algo = Spsa::new(&problem, StdRng::seed_from_u64(0)).unwrap();
            calibrate(problem.clone(), QuadraticSum::new(weights.clone()), algo)
        })
    });

    c.bench_function("FDSA quadratic sum", |b| {
        b.iter(|| {
            let algo = Fdsa::new(&problem).unwrap();
            calibrate(problem.clone(), QuadraticSum::new(weights.clone()), algo)
        })
    });

    c.bench_function("Nelder-Mead quadratic sum", |b| {
        b.iter(|| {
            let algo = NelderMead::new(&problem).unwrap();
            calibrate(problem.clone(), QuadraticSum::new(weights.clone()), algo)
        })
    });

    c.bench_function("random walk quadratic sum", |b| {
        b.iter(|| {
            let algo = RandomWalk::new(&problem, StdRng::seed_from_u64(0)).unwrap();
            calibrate(problem.clone(), QuadraticSum::new(weights.clone()), algo)
        })
    });
}

fn relaxation(c: &mut Criterion) {
    let problem = ProblemDescriptor::new(2)
        .with_initial(vec![1.0, 1.0])
        .with_states(2);

    let mut options = OpdytsOptions::default();
    options.set_perturbation_length(0.5);

    c.bench_function("Opdyts relaxation", |b| {
        b.iter(|| {
            let algo =
                Opdyts::with_options(&problem, options.clone(), StdRng::seed_from_u64(0)).unwrap();
            calibrate(problem.clone(), Relaxation::new(vec![2.0, 4.0], 0.5), algo)
        })
    });
}

criterion_group!(algorithms, quadratic_sum, relaxation);
criterion_main!(algorithms);
