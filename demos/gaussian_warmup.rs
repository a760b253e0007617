//! Warms up HMC on a correlated 3D Gaussian and prints the adapted parameters.
//!
//! Run with `RUST_LOG=debug` to see the window boundaries.

use ndarray::{arr1, arr2};
use std::error::Error;
use tracing_subscriber::EnvFilter;
use window_warmup::config::WarmupConfig;
use window_warmup::distributions::Gaussian;
use window_warmup::hmc::Hmc;
use window_warmup::warmup::WindowAdaptation;

fn main() -> Result<(), Box<dyn Error>> {
    const NUM_STEPS: usize = 1_000;
    const N_CHAINS: usize = 4;
    const SEED: u64 = 42;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cov = arr2(&[[4.0, 1.5, 0.0], [1.5, 2.0, -0.4], [0.0, -0.4, 0.5]]);
    let target = Gaussian::new(arr1(&[1.0, -2.0, 0.5]), cov.clone())?;
    let factory = Hmc::new(target, 10);

    let config = WarmupConfig::default().with_num_steps(NUM_STEPS).dense();
    let adaptation = WindowAdaptation::new(factory.clone(), config)?;

    // One chain with a progress bar.
    let result = adaptation.run_progress(SEED, factory.init_state(arr1(&[5.0, 5.0, 5.0])))?;
    println!(
        "Single chain: step size {:.4}, mean p(accept) {:.2}",
        result.step_size,
        result.mean_acceptance_probability()
    );
    for (step, reset) in result.step_size_resets() {
        println!(
            "  window closed at step {:>4}: step size {:.4} -> {:.4}",
            step + 1,
            reset.previous_step_size,
            reset.step_size
        );
    }
    println!("Adapted inverse mass matrix:\n{:?}", result.inverse_mass_matrix);
    println!("True covariance:\n{cov}");

    // Independent chains in parallel.
    let starts = (0..N_CHAINS)
        .map(|i| factory.init_state(arr1(&[i as f64, -(i as f64), 0.0])))
        .collect();
    let chains = adaptation.run_chains(SEED, starts)?;
    for (i, chain) in chains.iter().enumerate() {
        println!(
            "Chain {i}: step size {:.4}, mean p(accept) {:.2}",
            chain.step_size,
            chain.mean_acceptance_probability()
        );
    }
    Ok(())
}
