//! # Window Warmup
//!
//! Stan-style **window adaptation** for Hamiltonian Monte Carlo: before sampling, a
//! warmup phase tunes the integrator **step size** with dual averaging and estimates
//! the **inverse mass matrix** (diagonal or dense) over a series of doubling,
//! memoryless windows.
//!
//! ## Getting Started
//!
//! To use this library, add it to your project:
//! ```bash
//! cargo add window-warmup
//! ```
//!
//! The warmup drives any kernel exposed through the [`kernel::KernelFactory`] trait.
//! A fixed-trajectory HMC kernel ships in [`hmc`]; you only need to provide:
//!    - A target distribution implementing the [`hmc::HamiltonianTarget`] trait
//!
//! ## Example 1: Dense metric for a correlated Gaussian
//!
//! ```rust
//! use ndarray::{arr1, arr2};
//! use window_warmup::config::WarmupConfig;
//! use window_warmup::distributions::Gaussian;
//! use window_warmup::hmc::Hmc;
//! use window_warmup::warmup::WindowAdaptation;
//!
//! let cov = arr2(&[[2.0, 0.8], [0.8, 1.0]]);
//! let target = Gaussian::new(arr1(&[0.0, 0.0]), cov).unwrap();
//! let factory = Hmc::new(target, 8);
//! let initial_state = factory.init_state(arr1(&[1.0, 1.0]));
//!
//! let config = WarmupConfig::default().with_num_steps(300).dense();
//! let adaptation = WindowAdaptation::new(factory, config).unwrap();
//! let result = adaptation.run(42, initial_state).unwrap();
//!
//! println!(
//!     "step size {:.3}, inverse mass matrix {:?}",
//!     result.step_size, result.inverse_mass_matrix
//! );
//! ```
//!
//! ## Example 2: Driving the warmup by hand
//!
//! `init`, `update` and `finalize` are pure given a seed, so the loop can live in
//! your own code (for checkpointing or early stopping):
//!
//! ```rust
//! use ndarray::arr1;
//! use window_warmup::config::WarmupConfig;
//! use window_warmup::distributions::IsotropicGaussian;
//! use window_warmup::hmc::Hmc;
//! use window_warmup::schedule::build_schedule;
//! use window_warmup::seed::SeedStream;
//! use window_warmup::warmup::WindowAdaptation;
//!
//! let factory = Hmc::new(IsotropicGaussian::new(arr1(&[0.0; 3]), 1.0), 5);
//! let mut state = factory.init_state(arr1(&[0.5, -0.5, 0.0]));
//! let config = WarmupConfig::default().with_num_steps(100);
//! let adaptation = WindowAdaptation::new(factory, config).unwrap();
//!
//! let mut seeds = SeedStream::new(7);
//! let mut warmup_state = adaptation.init(seeds.next_seed(), &state, 1.0).unwrap();
//! for entry in build_schedule(config.num_steps, &config.windows).unwrap() {
//!     let (next, next_warmup_state, _info) = adaptation
//!         .update(seeds.next_seed(), entry.window, entry.is_window_end, &state, &warmup_state)
//!         .unwrap();
//!     state = next;
//!     warmup_state = next_warmup_state;
//! }
//! let (step_size, inverse_mass_matrix) = adaptation.finalize(&warmup_state).unwrap();
//! assert!(step_size > 0.0);
//! assert_eq!(inverse_mass_matrix.dim(), 3);
//! ```
//!
//! A runnable demo with logging and several chains lives in `demos/`.
//!
//! ## Features
//! - **Diagonal or dense** inverse mass matrix with Stan's regularization
//! - **Deterministic** runs from a single `u64` seed
//! - **Parallel Chains** via `rayon`
//! - **Progress Indicators** (running acceptance probability, current step size)
//! - **Checkpointable** adaptation state (`serde`)

pub mod config;
pub mod distributions;
pub mod error;
pub mod euclidean;
pub mod hmc;
pub mod kernel;
pub mod mass_matrix;
pub mod schedule;
pub mod seed;
pub mod step_size;
pub mod warmup;

pub use config::WarmupConfig;
pub use error::{Result, WarmupError};
pub use warmup::{WarmupResult, WindowAdaptation, WindowWarmupState};
