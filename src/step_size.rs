//! Step size adaptation.
//!
//! [`DualAveraging`] implements Nesterov's dual averaging as tuned by Hoffman &
//! Gelman (2014) and used by Stan: the log step size is nudged so that the running
//! average acceptance probability matches a target, and the averaged iterate is the
//! value reported at the end of warmup.
//!
//! [`find_reasonable_step_size`] is the one-shot heuristic used to seed the
//! estimator at the start of warmup and again after every slow window.

use crate::error::{Result, WarmupError};
use crate::kernel::{KernelFactory, Transition, TransitionInfo};
use crate::mass_matrix::InverseMassMatrix;
use crate::seed::SeedStream;
use serde::{Deserialize, Serialize};

/// Acceptance probability the reasonable step size search aims to cross.
pub const REASONABLE_STEP_SIZE_TARGET: f64 = 0.65;

/// A stochastic approximation scheme for the step size.
pub trait StepSizeAdapter {
    type State: StepSizeState;

    /// A fresh state centred on `step_size`.
    fn init(&self, step_size: f64) -> Self::State;

    /// Returns the state after observing one acceptance probability.
    fn update(&self, state: &Self::State, acceptance_probability: f64) -> Self::State;
}

/// What the warmup driver reads from a step size estimator.
pub trait StepSizeState: Clone {
    /// Log of the step size handed to the kernel at the next transition.
    fn log_step_size(&self) -> f64;

    /// Log of the averaged step size, used once warmup is over.
    fn log_step_size_avg(&self) -> f64;
}

/// Parameters of the dual averaging scheme.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DualAveraging {
    pub target_acceptance: f64,
    /// Regularization scale.
    pub gamma: f64,
    /// Offset damping the first iterations.
    pub t0: f64,
    /// Decay exponent of the averaging weights.
    pub kappa: f64,
}

impl Default for DualAveraging {
    fn default() -> Self {
        Self {
            target_acceptance: 0.8,
            gamma: 0.05,
            t0: 10.0,
            kappa: 0.75,
        }
    }
}

impl DualAveraging {
    pub fn new(target_acceptance: f64) -> Self {
        Self {
            target_acceptance,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DualAveragingState {
    pub log_step_size: f64,
    pub log_step_size_avg: f64,
    /// Number of updates since the last (re)initialization.
    pub step: usize,
    /// Running average of `target - acceptance`.
    pub avg_error: f64,
    /// Shrinkage point, `log(10 ε₀)`.
    pub mu: f64,
}

impl StepSizeState for DualAveragingState {
    fn log_step_size(&self) -> f64 {
        self.log_step_size
    }

    fn log_step_size_avg(&self) -> f64 {
        self.log_step_size_avg
    }
}

impl StepSizeAdapter for DualAveraging {
    type State = DualAveragingState;

    fn init(&self, step_size: f64) -> DualAveragingState {
        let log_step_size = step_size.ln();
        DualAveragingState {
            log_step_size,
            log_step_size_avg: log_step_size,
            step: 0,
            avg_error: 0.0,
            mu: (10.0 * step_size).ln(),
        }
    }

    fn update(&self, state: &DualAveragingState, acceptance_probability: f64) -> DualAveragingState {
        let step = state.step + 1;
        let m = step as f64;
        let w = 1.0 / (m + self.t0);
        let avg_error =
            (1.0 - w) * state.avg_error + w * (self.target_acceptance - acceptance_probability);
        let log_step_size = state.mu - (m.sqrt() / self.gamma) * avg_error;
        let eta = m.powf(-self.kappa);
        let log_step_size_avg = eta * log_step_size + (1.0 - eta) * state.log_step_size_avg;
        DualAveragingState {
            log_step_size,
            log_step_size_avg,
            step,
            avg_error,
            mu: state.mu,
        }
    }
}

/// Checks the kernel's side of the acceptance probability contract.
pub(crate) fn checked_acceptance<I: TransitionInfo>(info: &I) -> Result<f64> {
    let value = info.acceptance_probability();
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(WarmupError::InvalidAcceptance { value })
    }
}

/// Finds a step size at which one transition from `state` has an acceptance
/// probability close to `target_acceptance`.
///
/// Starting from `initial_step_size`, the step size is doubled while the acceptance
/// probability stays above the target and halved while it stays below, and the
/// search stops at the first crossing. The floating point range bounds the number of
/// iterations. Every trial transition uses its own seed derived from `seed`.
pub fn find_reasonable_step_size<F: KernelFactory>(
    seed: u64,
    factory: &F,
    inverse_mass_matrix: &InverseMassMatrix,
    state: &F::State,
    initial_step_size: f64,
    target_acceptance: f64,
) -> Result<f64> {
    let mut seeds = SeedStream::new(seed);
    let mut step_size = initial_step_size;
    let mut direction = 0_i32;
    let mut previous_direction = 0_i32;

    loop {
        let not_too_large = step_size < f64::MAX || direction <= 0;
        let not_too_small = step_size > f64::MIN_POSITIVE || direction >= 0;
        let not_crossed = previous_direction == 0 || direction == previous_direction;
        if !(not_too_large && not_too_small && not_crossed) {
            break;
        }

        step_size *= 2_f64.powi(direction);
        let kernel = factory.build(step_size, inverse_mass_matrix)?;
        let (_, info) = kernel.transition(seeds.next_seed(), state);
        let acceptance = checked_acceptance(&info)?;

        previous_direction = direction;
        direction = if target_acceptance < acceptance { 1 } else { -1 };
    }

    Ok(step_size.clamp(f64::MIN_POSITIVE, f64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::IsotropicGaussian;
    use crate::hmc::Hmc;
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;

    #[test]
    fn test_init_keeps_step_size() {
        let state = DualAveraging::default().init(0.25);
        assert_abs_diff_eq!(state.log_step_size.exp(), 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(state.log_step_size_avg.exp(), 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(state.mu, 2.5_f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_acceptance_at_target_is_stationary() {
        let adapter = DualAveraging::new(0.8);
        let mut state = adapter.update(&adapter.init(0.1), 0.8);
        let after_first = state.log_step_size;
        for _ in 0..5_000 {
            state = adapter.update(&state, 0.8);
            assert_abs_diff_eq!(state.log_step_size, after_first, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(state.avg_error, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(state.log_step_size_avg, after_first, epsilon = 1e-6);
    }

    #[test]
    fn test_adapts_in_the_right_direction() {
        let adapter = DualAveraging::new(0.8);
        let high = (0..200).fold(adapter.init(0.01), |s, _| adapter.update(&s, 0.99));
        let low = (0..200).fold(adapter.init(1.0), |s, _| adapter.update(&s, 0.1));
        assert!(
            high.log_step_size_avg > low.log_step_size_avg,
            "high acceptance should yield a larger step: {} vs {}",
            high.log_step_size_avg,
            low.log_step_size_avg
        );
        assert!(high.log_step_size > high.mu);
        assert!(low.log_step_size < low.mu);
    }

    #[test]
    fn test_update_is_pure() {
        let adapter = DualAveraging::default();
        let state = adapter.init(0.5);
        assert_eq!(adapter.update(&state, 0.3), adapter.update(&state, 0.3));
        assert_eq!(state.step, 0);
    }

    #[test]
    fn test_reasonable_step_size_brackets_target() {
        let factory = Hmc::new(IsotropicGaussian::new(arr1(&[0.0, 0.0, 0.0]), 1.0), 1);
        let state = factory.init_state(arr1(&[0.5, 0.5, 0.5]));
        let metric = InverseMassMatrix::identity(3, true);

        let from_small =
            find_reasonable_step_size(1, &factory, &metric, &state, 1e-6, 0.65).unwrap();
        let from_large =
            find_reasonable_step_size(1, &factory, &metric, &state, 1e3, 0.65).unwrap();
        for eps in [from_small, from_large] {
            assert!(eps.is_finite() && eps > 1e-3 && eps < 10.0, "step size {eps}");
        }
    }

    #[test]
    fn test_reasonable_step_size_is_reproducible() {
        let factory = Hmc::new(IsotropicGaussian::new(arr1(&[0.0, 0.0]), 3.0), 5);
        let state = factory.init_state(arr1(&[1.0, -2.0]));
        let metric = InverseMassMatrix::identity(2, false);
        let a = find_reasonable_step_size(9, &factory, &metric, &state, 1.0, 0.65).unwrap();
        let b = find_reasonable_step_size(9, &factory, &metric, &state, 1.0, 0.65).unwrap();
        assert_eq!(a, b);
    }
}
