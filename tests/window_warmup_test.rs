//! End-to-end tests of the window adaptation on Gaussian targets.
//!
//! The adapted inverse mass matrix is compared both to the true covariance and,
//! exactly, to the regularized sample covariance of the draws of the last slow window.

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2, Array1, Array2};
    use ndarray_stats::CorrelationExt;
    use ndarray_stats::QuantileExt;
    use window_warmup::config::WarmupConfig;
    use window_warmup::distributions::{DiagonalGaussian, Gaussian};
    use window_warmup::hmc::{Hmc, HmcState};
    use window_warmup::kernel::{KernelFactory, Transition};
    use window_warmup::mass_matrix::{InverseMassMatrix, WelfordAdaptation};
    use window_warmup::schedule::{build_schedule, slow_window_ends, WindowLabel};
    use window_warmup::step_size::DualAveraging;
    use window_warmup::warmup::{AdaptationState, WindowAdaptation};

    // Shared constants.
    const NUM_STEPS: usize = 1000;
    const SEED: u64 = 42;
    const INTEGRATION_STEPS: usize = 8;
    const INITIAL_POSITION: [f64; 2] = [3.0, -2.0];

    type WarmupState = AdaptationState<DualAveraging, WelfordAdaptation>;

    fn correlated_target() -> Gaussian {
        Gaussian::new(arr1(&[0.0, 1.0]), arr2(&[[4.0, 2.0], [2.0, 3.0]])).unwrap()
    }

    /// Positions of the draws that fed the final inverse mass matrix.
    fn last_window_draws(states: &[HmcState], config: &WarmupConfig) -> Array2<f64> {
        let schedule = build_schedule(config.num_steps, &config.windows).unwrap();
        let ends = slow_window_ends(&schedule);
        let (start, end) = (ends[ends.len() - 2], ends[ends.len() - 1]);
        // Entry i produces warmup step i + 1.
        let draws = &states[start - 1..end - 1];
        let mut out = Array2::zeros((draws.len(), 2));
        for (mut row, state) in out.rows_mut().into_iter().zip(draws) {
            row.assign(&state.position);
        }
        out
    }

    fn regularized(cov: &Array2<f64>, n: usize) -> Array2<f64> {
        let n = n as f64;
        let mut out = cov * (n / (n + 5.0));
        out.diag_mut().mapv_inplace(|v| v + 1e-3 * 5.0 / (n + 5.0));
        out
    }

    #[test]
    fn test_dense_metric_matches_target_covariance() {
        let target = correlated_target();
        let true_cov = target.cov.clone();
        let factory = Hmc::new(target, INTEGRATION_STEPS);
        let initial_state = factory.init_state(arr1(&INITIAL_POSITION));
        let config = WarmupConfig::default().with_num_steps(NUM_STEPS).dense();
        let adaptation = WindowAdaptation::new(factory, config).unwrap();

        let result = adaptation.run(SEED, initial_state).unwrap();
        let adapted = match &result.inverse_mass_matrix {
            InverseMassMatrix::Dense(matrix) => matrix.clone(),
            other => panic!("expected a dense matrix, got {other:?}"),
        };

        let max_diff = *(&adapted - &true_cov).mapv(f64::abs).max().unwrap();
        assert!(
            max_diff < 1.5,
            "adapted inverse mass matrix {adapted} too far from {true_cov} (max_diff {max_diff})"
        );

        let states: Vec<HmcState> = result.trajectory.iter().map(|s| s.state.clone()).collect();
        let draws = last_window_draws(&states, &config);
        assert_eq!(draws.nrows(), 500);
        let sample_cov = draws.t().cov(1.0).unwrap();
        assert_abs_diff_eq!(adapted, regularized(&sample_cov, 500), epsilon = 1e-8);
    }

    #[test]
    fn test_diagonal_metric_matches_target_variances() {
        let target = DiagonalGaussian::new(arr1(&[1.0, -1.0]), arr1(&[3.0, 0.5]));
        let factory = Hmc::new(target, INTEGRATION_STEPS);
        let initial_state = factory.init_state(arr1(&INITIAL_POSITION));
        let config = WarmupConfig::default().with_num_steps(NUM_STEPS);
        let adaptation = WindowAdaptation::new(factory, config).unwrap();

        let result = adaptation.run(SEED, initial_state).unwrap();
        let adapted = match &result.inverse_mass_matrix {
            InverseMassMatrix::Diagonal(diag) => diag.clone(),
            other => panic!("expected a diagonal matrix, got {other:?}"),
        };

        let expected = arr1(&[9.0, 0.25]);
        let relative = (&adapted - &expected) / &expected;
        assert!(
            relative.iter().all(|r| r.abs() < 0.35),
            "adapted variances {adapted} too far from {expected}"
        );

        let states: Vec<HmcState> = result.trajectory.iter().map(|s| s.state.clone()).collect();
        let draws = last_window_draws(&states, &config);
        let sample_cov = draws.t().cov(1.0).unwrap();
        let expected_diag: Array1<f64> = regularized(&sample_cov, draws.nrows()).diag().to_owned();
        assert_abs_diff_eq!(adapted, expected_diag, epsilon = 1e-8);
    }

    #[test]
    fn test_trajectory_follows_stan_schedule() {
        let factory = Hmc::new(correlated_target(), INTEGRATION_STEPS);
        let initial_state = factory.init_state(arr1(&INITIAL_POSITION));
        let adaptation =
            WindowAdaptation::new(factory, WarmupConfig::default().with_num_steps(NUM_STEPS))
                .unwrap();

        let result = adaptation.run(SEED, initial_state).unwrap();
        assert_eq!(result.trajectory.len(), NUM_STEPS - 1);

        let reset_indices: Vec<usize> = result.step_size_resets().map(|(i, _)| i).collect();
        assert_eq!(reset_indices, vec![98, 148, 248, 448, 948]);
        for (i, reset) in result.step_size_resets() {
            assert!(reset.step_size.is_finite() && reset.step_size > 0.0);
            let warmup_state = &result.trajectory[i].warmup_state;
            assert_eq!(warmup_state.step_size.step, 0);
            assert_eq!(warmup_state.mm_background.count, 0);
        }

        // The initial fast window never touches the estimators.
        let before_slow = &result.trajectory[73].warmup_state;
        assert_eq!(before_slow.mm_foreground.count, 0);
        assert_eq!(result.trajectory[74].warmup_state.mm_foreground.count, 1);

        // Neither does the final one.
        let at_final_start = &result.trajectory[948].warmup_state.mm_foreground;
        let at_end = &result.trajectory[NUM_STEPS - 2].warmup_state.mm_foreground;
        assert_eq!(at_final_start, at_end);
        assert_eq!(at_end.count, 500);
    }

    #[test]
    fn test_foreground_carries_previous_window_draws() {
        let factory = Hmc::new(correlated_target(), INTEGRATION_STEPS);
        let initial_state = factory.init_state(arr1(&INITIAL_POSITION));
        let config = WarmupConfig::default().with_num_steps(NUM_STEPS).dense();
        let adaptation = WindowAdaptation::new(factory, config).unwrap();
        let result = adaptation.run(SEED, initial_state).unwrap();

        // Entry 110 sits in the second slow window (entries 99..=148). The foreground
        // holds the 25 draws of the first window plus the 12 seen so far, the
        // background only the latter.
        let warmup_state = &result.trajectory[110].warmup_state;
        assert_eq!(warmup_state.mm_foreground.count, 25 + 12);
        assert_eq!(warmup_state.mm_background.count, 12);

        let draws = &result.trajectory[74..=110];
        let mut positions = Array2::zeros((draws.len(), 2));
        for (mut row, step) in positions.rows_mut().into_iter().zip(draws) {
            row.assign(&step.state.position);
        }
        let sample_cov = positions.t().cov(1.0).unwrap();
        let adapted = match adaptation.finalize(warmup_state).unwrap().1 {
            InverseMassMatrix::Dense(matrix) => matrix,
            other => panic!("expected a dense matrix, got {other:?}"),
        };
        assert_abs_diff_eq!(adapted, regularized(&sample_cov, 37), epsilon = 1e-8);
    }

    #[test]
    fn test_adapted_parameters_give_reasonable_acceptance() {
        let factory = Hmc::new(correlated_target(), INTEGRATION_STEPS);
        let initial_state = factory.init_state(arr1(&INITIAL_POSITION));
        let config = WarmupConfig::default().with_num_steps(NUM_STEPS).dense();
        let adaptation = WindowAdaptation::new(factory.clone(), config).unwrap();
        let result = adaptation.run(SEED, initial_state).unwrap();

        let kernel = factory
            .build(result.step_size, &result.inverse_mass_matrix)
            .unwrap();
        let mut state = result.last_state.clone();
        let mut acceptance = 0.0;
        let n = 500;
        for seed in 0..n {
            let (next, info) = kernel.transition(seed, &state);
            acceptance += info.acceptance_probability;
            state = next;
        }
        let mean = acceptance / n as f64;
        assert!(
            (0.5..=0.99).contains(&mean),
            "mean acceptance after warmup {mean}"
        );
    }

    #[test]
    fn test_same_seed_same_warmup() {
        let factory = Hmc::new(correlated_target(), INTEGRATION_STEPS);
        let initial_state = factory.init_state(arr1(&INITIAL_POSITION));
        let adaptation =
            WindowAdaptation::new(factory, WarmupConfig::default().with_num_steps(300).dense())
                .unwrap();

        let plain = adaptation.run(SEED, initial_state.clone()).unwrap();
        let with_progress = adaptation.run_progress(SEED, initial_state).unwrap();
        assert_eq!(plain, with_progress);
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let factory = Hmc::new(correlated_target(), INTEGRATION_STEPS);
        let initial_state = factory.init_state(arr1(&INITIAL_POSITION));
        let adaptation =
            WindowAdaptation::new(factory, WarmupConfig::default().with_num_steps(200).dense())
                .unwrap();
        let result = adaptation.run(SEED, initial_state).unwrap();

        let checkpoint = &result.trajectory[120];
        let state_json = serde_json::to_string(&checkpoint.state).unwrap();
        let warmup_json = serde_json::to_string(&checkpoint.warmup_state).unwrap();
        let state: HmcState = serde_json::from_str(&state_json).unwrap();
        let warmup_state: WarmupState = serde_json::from_str(&warmup_json).unwrap();
        assert_eq!(state, checkpoint.state);
        assert_eq!(warmup_state, checkpoint.warmup_state);

        // Resuming from the restored checkpoint reproduces the original continuation.
        let resumed = adaptation
            .update(5, WindowLabel::Slow, false, &state, &warmup_state)
            .unwrap();
        let original = adaptation
            .update(5, WindowLabel::Slow, false, &checkpoint.state, &checkpoint.warmup_state)
            .unwrap();
        assert_eq!(resumed, original);
        assert_eq!(
            adaptation.finalize(&warmup_state).unwrap(),
            adaptation.finalize(&checkpoint.warmup_state).unwrap()
        );
    }
}
