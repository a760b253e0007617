/*!
# Window adaptation.

Stan's warmup: the step size is tuned by dual averaging during the whole run, while
the inverse mass matrix is estimated over a series of doubling "slow" windows (see
[`crate::schedule`]). Two mass matrix estimators are carried at all times. The
foreground one feeds the kernel, the background one only sees the current window.
When a slow window closes, the background estimator is promoted, a fresh one takes
its place, and the step size search is re-run so dual averaging restarts from a
sensible value.

[`WindowAdaptation::init`], [`WindowAdaptation::update`] and
[`WindowAdaptation::finalize`] are pure functions of their inputs and an explicit
seed, so an external driver can fold them over any schedule and checkpoint the
[`WindowWarmupState`] between steps. [`WindowAdaptation::run`] does the fold for you.

## Example

```rust
use ndarray::arr1;
use window_warmup::config::WarmupConfig;
use window_warmup::distributions::IsotropicGaussian;
use window_warmup::hmc::Hmc;
use window_warmup::warmup::WindowAdaptation;

let factory = Hmc::new(IsotropicGaussian::new(arr1(&[0.0, 0.0]), 2.0), 5);
let initial_state = factory.init_state(arr1(&[1.0, -1.0]));

let config = WarmupConfig::default().with_num_steps(200);
let adaptation = WindowAdaptation::new(factory, config).unwrap();
let result = adaptation.run(42, initial_state).unwrap();

assert_eq!(result.trajectory.len(), 199);
assert!(result.step_size > 0.0);
assert_eq!(result.inverse_mass_matrix.dim(), 2);
```
*/

use crate::config::{validate_step_size, WarmupConfig};
use crate::error::{Result, WarmupError};
use crate::euclidean::EuclideanVector;
use crate::kernel::{ChainState, KernelFactory, Transition, TransitionInfo};
use crate::mass_matrix::{InverseMassMatrix, MassMatrixAdapter, WelfordAdaptation};
use crate::schedule::{build_schedule, slow_window_ends, WindowLabel};
use crate::seed::{split, SeedStream};
use crate::step_size::{
    checked_acceptance, find_reasonable_step_size, DualAveraging, StepSizeAdapter,
    StepSizeState, REASONABLE_STEP_SIZE_TARGET,
};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

/// Composite adaptation state threaded through the warmup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowWarmupState<S, M> {
    /// Dual averaging state, reseeded whenever a slow window closes.
    pub step_size: S,
    /// Estimator the kernel's inverse mass matrix is read from.
    pub mm_foreground: M,
    /// Estimator restricted to the current slow window.
    pub mm_background: M,
}

impl<S: StepSizeState, M> WindowWarmupState<S, M> {
    /// Step size the next transition will use.
    pub fn current_step_size(&self) -> f64 {
        self.step_size.log_step_size().exp()
    }
}

/// Emitted when a slow window closes and the step size search is re-run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepSizeReset {
    /// Dual averaging iterate just before the restart.
    pub previous_step_size: f64,
    /// Result of the search, the new starting point of dual averaging.
    pub step_size: f64,
}

/// One warmup transition, as recorded by [`WindowAdaptation::run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmupStep<S, W, I> {
    pub state: S,
    pub warmup_state: W,
    pub info: I,
    pub step_size_reset: Option<StepSizeReset>,
}

/// Outcome of a complete warmup run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmupResult<S, W, I> {
    pub last_state: S,
    pub step_size: f64,
    pub inverse_mass_matrix: InverseMassMatrix,
    pub trajectory: Vec<WarmupStep<S, W, I>>,
}

impl<S, W, I: TransitionInfo> WarmupResult<S, W, I> {
    /// Average acceptance probability over the trajectory, `NaN` if it is empty.
    pub fn mean_acceptance_probability(&self) -> f64 {
        let total: f64 = self
            .trajectory
            .iter()
            .map(|step| step.info.acceptance_probability())
            .sum();
        total / self.trajectory.len() as f64
    }

    /// Indices of the steps that closed a slow window, with their reset events.
    pub fn step_size_resets(&self) -> impl Iterator<Item = (usize, &StepSizeReset)> + '_ {
        self.trajectory
            .iter()
            .enumerate()
            .filter_map(|(i, step)| step.step_size_reset.as_ref().map(|reset| (i, reset)))
    }
}

/// Composite state for a given pair of adapters.
pub type AdaptationState<A, M> =
    WindowWarmupState<<A as StepSizeAdapter>::State, <M as MassMatrixAdapter>::State>;

/// Result of [`WindowAdaptation::run`] for a given factory and adapters.
pub type WarmupOutcome<F, A, M> = WarmupResult<
    <F as KernelFactory>::State,
    AdaptationState<A, M>,
    <F as KernelFactory>::Info,
>;

type StepOutput<F, A, M> = (
    <F as KernelFactory>::State,
    AdaptationState<A, M>,
    <F as KernelFactory>::Info,
    Option<StepSizeReset>,
);

/// Window adaptation of the step size and inverse mass matrix of a kernel.
#[derive(Debug, Clone)]
pub struct WindowAdaptation<F, A = DualAveraging, M = WelfordAdaptation> {
    factory: F,
    step_size_adapter: A,
    mass_matrix_adapter: M,
    config: WarmupConfig,
}

impl<F: KernelFactory> WindowAdaptation<F> {
    /// Dual averaging and Welford estimation, configured from `config`.
    pub fn new(factory: F, config: WarmupConfig) -> Result<Self> {
        let step_size_adapter = DualAveraging::new(config.target_acceptance);
        let mass_matrix_adapter = WelfordAdaptation::new(config.diagonal_mass_matrix);
        Self::with_adapters(factory, config, step_size_adapter, mass_matrix_adapter)
    }
}

impl<F, A, M> WindowAdaptation<F, A, M>
where
    F: KernelFactory,
    A: StepSizeAdapter,
    M: MassMatrixAdapter,
{
    /// Uses custom estimators. The step size and metric settings of `config` are
    /// then only used through them.
    pub fn with_adapters(
        factory: F,
        config: WarmupConfig,
        step_size_adapter: A,
        mass_matrix_adapter: M,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            factory,
            step_size_adapter,
            mass_matrix_adapter,
            config,
        })
    }

    pub fn config(&self) -> &WarmupConfig {
        &self.config
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Builds the initial composite state.
    ///
    /// Both mass matrix estimators start empty, so the kernel starts on the identity
    /// metric, and the step size is seeded by a reasonable step size search from
    /// `initial_step_size`.
    pub fn init(
        &self,
        seed: u64,
        initial_state: &F::State,
        initial_step_size: f64,
    ) -> Result<AdaptationState<A, M>> {
        validate_step_size(initial_step_size)?;
        let dim = initial_state.position().len();
        let mm_foreground = self.mass_matrix_adapter.init(dim);
        let mm_background = self.mass_matrix_adapter.init(dim);
        let inverse_mass_matrix = self.mass_matrix_adapter.finalize(&mm_foreground)?;
        let step_size = find_reasonable_step_size(
            seed,
            &self.factory,
            &inverse_mass_matrix,
            initial_state,
            initial_step_size,
            REASONABLE_STEP_SIZE_TARGET,
        )?;
        debug!(dim, step_size, "initialized window adaptation");
        Ok(WindowWarmupState {
            step_size: self.step_size_adapter.init(step_size),
            mm_foreground,
            mm_background,
        })
    }

    /// Advances the chain once and updates the estimators the window calls for.
    ///
    /// Fast windows only update the step size. Slow windows also feed the new
    /// position to both mass matrix estimators, and `is_window_end` triggers the
    /// window restart.
    pub fn update(
        &self,
        seed: u64,
        window: WindowLabel,
        is_window_end: bool,
        state: &F::State,
        warmup_state: &AdaptationState<A, M>,
    ) -> Result<(F::State, AdaptationState<A, M>, F::Info)> {
        let (state, warmup_state, info, _) =
            self.step(seed, window, is_window_end, state, warmup_state)?;
        Ok((state, warmup_state, info))
    }

    /// Averaged step size and the foreground estimate of the inverse mass matrix.
    pub fn finalize(&self, warmup_state: &AdaptationState<A, M>) -> Result<(f64, InverseMassMatrix)> {
        let step_size = warmup_state.step_size.log_step_size_avg().exp();
        let inverse_mass_matrix = self
            .mass_matrix_adapter
            .finalize(&warmup_state.mm_foreground)?;
        Ok((step_size, inverse_mass_matrix))
    }

    fn step(
        &self,
        seed: u64,
        window: WindowLabel,
        is_window_end: bool,
        state: &F::State,
        warmup_state: &AdaptationState<A, M>,
    ) -> Result<StepOutput<F, A, M>> {
        let (kernel_seed, restart_seed) = split(seed);

        let inverse_mass_matrix = self
            .mass_matrix_adapter
            .finalize(&warmup_state.mm_foreground)?;
        let dim = state.position().len();
        if inverse_mass_matrix.dim() != dim {
            return Err(WarmupError::DimensionMismatch {
                expected: inverse_mass_matrix.dim(),
                found: dim,
            });
        }
        let kernel = self
            .factory
            .build(warmup_state.current_step_size(), &inverse_mass_matrix)?;
        let (new_state, info) = kernel.transition(kernel_seed, state);
        let acceptance = checked_acceptance(&info)?;

        let step_size = self
            .step_size_adapter
            .update(&warmup_state.step_size, acceptance);
        let (mm_foreground, mm_background) = match window {
            WindowLabel::Fast => (
                warmup_state.mm_foreground.clone(),
                warmup_state.mm_background.clone(),
            ),
            WindowLabel::Slow => {
                let position = new_state.position().ravel();
                (
                    self.mass_matrix_adapter
                        .update(&warmup_state.mm_foreground, position.view())?,
                    self.mass_matrix_adapter
                        .update(&warmup_state.mm_background, position.view())?,
                )
            }
        };
        let next = WindowWarmupState {
            step_size,
            mm_foreground,
            mm_background,
        };

        if !is_window_end {
            return Ok((new_state, next, info, None));
        }
        let (next, reset) = self.restart_window(restart_seed, &new_state, next)?;
        Ok((new_state, next, info, Some(reset)))
    }

    /// Promotes the background estimator and reseeds dual averaging.
    fn restart_window(
        &self,
        seed: u64,
        state: &F::State,
        warmup_state: AdaptationState<A, M>,
    ) -> Result<(AdaptationState<A, M>, StepSizeReset)> {
        let WindowWarmupState {
            step_size,
            mm_foreground,
            mm_background,
        } = warmup_state;

        let inverse_mass_matrix = self.mass_matrix_adapter.finalize(&mm_foreground)?;
        let previous_step_size = step_size.log_step_size().exp();
        let new_step_size = find_reasonable_step_size(
            seed,
            &self.factory,
            &inverse_mass_matrix,
            state,
            previous_step_size,
            REASONABLE_STEP_SIZE_TARGET,
        )?;

        let next = WindowWarmupState {
            step_size: self.step_size_adapter.init(new_step_size),
            mm_foreground: mm_background,
            mm_background: self.mass_matrix_adapter.init(state.position().len()),
        };
        let reset = StepSizeReset {
            previous_step_size,
            step_size: new_step_size,
        };
        Ok((next, reset))
    }

    /// Runs the complete warmup from `initial_state`.
    ///
    /// The schedule is built from the configuration, each step draws its own seed
    /// from `seed`, and errors raised inside the loop carry the index of the
    /// schedule entry that failed.
    pub fn run(&self, seed: u64, initial_state: F::State) -> Result<WarmupOutcome<F, A, M>> {
        self.fold(seed, initial_state, |_, _| {})
    }

    /// Same as [`run`](Self::run), with a progress bar showing the running
    /// acceptance probability and the current step size.
    pub fn run_progress(
        &self,
        seed: u64,
        initial_state: F::State,
    ) -> Result<WarmupOutcome<F, A, M>> {
        let pb = ProgressBar::new(self.config.num_steps.saturating_sub(1) as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:8} {bar:40.cyan/blue} {pos}/{len} ({eta}) | {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb.set_prefix("Warmup");

        let mut acceptance_sum = 0.0;
        let result = self.fold(seed, initial_state, |i, step| {
            acceptance_sum += step.info.acceptance_probability();
            pb.set_message(format!(
                "p(accept)≈{:.2} step≈{:.3}",
                acceptance_sum / (i + 1) as f64,
                step.warmup_state.current_step_size()
            ));
            pb.inc(1);
        });

        match &result {
            Ok(_) => pb.finish_with_message("Done!"),
            Err(err) => pb.abandon_with_message(format!("Failed: {err}")),
        }
        result
    }

    /// Warms up one independent chain per initial state in parallel.
    ///
    /// Chain `i` runs with seed `seed + i + 1`, so each result is identical to a
    /// sequential [`run`](Self::run) with that seed.
    pub fn run_chains(
        &self,
        seed: u64,
        initial_states: Vec<F::State>,
    ) -> Result<Vec<WarmupOutcome<F, A, M>>>
    where
        F: Sync,
        A: Sync,
        M: Sync,
        F::State: Send,
        F::Info: Send,
        A::State: Send,
        M::State: Send,
    {
        initial_states
            .into_par_iter()
            .enumerate()
            .map(|(i, state)| self.run(seed.wrapping_add(i as u64 + 1), state))
            .collect()
    }

    fn fold(
        &self,
        seed: u64,
        initial_state: F::State,
        mut on_step: impl FnMut(usize, &WarmupStep<F::State, AdaptationState<A, M>, F::Info>),
    ) -> Result<WarmupOutcome<F, A, M>> {
        let schedule = build_schedule(self.config.num_steps, &self.config.windows)?;
        info!(
            num_steps = self.config.num_steps,
            slow_windows = slow_window_ends(&schedule).len(),
            diagonal = self.config.diagonal_mass_matrix,
            "starting window adaptation"
        );

        let mut seeds = SeedStream::new(seed);
        let mut warmup_state =
            self.init(seeds.next_seed(), &initial_state, self.config.initial_step_size)?;
        let mut state = initial_state;
        let mut trajectory = Vec::with_capacity(schedule.len());

        for (i, entry) in schedule.iter().enumerate() {
            let (next_state, next_warmup_state, info, reset) = self
                .step(
                    seeds.next_seed(),
                    entry.window,
                    entry.is_window_end,
                    &state,
                    &warmup_state,
                )
                .map_err(|err| err.at_step(i))?;
            trace!(
                step = i,
                acceptance = info.acceptance_probability(),
                "warmup transition"
            );
            if let Some(reset) = &reset {
                debug!(
                    step = i,
                    previous_step_size = reset.previous_step_size,
                    step_size = reset.step_size,
                    "slow window closed"
                );
            }

            state = next_state;
            warmup_state = next_warmup_state;
            let record = WarmupStep {
                state: state.clone(),
                warmup_state: warmup_state.clone(),
                info,
                step_size_reset: reset,
            };
            on_step(i, &record);
            trajectory.push(record);
        }

        let (step_size, inverse_mass_matrix) = self.finalize(&warmup_state)?;
        info!(step_size, "window adaptation finished");
        Ok(WarmupResult {
            last_state: state,
            step_size,
            inverse_mass_matrix,
            trajectory,
        })
    }
}
