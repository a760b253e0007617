/*!
# Hamiltonian Monte Carlo with a Euclidean metric.

A fixed-trajectory HMC kernel whose kinetic energy is `½ pᵀ M⁻¹ p`. It is the
default kernel tuned by the window warmup: [`Hmc`] is a [`KernelFactory`] that turns
a step size and an inverse mass matrix into an [`HmcKernel`], and every transition
is seeded explicitly so warmup runs are reproducible.

## Example

```rust
use ndarray::arr1;
use window_warmup::distributions::IsotropicGaussian;
use window_warmup::hmc::Hmc;
use window_warmup::kernel::{KernelFactory, Transition};
use window_warmup::mass_matrix::InverseMassMatrix;

let target = IsotropicGaussian::new(arr1(&[0.0, 0.0]), 1.0);
let factory = Hmc::new(target, 10);
let state = factory.init_state(arr1(&[1.0, -1.0]));

let kernel = factory
    .build(0.1, &InverseMassMatrix::identity(2, true))
    .unwrap();
let (next, info) = kernel.transition(42, &state);
assert!((0.0..=1.0).contains(&info.acceptance_probability));
assert_eq!(next.position.len(), 2);
```
*/

use crate::error::Result;
use crate::kernel::{ChainState, KernelFactory, Transition, TransitionInfo};
use crate::mass_matrix::{InverseMassMatrix, MomentumGenerator};
use ndarray::Array1;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardUniform;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Energy error above which a trajectory is flagged as divergent.
const DIVERGENCE_THRESHOLD: f64 = 1000.0;

/// A target density that writes its gradient in-place for a given position.
pub trait HamiltonianTarget {
    /// Returns the log-density at `position` and writes the gradient into `grad`.
    fn logp_and_grad(&self, position: &Array1<f64>, grad: &mut Array1<f64>) -> f64;
}

/// Position of an HMC chain together with the cached density and its gradient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HmcState {
    pub position: Array1<f64>,
    pub logdensity: f64,
    pub logdensity_grad: Array1<f64>,
}

impl ChainState for HmcState {
    type Position = Array1<f64>;

    fn position(&self) -> &Array1<f64> {
        &self.position
    }
}

/// Diagnostics of one HMC transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HmcInfo {
    pub acceptance_probability: f64,
    pub is_accepted: bool,
    pub is_divergent: bool,
    /// Total energy of the returned state.
    pub energy: f64,
    pub num_integration_steps: usize,
}

impl TransitionInfo for HmcInfo {
    fn acceptance_probability(&self) -> f64 {
        self.acceptance_probability
    }
}

/// Kernel factory for HMC with `num_integration_steps` leapfrog steps per transition.
#[derive(Debug)]
pub struct Hmc<Target> {
    target: Arc<Target>,
    num_integration_steps: usize,
}

impl<Target> Clone for Hmc<Target> {
    fn clone(&self) -> Self {
        Self {
            target: Arc::clone(&self.target),
            num_integration_steps: self.num_integration_steps,
        }
    }
}

impl<Target: HamiltonianTarget> Hmc<Target> {
    pub fn new(target: Target, num_integration_steps: usize) -> Self {
        assert!(
            num_integration_steps > 0,
            "num_integration_steps must be positive"
        );
        Self {
            target: Arc::new(target),
            num_integration_steps,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn num_integration_steps(&self) -> usize {
        self.num_integration_steps
    }

    /// Evaluates the target at `position` to build an initial chain state.
    pub fn init_state(&self, position: Array1<f64>) -> HmcState {
        let mut grad = Array1::zeros(position.len());
        let logdensity = self.target.logp_and_grad(&position, &mut grad);
        HmcState {
            position,
            logdensity,
            logdensity_grad: grad,
        }
    }
}

impl<Target: HamiltonianTarget> KernelFactory for Hmc<Target> {
    type State = HmcState;
    type Info = HmcInfo;
    type Kernel = HmcKernel<Target>;

    fn build(
        &self,
        step_size: f64,
        inverse_mass_matrix: &InverseMassMatrix,
    ) -> Result<HmcKernel<Target>> {
        Ok(HmcKernel {
            target: Arc::clone(&self.target),
            step_size,
            num_integration_steps: self.num_integration_steps,
            inverse_mass_matrix: inverse_mass_matrix.clone(),
            momentum: inverse_mass_matrix.momentum_generator()?,
        })
    }
}

/// One-step HMC kernel with fixed step size and metric.
#[derive(Debug)]
pub struct HmcKernel<Target> {
    target: Arc<Target>,
    step_size: f64,
    num_integration_steps: usize,
    inverse_mass_matrix: InverseMassMatrix,
    momentum: MomentumGenerator,
}

impl<Target: HamiltonianTarget> HmcKernel<Target> {
    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    fn leapfrog(&self, state: &mut HmcState, momentum: &mut Array1<f64>) {
        let half = 0.5 * self.step_size;
        for _ in 0..self.num_integration_steps {
            momentum.scaled_add(half, &state.logdensity_grad);
            let velocity = self.inverse_mass_matrix.apply(momentum);
            state.position.scaled_add(self.step_size, &velocity);
            state.logdensity = self
                .target
                .logp_and_grad(&state.position, &mut state.logdensity_grad);
            momentum.scaled_add(half, &state.logdensity_grad);
        }
    }
}

impl<Target: HamiltonianTarget> Transition for HmcKernel<Target> {
    type State = HmcState;
    type Info = HmcInfo;

    fn transition(&self, seed: u64, state: &HmcState) -> (HmcState, HmcInfo) {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut momentum = self.momentum.sample(&mut rng);
        let energy_current =
            -state.logdensity + self.inverse_mass_matrix.kinetic_energy(&momentum);

        let mut proposal = state.clone();
        self.leapfrog(&mut proposal, &mut momentum);
        let energy_proposed =
            -proposal.logdensity + self.inverse_mass_matrix.kinetic_energy(&momentum);

        let mut log_accept = energy_current - energy_proposed;
        if log_accept.is_nan() {
            log_accept = f64::NEG_INFINITY;
        }
        let is_divergent = -log_accept > DIVERGENCE_THRESHOLD;
        let acceptance_probability = log_accept.min(0.0).exp();

        let ln_u: f64 = rng.sample::<f64, _>(StandardUniform).ln();
        let is_accepted = ln_u <= log_accept;
        let (next, energy) = if is_accepted {
            (proposal, energy_proposed)
        } else {
            (state.clone(), energy_current)
        };

        (
            next,
            HmcInfo {
                acceptance_probability,
                is_accepted,
                is_divergent,
                energy,
                num_integration_steps: self.num_integration_steps,
            },
        )
    }
}
