//! Seams between the warmup driver and the transition kernel it tunes.
//!
//! The driver only ever sees a kernel through these traits: it builds a one-step
//! kernel from a step size and an inverse mass matrix, advances the chain once with
//! an explicit seed, and reads the acceptance probability off the returned info.

use crate::error::Result;
use crate::euclidean::EuclideanVector;
use crate::mass_matrix::InverseMassMatrix;

/// State of a single Markov chain.
pub trait ChainState: Clone {
    type Position: EuclideanVector;

    /// The point in parameter space the chain currently occupies.
    fn position(&self) -> &Self::Position;
}

/// Statistics reported by one transition.
pub trait TransitionInfo: Clone {
    /// Acceptance probability of the transition, expected in `[0, 1]`.
    fn acceptance_probability(&self) -> f64;
}

/// A transition kernel with fixed tuning parameters.
pub trait Transition {
    type State;
    type Info;

    /// Advances `state` by one step. Must be a pure function of `seed` and `state`.
    fn transition(&self, seed: u64, state: &Self::State) -> (Self::State, Self::Info);
}

/// Builds kernels for a given step size and inverse mass matrix.
pub trait KernelFactory {
    type State: ChainState;
    type Info: TransitionInfo;
    type Kernel: Transition<State = Self::State, Info = Self::Info>;

    /// Fails when the inverse mass matrix cannot be used as a metric.
    fn build(&self, step_size: f64, inverse_mass_matrix: &InverseMassMatrix)
        -> Result<Self::Kernel>;
}
