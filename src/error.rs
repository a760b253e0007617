//! Errors raised while configuring or running a warmup.

use thiserror::Error;

/// Everything that can abort a warmup run.
///
/// Configuration errors are reported before the first transition. Contract
/// violations raised inside the fold are wrapped in [`WarmupError::AtStep`] so the
/// offending schedule position can be recovered from the error.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum WarmupError {
    #[error("warmup budget must be positive")]
    EmptyBudget,
    #[error(
        "window widths must be positive (initial fast: {initial_fast}, first slow: {first_slow}, final fast: {final_fast})"
    )]
    InvalidWindows {
        initial_fast: usize,
        first_slow: usize,
        final_fast: usize,
    },
    #[error("initial step size must be positive and finite, got {0}")]
    InvalidStepSize(f64),
    #[error("target acceptance probability must lie in (0, 1), got {0}")]
    InvalidTargetAcceptance(f64),
    #[error("kernel reported acceptance probability {value} outside [0, 1]")]
    InvalidAcceptance { value: f64 },
    #[error("mass matrix estimator tracks {expected} dimensions but position has {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("inverse mass matrix is not positive definite (failed at pivot {pivot})")]
    NotPositiveDefinite { pivot: usize },
    #[error("diagonal inverse mass matrix has a non-finite or non-positive entry at {index}")]
    NonFiniteMatrix { index: usize },
    #[error("warmup step {step} failed: {source}")]
    AtStep {
        step: usize,
        #[source]
        source: Box<WarmupError>,
    },
}

impl WarmupError {
    /// Attaches the index of the schedule entry that produced this error.
    pub fn at_step(self, step: usize) -> Self {
        match self {
            already @ WarmupError::AtStep { .. } => already,
            other => WarmupError::AtStep {
                step,
                source: Box::new(other),
            },
        }
    }

    /// The schedule entry that failed, if known.
    pub fn step(&self) -> Option<usize> {
        match self {
            WarmupError::AtStep { step, .. } => Some(*step),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, WarmupError>;
