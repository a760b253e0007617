//! Mass matrix estimation.
//!
//! The inverse mass matrix is estimated as the (regularized) covariance of the
//! positions visited during a slow window, accumulated with Welford's streaming
//! algorithm. Estimator states are plain values: [`MassMatrixAdapter::update`]
//! returns a new state and never touches the old one, which is what lets the warmup
//! driver keep a foreground and a background estimator side by side.

use crate::error::{Result, WarmupError};
use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use ndarray::{Array1, Array2, ArrayView1, Axis, Zip};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Shrinkage applied to the covariance estimate, as in Stan.
const REGULARIZATION_PRIOR_COUNT: f64 = 5.0;
const REGULARIZATION_SCALE: f64 = 1e-3;

/// Inverse of the metric used by the Hamiltonian kinetic energy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InverseMassMatrix {
    Diagonal(Array1<f64>),
    Dense(Array2<f64>),
}

impl InverseMassMatrix {
    /// The uninformative starting point: all ones (diagonal) or the identity (dense).
    pub fn identity(dim: usize, diagonal: bool) -> Self {
        if diagonal {
            InverseMassMatrix::Diagonal(Array1::ones(dim))
        } else {
            InverseMassMatrix::Dense(Array2::eye(dim))
        }
    }

    pub fn dim(&self) -> usize {
        match self {
            InverseMassMatrix::Diagonal(d) => d.len(),
            InverseMassMatrix::Dense(m) => m.nrows(),
        }
    }

    pub fn is_diagonal(&self) -> bool {
        matches!(self, InverseMassMatrix::Diagonal(_))
    }

    /// Computes `M⁻¹ p`.
    pub fn apply(&self, momentum: &Array1<f64>) -> Array1<f64> {
        match self {
            InverseMassMatrix::Diagonal(d) => d * momentum,
            InverseMassMatrix::Dense(m) => m.dot(momentum),
        }
    }

    /// Kinetic energy `½ pᵀ M⁻¹ p`.
    pub fn kinetic_energy(&self, momentum: &Array1<f64>) -> f64 {
        0.5 * momentum.dot(&self.apply(momentum))
    }

    /// Checks that the matrix can be used as a metric.
    ///
    /// Diagonal entries must be finite and strictly positive; a dense matrix must
    /// admit a Cholesky factorization.
    pub fn validate(&self) -> Result<()> {
        match self {
            InverseMassMatrix::Diagonal(d) => {
                match d.iter().position(|v| !(v.is_finite() && *v > 0.0)) {
                    Some(index) => Err(WarmupError::NonFiniteMatrix { index }),
                    None => Ok(()),
                }
            }
            InverseMassMatrix::Dense(m) => cholesky(m).map(|_| ()),
        }
    }

    /// Precomputes what is needed to draw momenta `p ~ N(0, M)`.
    pub fn momentum_generator(&self) -> Result<MomentumGenerator> {
        self.validate()?;
        Ok(match self {
            InverseMassMatrix::Diagonal(d) => {
                MomentumGenerator::Diagonal(d.mapv(|v| 1.0 / v.sqrt()))
            }
            InverseMassMatrix::Dense(m) => MomentumGenerator::Dense(cholesky(m)?.unpack()),
        })
    }
}

/// Draws momenta distributed as `N(0, M)` given the inverse mass matrix `M⁻¹`.
#[derive(Debug, Clone, PartialEq)]
pub enum MomentumGenerator {
    /// Per-coordinate standard deviations `1 / sqrt(M⁻¹ᵢᵢ)`.
    Diagonal(Array1<f64>),
    /// Lower Cholesky factor `L` of `M⁻¹`; momenta solve `Lᵀ p = z`.
    Dense(DMatrix<f64>),
}

impl MomentumGenerator {
    pub fn sample(&self, rng: &mut impl Rng) -> Array1<f64> {
        match self {
            MomentumGenerator::Diagonal(scale) => {
                scale.mapv(|s| s * rng.sample::<f64, _>(StandardNormal))
            }
            MomentumGenerator::Dense(lower) => {
                let mut p =
                    DVector::<f64>::from_fn(lower.nrows(), |_, _| rng.sample(StandardNormal));
                let solved = lower.tr_solve_lower_triangular_mut(&mut p);
                debug_assert!(solved, "Cholesky factor has a zero on its diagonal");
                Array1::from_iter(p.iter().copied())
            }
        }
    }
}

fn to_nalgebra(a: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

fn to_ndarray(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Cholesky factorization of a symmetric positive definite matrix.
///
/// On failure the error names the first leading principal minor that is not
/// positive definite.
pub(crate) fn cholesky(a: &Array2<f64>) -> Result<Cholesky<f64, Dyn>> {
    if let Some(pivot) = a.outer_iter().position(|row| row.iter().any(|v| !v.is_finite())) {
        return Err(WarmupError::NotPositiveDefinite { pivot });
    }
    let matrix = to_nalgebra(a);
    match Cholesky::new(matrix.clone()) {
        Some(factor) => Ok(factor),
        None => Err(WarmupError::NotPositiveDefinite {
            pivot: failing_pivot(&matrix),
        }),
    }
}

fn failing_pivot(matrix: &DMatrix<f64>) -> usize {
    let n = matrix.nrows();
    (1..=n)
        .find(|&k| Cholesky::new(matrix.view((0, 0), (k, k)).clone_owned()).is_none())
        .map_or(n.saturating_sub(1), |k| k - 1)
}

/// Inverse of a symmetric positive definite matrix via its Cholesky factor.
pub(crate) fn spd_inverse(a: &Array2<f64>) -> Result<Array2<f64>> {
    Ok(to_ndarray(&cholesky(a)?.inverse()))
}

/// A streaming estimator of the inverse mass matrix.
pub trait MassMatrixAdapter {
    type State: Clone;

    /// A fresh, uninformative state over `dim` coordinates.
    fn init(&self, dim: usize) -> Self::State;

    /// Returns the state after observing one more position.
    fn update(&self, state: &Self::State, position: ArrayView1<f64>) -> Result<Self::State>;

    /// Turns the accumulated statistics into an inverse mass matrix. Finalizing a
    /// fresh state returns the identity (or all ones).
    fn finalize(&self, state: &Self::State) -> Result<InverseMassMatrix>;
}

/// Welford covariance estimation with Stan's regularization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelfordAdaptation {
    pub diagonal: bool,
}

impl WelfordAdaptation {
    pub fn new(diagonal: bool) -> Self {
        Self { diagonal }
    }
}

/// Second central moment accumulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Moments {
    Diagonal(Array1<f64>),
    Dense(Array2<f64>),
}

/// Running Welford statistics of the positions seen so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WelfordState {
    pub count: usize,
    pub mean: Array1<f64>,
    pub m2: Moments,
}

impl WelfordState {
    pub fn dim(&self) -> usize {
        self.mean.len()
    }
}

impl MassMatrixAdapter for WelfordAdaptation {
    type State = WelfordState;

    fn init(&self, dim: usize) -> WelfordState {
        let m2 = if self.diagonal {
            Moments::Diagonal(Array1::zeros(dim))
        } else {
            Moments::Dense(Array2::zeros((dim, dim)))
        };
        WelfordState {
            count: 0,
            mean: Array1::zeros(dim),
            m2,
        }
    }

    fn update(&self, state: &WelfordState, position: ArrayView1<f64>) -> Result<WelfordState> {
        if position.len() != state.dim() {
            return Err(WarmupError::DimensionMismatch {
                expected: state.dim(),
                found: position.len(),
            });
        }
        let count = state.count + 1;
        let n = count as f64;
        let delta = &position - &state.mean;
        let mean = &state.mean + &(&delta / n);
        let centered = &position - &mean;
        let m2 = match &state.m2 {
            Moments::Diagonal(m2) => {
                let mut next = m2.clone();
                Zip::from(&mut next)
                    .and(&delta)
                    .and(&centered)
                    .for_each(|m, &d, &c| *m += d * c);
                Moments::Diagonal(next)
            }
            Moments::Dense(m2) => {
                let outer = centered
                    .view()
                    .insert_axis(Axis(1))
                    .dot(&delta.view().insert_axis(Axis(0)));
                Moments::Dense(m2 + &outer)
            }
        };
        Ok(WelfordState { count, mean, m2 })
    }

    fn finalize(&self, state: &WelfordState) -> Result<InverseMassMatrix> {
        let dim = state.dim();
        if state.count < 2 {
            return Ok(InverseMassMatrix::identity(
                dim,
                matches!(state.m2, Moments::Diagonal(_)),
            ));
        }
        let n = state.count as f64;
        let weight = n / (n + REGULARIZATION_PRIOR_COUNT);
        let shrinkage = REGULARIZATION_SCALE * REGULARIZATION_PRIOR_COUNT
            / (n + REGULARIZATION_PRIOR_COUNT);
        let matrix = match &state.m2 {
            Moments::Diagonal(m2) => {
                InverseMassMatrix::Diagonal(m2.mapv(|m| weight * m / (n - 1.0) + shrinkage))
            }
            Moments::Dense(m2) => {
                let mut cov = m2.mapv(|m| weight * m / (n - 1.0));
                cov.diag_mut().mapv_inplace(|v| v + shrinkage);
                InverseMassMatrix::Dense(cov)
            }
        };
        matrix.validate()?;
        Ok(matrix)
    }
}
