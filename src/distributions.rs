/*!
Gaussian targets with analytic gradients.

These are the reference densities used to exercise the warmup: their covariance is
known, so the adapted inverse mass matrix can be compared against it.
*/

use crate::error::Result;
use crate::hmc::HamiltonianTarget;
use crate::mass_matrix::spd_inverse;
use ndarray::{Array1, Array2};

/// A Gaussian with independent coordinates sharing one standard deviation.
///
/// # Example
///
/// ```rust
/// use ndarray::arr1;
/// use window_warmup::distributions::IsotropicGaussian;
/// use window_warmup::hmc::HamiltonianTarget;
///
/// let target = IsotropicGaussian::new(arr1(&[0.0, 0.0]), 2.0);
/// let mut grad = arr1(&[0.0, 0.0]);
/// let logp = target.logp_and_grad(&arr1(&[2.0, 0.0]), &mut grad);
/// assert_eq!(logp, -0.5);
/// assert_eq!(grad, arr1(&[-0.5, 0.0]));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct IsotropicGaussian {
    pub mean: Array1<f64>,
    pub std: f64,
}

impl IsotropicGaussian {
    pub fn new(mean: Array1<f64>, std: f64) -> Self {
        Self { mean, std }
    }
}

impl HamiltonianTarget for IsotropicGaussian {
    fn logp_and_grad(&self, position: &Array1<f64>, grad: &mut Array1<f64>) -> f64 {
        let precision = 1.0 / (self.std * self.std);
        let diff = position - &self.mean;
        grad.assign(&(&diff * -precision));
        -0.5 * precision * diff.dot(&diff)
    }
}

/// A Gaussian with independent coordinates and per-coordinate scales.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagonalGaussian {
    pub mean: Array1<f64>,
    pub std: Array1<f64>,
}

impl DiagonalGaussian {
    pub fn new(mean: Array1<f64>, std: Array1<f64>) -> Self {
        assert_eq!(mean.len(), std.len(), "mean and std must have equal length");
        Self { mean, std }
    }
}

impl HamiltonianTarget for DiagonalGaussian {
    fn logp_and_grad(&self, position: &Array1<f64>, grad: &mut Array1<f64>) -> f64 {
        let z = (position - &self.mean) / &self.std;
        grad.assign(&(-&z / &self.std));
        -0.5 * z.dot(&z)
    }
}

/// A multivariate Gaussian with full covariance.
///
/// The precision matrix is computed once at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Gaussian {
    pub mean: Array1<f64>,
    pub cov: Array2<f64>,
    precision: Array2<f64>,
}

impl Gaussian {
    /// Fails if `cov` is not symmetric positive definite.
    pub fn new(mean: Array1<f64>, cov: Array2<f64>) -> Result<Self> {
        let precision = spd_inverse(&cov)?;
        Ok(Self {
            mean,
            cov,
            precision,
        })
    }

    pub fn precision(&self) -> &Array2<f64> {
        &self.precision
    }
}

impl HamiltonianTarget for Gaussian {
    fn logp_and_grad(&self, position: &Array1<f64>, grad: &mut Array1<f64>) -> f64 {
        let diff = position - &self.mean;
        let scaled = self.precision.dot(&diff);
        let logp = -0.5 * diff.dot(&scaled);
        grad.assign(&(-scaled));
        logp
    }
}
