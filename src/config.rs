//! Tuning knobs of a warmup run.

use crate::error::{Result, WarmupError};
use crate::schedule::WindowConfig;
use serde::{Deserialize, Serialize};

/// Configuration of a window adaptation run.
///
/// # Example
///
/// ```rust
/// use window_warmup::config::WarmupConfig;
///
/// let config = WarmupConfig::default()
///     .with_num_steps(500)
///     .dense()
///     .with_target_acceptance(0.9);
/// assert!(config.validate().is_ok());
/// assert!(!config.diagonal_mass_matrix);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WarmupConfig {
    /// Total warmup budget, initialization step included.
    pub num_steps: usize,
    pub diagonal_mass_matrix: bool,
    /// Starting point of the first reasonable step size search.
    pub initial_step_size: f64,
    /// Acceptance probability targeted by dual averaging.
    pub target_acceptance: f64,
    pub windows: WindowConfig,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            num_steps: 1000,
            diagonal_mass_matrix: true,
            initial_step_size: 1.0,
            target_acceptance: 0.8,
            windows: WindowConfig::default(),
        }
    }
}

impl WarmupConfig {
    pub fn with_num_steps(mut self, num_steps: usize) -> Self {
        self.num_steps = num_steps;
        self
    }

    /// Adapt only the variances.
    pub fn diagonal(mut self) -> Self {
        self.diagonal_mass_matrix = true;
        self
    }

    /// Adapt the full covariance.
    pub fn dense(mut self) -> Self {
        self.diagonal_mass_matrix = false;
        self
    }

    pub fn with_initial_step_size(mut self, initial_step_size: f64) -> Self {
        self.initial_step_size = initial_step_size;
        self
    }

    pub fn with_target_acceptance(mut self, target_acceptance: f64) -> Self {
        self.target_acceptance = target_acceptance;
        self
    }

    pub fn with_windows(mut self, windows: WindowConfig) -> Self {
        self.windows = windows;
        self
    }

    /// # Errors
    ///
    /// Returns the first invalid setting found: an empty budget, a non-positive or
    /// non-finite step size, a target acceptance outside `(0, 1)`, or a zero-width
    /// window.
    pub fn validate(&self) -> Result<()> {
        if self.num_steps == 0 {
            return Err(WarmupError::EmptyBudget);
        }
        validate_step_size(self.initial_step_size)?;
        if !(self.target_acceptance > 0.0 && self.target_acceptance < 1.0) {
            return Err(WarmupError::InvalidTargetAcceptance(self.target_acceptance));
        }
        self.windows.validate()
    }
}

pub(crate) fn validate_step_size(step_size: f64) -> Result<()> {
    if step_size.is_finite() && step_size > 0.0 {
        Ok(())
    } else {
        Err(WarmupError::InvalidStepSize(step_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = WarmupConfig::default();
        assert_eq!(config.num_steps, 1000);
        assert!(config.diagonal_mass_matrix);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let base = WarmupConfig::default();
        assert_eq!(
            base.with_num_steps(0).validate(),
            Err(WarmupError::EmptyBudget)
        );
        assert_eq!(
            base.with_initial_step_size(-0.1).validate(),
            Err(WarmupError::InvalidStepSize(-0.1))
        );
        assert!(matches!(
            base.with_initial_step_size(f64::INFINITY).validate(),
            Err(WarmupError::InvalidStepSize(_))
        ));
        assert_eq!(
            base.with_target_acceptance(1.0).validate(),
            Err(WarmupError::InvalidTargetAcceptance(1.0))
        );
        assert!(matches!(
            base.with_target_acceptance(f64::NAN).validate(),
            Err(WarmupError::InvalidTargetAcceptance(_))
        ));
        let windows = WindowConfig {
            final_fast_width: 0,
            ..WindowConfig::default()
        };
        assert!(matches!(
            base.with_windows(windows).validate(),
            Err(WarmupError::InvalidWindows { final_fast: 0, .. })
        ));
    }

    #[test]
    fn test_builder_toggles_metric() {
        let config = WarmupConfig::default().dense();
        assert!(!config.diagonal_mass_matrix);
        assert!(config.diagonal().diagonal_mass_matrix);
    }
}
