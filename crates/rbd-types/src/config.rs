//! Solver and stepper configuration.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{RbdError, Result};

/// Configuration for the iterative NCP solver.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SolverSettings {
    /// Maximum number of solver iterations.
    pub max_iterations: usize,

    /// Convergence tolerance; iteration stops once the largest impulse
    /// change in a sweep drops below this.
    pub tolerance: f64,

    /// Successive over-relaxation factor.
    /// 1.0 is plain Gauss-Seidel; values above 1 speed up convergence at
    /// the cost of stability, values below 1 damp the iteration.
    pub relaxation: f64,

    /// Seed the solver with the previous step's cached impulses.
    pub warm_starting: bool,

    /// Scaling applied to warm-start values (0-1).
    pub warm_start_factor: f64,

    /// Minimum iterations before the convergence test is consulted.
    pub min_iterations: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iterations: 64,
            tolerance: 1e-7,
            relaxation: 1.0,
            warm_starting: true,
            warm_start_factor: 0.9,
            min_iterations: 3,
        }
    }
}

impl SolverSettings {
    /// High-accuracy configuration for offline simulation.
    #[must_use]
    pub fn high_accuracy() -> Self {
        Self {
            max_iterations: 256,
            tolerance: 1e-10,
            relaxation: 1.0,
            warm_start_factor: 0.95,
            min_iterations: 5,
            ..Default::default()
        }
    }

    /// Fast configuration for interactive use.
    #[must_use]
    pub fn realtime() -> Self {
        Self {
            max_iterations: 16,
            tolerance: 1e-4,
            relaxation: 1.2,
            warm_start_factor: 0.85,
            min_iterations: 2,
            ..Default::default()
        }
    }

    /// Set the maximum iteration count.
    #[must_use]
    pub const fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the relaxation factor.
    #[must_use]
    pub const fn with_relaxation(mut self, relaxation: f64) -> Self {
        self.relaxation = relaxation;
        self
    }

    /// Enable or disable warm starting.
    #[must_use]
    pub const fn with_warm_starting(mut self, enabled: bool) -> Self {
        self.warm_starting = enabled;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(RbdError::invalid_argument(
                "max_iterations must be at least 1",
            ));
        }
        if self.relaxation <= 0.0 || self.relaxation >= 2.0 {
            return Err(RbdError::invalid_argument(
                "relaxation must be in range (0, 2)",
            ));
        }
        if !(0.0..=1.0).contains(&self.warm_start_factor) {
            return Err(RbdError::invalid_argument(
                "warm_start_factor must be in range [0, 1]",
            ));
        }
        if self.tolerance <= 0.0 {
            return Err(RbdError::invalid_argument("tolerance must be positive"));
        }
        Ok(())
    }
}

/// Configuration for the steppers and the sequential resolver.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StepSettings {
    /// Add the Baumgarte stabilization term to the constraint right-hand
    /// side during dynamics steps.
    pub stabilization: bool,

    /// Assemble friction rows for contacts.
    pub friction: bool,

    /// Add restitution terms to the constraint right-hand side.
    pub bounce: bool,

    /// Scale the stabilization term by each material's error-reduction
    /// parameter instead of applying the full positional error.
    pub erp: bool,

    /// Relative normal velocities above `-resolver_epsilon` are treated as
    /// resting by the sequential resolver.
    pub resolver_epsilon: f64,

    /// Upper bound on impulses applied in one sequential-resolver call.
    pub resolver_max_impulses: usize,

    /// Linear speed below which a body is flagged sleepy.
    pub sleep_threshold: f64,
}

impl Default for StepSettings {
    fn default() -> Self {
        Self {
            stabilization: true,
            friction: true,
            bounce: true,
            erp: true,
            resolver_epsilon: 1e-6,
            resolver_max_impulses: 1024,
            sleep_threshold: 0.01,
        }
    }
}

impl StepSettings {
    /// Disable stabilization.
    #[must_use]
    pub const fn without_stabilization(mut self) -> Self {
        self.stabilization = false;
        self
    }

    /// Disable friction row assembly.
    #[must_use]
    pub const fn without_friction(mut self) -> Self {
        self.friction = false;
        self
    }

    /// Disable restitution terms.
    #[must_use]
    pub const fn without_bounce(mut self) -> Self {
        self.bounce = false;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.resolver_epsilon < 0.0 {
            return Err(RbdError::invalid_argument(
                "resolver_epsilon cannot be negative",
            ));
        }
        if self.resolver_max_impulses == 0 {
            return Err(RbdError::invalid_argument(
                "resolver_max_impulses must be at least 1",
            ));
        }
        if self.sleep_threshold < 0.0 {
            return Err(RbdError::invalid_argument(
                "sleep_threshold cannot be negative",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_solver_settings_presets() {
        assert!(SolverSettings::default().validate().is_ok());
        assert!(SolverSettings::high_accuracy().validate().is_ok());
        assert!(SolverSettings::realtime().validate().is_ok());
    }

    #[test]
    fn test_solver_settings_validation() {
        let mut settings = SolverSettings::default();
        settings.max_iterations = 0;
        assert!(settings.validate().is_err());

        settings = SolverSettings::default().with_relaxation(2.5);
        assert!(settings.validate().is_err());

        settings = SolverSettings::default();
        settings.tolerance = 0.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_step_settings_builders() {
        let settings = StepSettings::default()
            .without_friction()
            .without_bounce();
        assert!(!settings.friction);
        assert!(!settings.bounce);
        assert!(settings.stabilization);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_step_settings_validation() {
        let mut settings = StepSettings::default();
        settings.resolver_max_impulses = 0;
        assert!(settings.validate().is_err());

        settings = StepSettings::default();
        settings.resolver_epsilon = -1.0;
        assert!(settings.validate().is_err());
    }
}
