//! Tolerances and error policies for consistency checks.
//!
//! A [`Config`] is an explicit value owned by an [`MfaSystem`](crate::MfaSystem)
//! and passed by reference into stock and process computations. Every check
//! kind has its own [`ErrorBehavior`], which decides whether a violation aborts
//! the computation, is logged, or is silently accepted.
//!
//! # Example
//!
//! ```
//! use stockflow::{Config, ErrorBehavior};
//!
//! let mut config = Config::default();
//! config.error_behaviors.mass_balance = ErrorBehavior::Warn;
//! config.absolute_tolerance = Some(1e-6);
//!
//! assert_eq!(config.tolerance(1e9), 1e-6);
//! ```

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{MfaError, MfaResult};

/// What to do when a check fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorBehavior {
    /// Abort with the error
    #[default]
    Error,
    /// Log at warn level and continue
    Warn,
    /// Log at info level and continue
    Info,
    /// Continue silently
    Ignore,
}

impl ErrorBehavior {
    /// Applies the behavior to a failed check.
    ///
    /// Returns the error only for [`ErrorBehavior::Error`].
    pub fn handle(self, error: MfaError) -> MfaResult<()> {
        match self {
            ErrorBehavior::Error => Err(error),
            ErrorBehavior::Warn => {
                warn!(%error, "check failed");
                Ok(())
            }
            ErrorBehavior::Info => {
                info!(%error, "check failed");
                Ok(())
            }
            ErrorBehavior::Ignore => Ok(()),
        }
    }
}

/// Which checks run during computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Checks {
    /// Check the stock mass balance after every stock computation
    pub mass_balance_stocks: bool,
    /// Check the process mass balance after every process computation
    pub mass_balance_processes: bool,
    /// Check that computed flows realise their declared shares
    pub process_shares: bool,
    /// Check flows for negative and NaN values
    pub flows: bool,
}

impl Default for Checks {
    fn default() -> Self {
        Checks {
            mass_balance_stocks: true,
            mass_balance_processes: true,
            process_shares: true,
            flows: true,
        }
    }
}

/// Behavior per check kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorBehaviors {
    /// Stock or process mass balance violated
    pub mass_balance: ErrorBehavior,
    /// Flow with negative or NaN values
    pub check_flows: ErrorBehavior,
    /// Flow not matching its declared share
    pub process_shares: ErrorBehavior,
    /// Process explicitly computed but underdetermined
    pub underdetermined: ErrorBehavior,
    /// Neighbor process left underdetermined during recursive computation
    pub underdetermined_neighbors: ErrorBehavior,
    /// Dimension splitter not summing to one
    pub dimension_splitter_sum: ErrorBehavior,
    /// Dimension splitter configured but not needed
    pub unused_dimension_splitter: ErrorBehavior,
}

impl Default for ErrorBehaviors {
    fn default() -> Self {
        ErrorBehaviors {
            mass_balance: ErrorBehavior::Error,
            check_flows: ErrorBehavior::Warn,
            process_shares: ErrorBehavior::Error,
            underdetermined: ErrorBehavior::Error,
            underdetermined_neighbors: ErrorBehavior::Info,
            dimension_splitter_sum: ErrorBehavior::Error,
            unused_dimension_splitter: ErrorBehavior::Warn,
        }
    }
}

/// Numerical tolerances and error policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub checks: Checks,
    pub error_behaviors: ErrorBehaviors,
    /// Tolerance in multiples of machine epsilon times the largest magnitude involved
    pub relative_tolerance: f64,
    /// Absolute tolerance, overriding `relative_tolerance` when set
    pub absolute_tolerance: Option<f64>,
}

impl Config {
    pub const DEFAULT_RELATIVE_TOLERANCE: f64 = 1e4;

    /// Tolerance for values up to `magnitude` in absolute size.
    pub fn tolerance(&self, magnitude: f64) -> f64 {
        match self.absolute_tolerance {
            Some(absolute) => absolute,
            None => self.relative_tolerance * f64::EPSILON * magnitude,
        }
    }

    /// Validates tolerance settings.
    pub fn validate(&self) -> MfaResult<()> {
        if self.relative_tolerance.is_nan() || self.relative_tolerance < 0.0 {
            return Err(MfaError::Definition(format!(
                "relative_tolerance must be non-negative, got {}",
                self.relative_tolerance
            )));
        }
        if let Some(absolute) = self.absolute_tolerance {
            if absolute.is_nan() || absolute < 0.0 {
                return Err(MfaError::Definition(format!(
                    "absolute_tolerance must be non-negative, got {}",
                    absolute
                )));
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            checks: Checks::default(),
            error_behaviors: ErrorBehaviors::default(),
            relative_tolerance: Self::DEFAULT_RELATIVE_TOLERANCE,
            absolute_tolerance: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_tolerance_scales_with_magnitude() {
        let config = Config::default();
        assert_eq!(config.tolerance(0.0), 0.0);
        assert_eq!(config.tolerance(2.0), 2.0 * config.tolerance(1.0));
    }

    #[test]
    fn test_handle_behaviors() {
        let err = MfaError::UnusedSplitter { process: "p".to_string() };
        assert_eq!(ErrorBehavior::Error.handle(err.clone()), Err(err.clone()));
        assert!(ErrorBehavior::Warn.handle(err.clone()).is_ok());
        assert!(ErrorBehavior::Info.handle(err.clone()).is_ok());
        assert!(ErrorBehavior::Ignore.handle(err).is_ok());
    }

    #[test]
    fn test_deserialize_partial_config() {
        let json = r#"{
            "error_behaviors": { "mass_balance": "warn" },
            "absolute_tolerance": 0.001
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.error_behaviors.mass_balance, ErrorBehavior::Warn);
        assert_eq!(config.error_behaviors.check_flows, ErrorBehavior::Warn);
        assert_eq!(config.error_behaviors.process_shares, ErrorBehavior::Error);
        assert!(config.checks.mass_balance_stocks);
        assert_eq!(config.tolerance(100.0), 0.001);
        assert_eq!(config.relative_tolerance, Config::DEFAULT_RELATIVE_TOLERANCE);
    }

    #[test]
    fn test_negative_tolerance_rejected() {
        let config = Config { absolute_tolerance: Some(-1.0), ..Config::default() };
        assert!(config.validate().is_err());
    }
}
