//! Handling of negative inflows in stock-driven models.
//!
//! When a prescribed stock drops faster than its cohorts decay, the inflow that
//! closes the gap is negative. A [`NegativeInflowCorrection`] decides whether
//! that is accepted or turned into additional outflow.

use std::fmt;

use tracing::debug;

use crate::solvers::cohort::CohortCell;

/// Strategy for a stock that falls below what its existing cohorts still hold.
pub trait NegativeInflowCorrection: fmt::Debug + Send + Sync {
    /// Called with `gap < 0` at time step `step`, before the inflow of that step
    /// is determined. `cohorts` holds all rows up to `step` and the remaining
    /// survival of earlier cohorts beyond it.
    ///
    /// Returns `true` if the gap was absorbed, in which case the inflow at
    /// `step` is zero.
    fn correct(&self, step: usize, gap: f64, cohorts: &mut CohortCell) -> bool;
}

/// Accepts negative inflows as they are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllowNegativeInflow;

impl NegativeInflowCorrection for AllowNegativeInflow {
    fn correct(&self, _step: usize, _gap: f64, _cohorts: &mut CohortCell) -> bool {
        false
    }
}

/// Removes the surplus proportionally from all existing cohorts.
///
/// Each earlier cohort loses the same fraction of what it holds at `step`;
/// the removed amount is added to that cohort's outflow at `step` and its
/// remaining survival is scaled down by the same fraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProportionalOutflowCorrection;

impl NegativeInflowCorrection for ProportionalOutflowCorrection {
    fn correct(&self, step: usize, gap: f64, cohorts: &mut CohortCell) -> bool {
        let held: f64 = (0..step).map(|c| cohorts.stock_by_cohort[(step, c)]).sum();
        if held <= 0.0 {
            return false;
        }
        let fraction = (-gap / held).min(1.0);
        debug!(step, fraction, "removing surplus stock as outflow");
        let n_t = cohorts.n_t();
        for c in 0..step {
            cohorts.outflow_by_cohort[(step, c)] += cohorts.stock_by_cohort[(step, c)] * fraction;
            for t in step..n_t {
                cohorts.stock_by_cohort[(t, c)] *= 1.0 - fraction;
            }
        }
        true
    }
}
