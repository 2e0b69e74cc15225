//! Cohort accounting behind the dynamic stock models.
//!
//! Every non-time cell of a stock is handled independently: its survival and
//! outflow-probability tables are `n_t x n_t` lower-triangular matrices and
//! its inflow and stock are time series. Amounts here are per interval, not
//! annual rates.
//!
//! # Inflow-driven (forward convolution)
//!
//! ```text
//! stock_by_cohort[t, c]   = inflow[c] * sf[t, c]
//! outflow_by_cohort[t, c] = inflow[c] * pdf[t, c]
//! ```
//!
//! # Stock-driven (forward substitution)
//!
//! Row by row, the outflow of earlier cohorts is their decay since the previous
//! step and the new inflow closes the gap to the prescribed stock:
//!
//! ```text
//! inflow[m] = (stock[m] - sum_{c<m} stock_by_cohort[m, c]) / sf[m, m]
//! ```

use nalgebra::{DMatrix, DVector};
use ndarray::{ArrayD, IxDyn};

use crate::models::NegativeInflowCorrection;
use crate::{MfaError, MfaResult};

/// Stock and outflow of one non-time cell, by time step (rows) and cohort (columns).
#[derive(Debug, Clone, PartialEq)]
pub struct CohortCell {
    pub stock_by_cohort: DMatrix<f64>,
    pub outflow_by_cohort: DMatrix<f64>,
}

impl CohortCell {
    pub fn zeros(n_t: usize) -> Self {
        CohortCell {
            stock_by_cohort: DMatrix::zeros(n_t, n_t),
            outflow_by_cohort: DMatrix::zeros(n_t, n_t),
        }
    }

    /// Number of time steps.
    pub fn n_t(&self) -> usize {
        self.stock_by_cohort.nrows()
    }

    /// Total stock per time step.
    pub fn stock(&self) -> DVector<f64> {
        row_sums(&self.stock_by_cohort)
    }

    /// Total outflow per time step.
    pub fn outflow(&self) -> DVector<f64> {
        row_sums(&self.outflow_by_cohort)
    }
}

fn row_sums(m: &DMatrix<f64>) -> DVector<f64> {
    DVector::from_iterator(m.nrows(), m.row_iter().map(|row| row.sum()))
}

/// Result of the stock-driven solve for one cell.
#[derive(Debug, Clone, PartialEq)]
pub struct StockDrivenCell {
    pub cohorts: CohortCell,
    pub inflow: DVector<f64>,
    /// Steps whose inflow was zeroed because nothing survives its own step
    pub zero_survival_steps: Vec<usize>,
    /// Steps where a negative inflow was turned into extra outflow
    pub corrected_steps: Vec<usize>,
}

/// Synthetic historical inflow reproducing a stock-by-cohort snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Seed {
    /// Time step of the snapshot
    pub step: usize,
    /// Inflow per cohort; zero after `step`
    pub inflow: DVector<f64>,
    /// Cohorts with stock in the snapshot but no survival up to it
    pub unreachable_cohorts: Vec<usize>,
}

/// Back-solves cohort inflows from the stock each cohort still holds at `step`.
pub fn seed_from_snapshot(sf: &DMatrix<f64>, step: usize, by_cohort: &DVector<f64>) -> Seed {
    let mut inflow = DVector::zeros(sf.nrows());
    let mut unreachable_cohorts = Vec::new();
    for c in 0..=step {
        let survival = sf[(step, c)];
        if survival > 0.0 {
            inflow[c] = by_cohort[c] / survival;
        } else if by_cohort[c] != 0.0 {
            unreachable_cohorts.push(c);
        }
    }
    Seed { step, inflow, unreachable_cohorts }
}

/// Forward convolution of inflow with the survival and outflow tables.
pub fn inflow_driven(sf: &DMatrix<f64>, pdf: &DMatrix<f64>, inflow: &DVector<f64>) -> CohortCell {
    let mut stock_by_cohort = sf.clone();
    let mut outflow_by_cohort = pdf.clone();
    for (c, value) in inflow.iter().enumerate() {
        stock_by_cohort.column_mut(c).scale_mut(*value);
        outflow_by_cohort.column_mut(c).scale_mut(*value);
    }
    CohortCell { stock_by_cohort, outflow_by_cohort }
}

/// Forward substitution of `sf . inflow = stock`, optionally continuing from a seed.
///
/// With a seed, cohorts up to the seed step come from the seed and the stock
/// is only matched after it.
pub fn stock_driven(
    sf: &DMatrix<f64>,
    pdf: &DMatrix<f64>,
    stock: &DVector<f64>,
    seed: Option<&Seed>,
    correction: &dyn NegativeInflowCorrection,
) -> StockDrivenCell {
    let n_t = sf.nrows();
    let mut cohorts = CohortCell::zeros(n_t);
    let mut inflow = DVector::zeros(n_t);
    let mut zero_survival_steps = Vec::new();
    let mut corrected_steps = Vec::new();

    let start = match seed {
        Some(seed) => {
            let seeded = inflow_driven(sf, pdf, &seed.inflow);
            for c in 0..=seed.step {
                inflow[c] = seed.inflow[c];
                for t in c..n_t {
                    cohorts.stock_by_cohort[(t, c)] = seeded.stock_by_cohort[(t, c)];
                }
                for t in c..=seed.step {
                    cohorts.outflow_by_cohort[(t, c)] = seeded.outflow_by_cohort[(t, c)];
                }
            }
            seed.step + 1
        }
        None => 0,
    };

    for m in start..n_t {
        if m > 0 {
            for c in 0..m {
                cohorts.outflow_by_cohort[(m, c)] =
                    cohorts.stock_by_cohort[(m - 1, c)] - cohorts.stock_by_cohort[(m, c)];
            }
        }
        let held: f64 = (0..m).map(|c| cohorts.stock_by_cohort[(m, c)]).sum();
        let gap = stock[m] - held;

        if gap < 0.0 && correction.correct(m, gap, &mut cohorts) {
            corrected_steps.push(m);
            continue;
        }
        let survival = sf[(m, m)];
        if survival == 0.0 {
            zero_survival_steps.push(m);
            continue;
        }
        inflow[m] = gap / survival;
        for t in m..n_t {
            cohorts.stock_by_cohort[(t, m)] = inflow[m] * sf[(t, m)];
        }
        cohorts.outflow_by_cohort[(m, m)] = inflow[m] * (1.0 - survival);
    }

    StockDrivenCell { cohorts, inflow, zero_survival_steps, corrected_steps }
}

/// Splits a buffer with time on axis 0 into one time series per non-time cell.
pub fn split_cells(values: &ArrayD<f64>) -> Vec<DVector<f64>> {
    let shape = values.shape();
    let n_t = shape.first().copied().unwrap_or(1);
    let n_cells: usize = shape.iter().skip(1).product();
    let flat: Vec<f64> = values.iter().copied().collect();
    (0..n_cells)
        .map(|cell| DVector::from_iterator(n_t, (0..n_t).map(|t| flat[t * n_cells + cell])))
        .collect()
}

/// Inverse of [`split_cells`].
pub fn join_cells(cells: &[DVector<f64>], shape: &[usize]) -> MfaResult<ArrayD<f64>> {
    let n_cells = cells.len();
    let n_t = shape.first().copied().unwrap_or(1);
    let mut flat = vec![0.0; n_t * n_cells];
    for (cell, series) in cells.iter().enumerate() {
        for (t, v) in series.iter().enumerate() {
            flat[t * n_cells + cell] = *v;
        }
    }
    to_array(shape, flat)
}

/// Joins per-cell `(t, c)` matrices into a buffer of shape `(n_t, n_t, *non_time_shape)`.
pub fn join_cohort_cells(
    cells: &[DMatrix<f64>],
    non_time_shape: &[usize],
) -> MfaResult<ArrayD<f64>> {
    let n_cells = cells.len();
    let n_t = cells.first().map(|m| m.nrows()).unwrap_or(0);
    let mut shape = vec![n_t, n_t];
    shape.extend_from_slice(non_time_shape);
    let mut flat = vec![0.0; n_t * n_t * n_cells];
    for (cell, m) in cells.iter().enumerate() {
        for t in 0..n_t {
            for c in 0..=t {
                flat[(t * n_t + c) * n_cells + cell] = m[(t, c)];
            }
        }
    }
    to_array(&shape, flat)
}

fn to_array(shape: &[usize], flat: Vec<f64>) -> MfaResult<ArrayD<f64>> {
    let got = vec![flat.len()];
    ArrayD::from_shape_vec(IxDyn(shape), flat)
        .map_err(|_| MfaError::ShapeMismatch { expected: shape.to_vec(), got })
}
