//! Cohort-based stock computations, cell by cell.

use std::collections::BTreeSet;

use nalgebra::{DMatrix, DVector};
use ndarray::{ArrayD, Axis};
use tracing::warn;

use super::DynamicModel;
use crate::array::DimArray;
use crate::dimensions::DimensionSet;
use crate::lifetime::{pdf_from_sf, TimeAxis};
use crate::solvers::cohort::{self, CohortCell, Seed};
use crate::{MfaError, MfaResult};

/// Arrays derived by a cohort-based computation, in the stock's axis order.
#[derive(Debug)]
pub(super) struct DynamicSolution {
    pub stock: ArrayD<f64>,
    pub inflow: ArrayD<f64>,
    pub outflow: ArrayD<f64>,
    pub stock_by_cohort: ArrayD<f64>,
    pub outflow_by_cohort: ArrayD<f64>,
    pub zero_survival_steps: Vec<usize>,
    pub corrected_steps: Vec<usize>,
    /// Annual inflow made up from the initial stock, inflow-driven kinds only
    pub seeded_inflow: Option<ArrayD<f64>>,
}

struct Tables {
    sf: Vec<DMatrix<f64>>,
    pdf: Vec<DMatrix<f64>>,
}

fn tables(model: &DynamicModel) -> MfaResult<Tables> {
    let sf = model.lifetime.survival_matrices()?;
    let pdf = sf.iter().map(pdf_from_sf).collect();
    Ok(Tables { sf, pdf })
}

pub(super) fn inflow_driven(
    name: &str,
    model: &DynamicModel,
    dims: &DimensionSet,
    time: &TimeAxis,
    inflow: &DimArray,
) -> MfaResult<DynamicSolution> {
    let tables = tables(model)?;
    let mut inflows = cohort::split_cells(&time.to_whole_period(inflow.values()));

    let mut seeded = None;
    if let Some(seeds) = seeds(name, model, dims, &tables.sf)? {
        let step = seeds.first().map(|s| s.step).unwrap_or_default();
        check_free_until(name, "inflow", inflow.values(), step)?;
        for (series, seed) in inflows.iter_mut().zip(&seeds) {
            for c in 0..=seed.step {
                series[c] = seed.inflow[c];
            }
        }
        let seed_inflows: Vec<DVector<f64>> = seeds.into_iter().map(|s| s.inflow).collect();
        seeded = Some(time.to_annual(&cohort::join_cells(&seed_inflows, &dims.shape())?));
    }

    let cells: Vec<CohortCell> = inflows
        .iter()
        .zip(tables.sf.iter().zip(&tables.pdf))
        .map(|(series, (sf, pdf))| cohort::inflow_driven(sf, pdf, series))
        .collect();
    let mut solution = assemble(dims, time, cells, inflows, BTreeSet::new(), BTreeSet::new())?;
    solution.seeded_inflow = seeded;
    Ok(solution)
}

pub(super) fn stock_driven(
    name: &str,
    model: &DynamicModel,
    dims: &DimensionSet,
    time: &TimeAxis,
    stock: &DimArray,
) -> MfaResult<DynamicSolution> {
    let tables = tables(model)?;
    let levels = cohort::split_cells(stock.values());

    let seeds = seeds(name, model, dims, &tables.sf)?;
    if let Some(step) = seeds.as_ref().and_then(|s| s.first()).map(|s| s.step) {
        check_free_until(name, "stock", stock.values(), step)?;
    }

    let mut cells = Vec::with_capacity(levels.len());
    let mut inflows = Vec::with_capacity(levels.len());
    let mut zero_survival = BTreeSet::new();
    let mut corrected = BTreeSet::new();
    for (j, level) in levels.iter().enumerate() {
        let seed = seeds.as_ref().map(|s| &s[j]);
        let correction = model.correction.as_ref();
        let solved = cohort::stock_driven(&tables.sf[j], &tables.pdf[j], level, seed, correction);
        zero_survival.extend(solved.zero_survival_steps);
        corrected.extend(solved.corrected_steps);
        cells.push(solved.cohorts);
        inflows.push(solved.inflow);
    }
    assemble(dims, time, cells, inflows, zero_survival, corrected)
}

/// Per-cell seeds from the initial stock, if the model has one.
fn seeds(
    name: &str,
    model: &DynamicModel,
    dims: &DimensionSet,
    sf: &[DMatrix<f64>],
) -> MfaResult<Option<Vec<Seed>>> {
    let Some(initial) = &model.initial_stock else {
        return Ok(None);
    };
    let time_dim = dims
        .dims()
        .first()
        .ok_or_else(|| MfaError::Definition(format!("stock '{}' has no time dimension", name)))?;
    let step = time_dim.position(&initial.year).ok_or_else(|| MfaError::ItemNotFound {
        item: initial.year.to_string(),
        context: format!("time dimension of stock '{}'", name),
    })?;
    if !initial.by_cohort.dims().same_dims_as(dims) {
        return Err(MfaError::DimensionMismatch(format!(
            "initial stock of '{}' has dims {}, expected {}",
            name,
            initial.by_cohort.dims().describe(),
            dims.describe()
        )));
    }
    let by_cohort = initial.by_cohort.cast_values(dims)?;
    let late = by_cohort.slice_axis(Axis(0), ndarray::Slice::from((step + 1)..));
    if late.iter().any(|v| *v != 0.0) {
        return Err(MfaError::InvalidParameter(format!(
            "initial stock of '{}' has cohorts after the seeding year {}",
            name, initial.year
        )));
    }

    let seeds: Vec<Seed> = cohort::split_cells(&by_cohort)
        .iter()
        .zip(sf)
        .map(|(snapshot, sf)| cohort::seed_from_snapshot(sf, step, snapshot))
        .collect();
    let unreachable: BTreeSet<usize> =
        seeds.iter().flat_map(|s| s.unreachable_cohorts.iter().copied()).collect();
    if !unreachable.is_empty() {
        warn!(
            stock = %name,
            cohorts = ?unreachable,
            "initial stock held by cohorts with zero survival, left out of the seed"
        );
    }
    Ok(Some(seeds))
}

/// Prescribed values up to and including the seeding step must be zero.
fn check_free_until(name: &str, what: &str, values: &ArrayD<f64>, step: usize) -> MfaResult<()> {
    let early = values.slice_axis(Axis(0), ndarray::Slice::from(..=step));
    if early.iter().any(|v| *v != 0.0) {
        return Err(MfaError::InvalidParameter(format!(
            "{} of stock '{}' is prescribed at or before the seeding step {}, \
             where it comes from the initial stock",
            what, name, step
        )));
    }
    Ok(())
}

fn assemble(
    dims: &DimensionSet,
    time: &TimeAxis,
    cells: Vec<CohortCell>,
    inflows: Vec<DVector<f64>>,
    zero_survival: BTreeSet<usize>,
    corrected: BTreeSet<usize>,
) -> MfaResult<DynamicSolution> {
    let shape = dims.shape();
    let non_time = &shape[1..];
    let stock: Vec<DVector<f64>> = cells.iter().map(CohortCell::stock).collect();
    let outflow: Vec<DVector<f64>> = cells.iter().map(CohortCell::outflow).collect();
    let (sbc, obc): (Vec<_>, Vec<_>) =
        cells.into_iter().map(|c| (c.stock_by_cohort, c.outflow_by_cohort)).unzip();
    Ok(DynamicSolution {
        stock: cohort::join_cells(&stock, &shape)?,
        inflow: time.to_annual(&cohort::join_cells(&inflows, &shape)?),
        outflow: time.to_annual(&cohort::join_cells(&outflow, &shape)?),
        stock_by_cohort: cohort::join_cohort_cells(&sbc, non_time)?,
        outflow_by_cohort: cohort::join_cohort_cells(&obc, non_time)?,
        zero_survival_steps: zero_survival.into_iter().collect(),
        corrected_steps: corrected.into_iter().collect(),
        seeded_inflow: None,
    })
}

#[cfg(test)]
mod tests {
    use super::super::{InitialStock, Stock, StockKind};
    use super::*;
    use crate::config::Config;
    use crate::dimensions::Dimension;
    use crate::lifetime::{LifetimeKind, LifetimeModel};
    use approx::assert_relative_eq;

    fn dims() -> DimensionSet {
        DimensionSet::new(vec![Dimension::new("time", 't', 2000..=2005).unwrap()]).unwrap()
    }

    fn fixed(years: f64) -> LifetimeModel {
        LifetimeModel::new(LifetimeKind::Fixed, dims(), 't')
            .unwrap()
            .with_parameter("mean", &DimArray::scalar(years))
            .unwrap()
    }

    fn snapshot() -> DimArray {
        DimArray::from_vec(dims(), vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0]).unwrap()
    }

    fn seeded(lifetime: LifetimeModel, year: i32) -> DynamicModel {
        DynamicModel::new(lifetime).with_initial_stock(InitialStock::new(year, snapshot()))
    }

    #[test]
    fn test_inflow_by_cohort_seeded_from_snapshot() {
        let model = seeded(fixed(4.0), 2002);
        let mut stock = Stock::new("s", dims(), StockKind::InflowByCohortDriven(model)).unwrap();
        let mut future = DimArray::zeros(dims());
        future.values_mut()[[4].as_slice()] = 5.0;
        stock.inflow.set_from(&future).unwrap();
        stock.compute(&Config::default()).unwrap();

        assert_eq!(stock.inflow.to_vec(), vec![1.0, 2.0, 3.0, 0.0, 5.0, 0.0]);
        // snapshot reproduced at the seeding year
        assert_relative_eq!(stock.stock.value(&[2]).unwrap(), 6.0);
        // the 2000 cohort leaves after four years
        assert_relative_eq!(stock.stock.value(&[4]).unwrap(), 2.0 + 3.0 + 5.0);
    }

    #[test]
    fn test_seeded_compute_is_idempotent() {
        let model = seeded(fixed(4.0), 2002);
        let mut stock = Stock::new("s", dims(), StockKind::InflowByCohortDriven(model)).unwrap();
        stock.inflow.set_from(&DimArray::zeros(dims())).unwrap();
        stock.compute(&Config::default()).unwrap();
        let levels = stock.stock.to_vec();

        stock.compute(&Config::default()).unwrap();
        assert_eq!(stock.stock.to_vec(), levels);
        assert_eq!(stock.inflow.to_vec(), vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0]);
        assert_eq!(stock.process_inflow().unwrap().to_vec(), vec![0.0; 6]);
    }

    #[test]
    fn test_inflow_by_cohort_requires_initial_stock() {
        let model = DynamicModel::new(fixed(4.0));
        let mut stock = Stock::new("s", dims(), StockKind::InflowByCohortDriven(model)).unwrap();
        assert!(matches!(stock.compute(&Config::default()), Err(MfaError::ParameterNotSet(_))));
    }

    #[test]
    fn test_prescribed_inflow_before_seed_rejected() {
        let model = seeded(fixed(4.0), 2002);
        let mut stock = Stock::new("s", dims(), StockKind::InflowDriven(model)).unwrap();
        stock.inflow.set_from(&DimArray::full(dims(), 1.0)).unwrap();
        assert!(matches!(stock.compute(&Config::default()), Err(MfaError::InvalidParameter(_))));
    }

    #[test]
    fn test_late_cohorts_in_snapshot_rejected() {
        let model = seeded(fixed(4.0), 2001);
        let mut stock = Stock::new("s", dims(), StockKind::InflowByCohortDriven(model)).unwrap();
        assert!(matches!(stock.compute(&Config::default()), Err(MfaError::InvalidParameter(_))));
    }

    #[test]
    fn test_unknown_seeding_year() {
        let model = seeded(fixed(4.0), 1990);
        let mut stock = Stock::new("s", dims(), StockKind::InflowByCohortDriven(model)).unwrap();
        assert!(matches!(stock.compute(&Config::default()), Err(MfaError::ItemNotFound { .. })));
    }

    #[test]
    fn test_seeded_stock_driven() {
        let model = seeded(fixed(10.0), 2002);
        let mut stock = Stock::new("s", dims(), StockKind::StockDriven(model)).unwrap();
        let mut prescribed = DimArray::zeros(dims());
        for (t, level) in [(3, 8.0), (4, 8.0), (5, 10.0)] {
            prescribed.values_mut()[[t].as_slice()] = level;
        }
        stock.stock.set_from(&prescribed).unwrap();
        stock.compute(&Config::default()).unwrap();

        assert_eq!(stock.inflow.to_vec(), vec![1.0, 2.0, 3.0, 2.0, 0.0, 2.0]);
        assert_eq!(stock.stock.to_vec(), vec![1.0, 3.0, 6.0, 8.0, 8.0, 10.0]);
        assert!(stock.balance().unwrap().max_abs() < 1e-12);
    }
}
