//! # Stock Models
//!
//! A [`Stock`] holds three arrays over one dimension set whose first dimension
//! is time: the stock level, and the annual inflow and outflow rates. After
//! [`Stock::compute`] they satisfy the mass balance
//!
//! ```text
//! stock[t] - stock[t-1] = (inflow[t] - outflow[t]) * interval_length[t]
//! ```
//!
//! with `stock[-1] = 0`. How the missing arrays are derived depends on the
//! [`StockKind`]:
//!
//! - **Flow-driven**: stock accumulated from inflow and outflow
//! - **Inflow-driven**: cohort convolution of the inflow with a survival table
//! - **Stock-driven**: inflow solved from the prescribed stock
//! - **Flexible**: stock-driven if the stock is set, otherwise inflow-driven
//! - **Inflow-by-cohort-driven**: inflow-driven, seeded from a stock-by-cohort
//!   snapshot
//!
//! ## Example
//!
//! ```
//! use stockflow::{Config, DimArray, Dimension, DimensionSet, Stock, StockKind};
//!
//! let dims = DimensionSet::new(vec![Dimension::new("time", 't', 2000..=2010)?])?;
//! let mut stock = Stock::new("buildings", dims.clone(), StockKind::FlowDriven)?;
//! stock.inflow.set_from(&DimArray::full(dims.clone(), 0.1))?;
//! stock.outflow.set_from(&DimArray::full(dims, 0.01))?;
//! stock.compute(&Config::default())?;
//!
//! let last = stock.stock.value(&[10]).unwrap_or_default();
//! assert!((last - 0.99).abs() < 1e-12);
//! # Ok::<(), stockflow::MfaError>(())
//! ```

pub mod correction;
mod dynamic;

use std::fmt;
use std::sync::Arc;

use ndarray::{ArrayD, Axis};
use tracing::{debug, warn};

pub use correction::{AllowNegativeInflow, NegativeInflowCorrection, ProportionalOutflowCorrection};

use crate::array::{DimArray, StockArray};
use crate::config::Config;
use crate::dimensions::{Dimension, DimensionSet, Item};
use crate::lifetime::{LifetimeModel, TimeAxis};
use crate::system::ProcessId;
use crate::{MfaError, MfaResult};

/// Stock by cohort at a seeding year.
///
/// `by_cohort` has the dimensions of the stock, the time axis read as cohort.
/// Cohorts after `year` must be zero.
#[derive(Debug, Clone, PartialEq)]
pub struct InitialStock {
    pub year: Item,
    pub by_cohort: DimArray,
}

impl InitialStock {
    pub fn new<T: Into<Item>>(year: T, by_cohort: DimArray) -> Self {
        InitialStock { year: year.into(), by_cohort }
    }
}

/// Lifetime model and options shared by the cohort-based stock kinds.
#[derive(Debug, Clone)]
pub struct DynamicModel {
    pub lifetime: LifetimeModel,
    pub correction: Arc<dyn NegativeInflowCorrection>,
    pub initial_stock: Option<InitialStock>,
}

impl DynamicModel {
    /// Model that accepts negative inflows and has no initial stock.
    pub fn new(lifetime: LifetimeModel) -> Self {
        DynamicModel { lifetime, correction: Arc::new(AllowNegativeInflow), initial_stock: None }
    }

    pub fn with_correction<C: NegativeInflowCorrection + 'static>(mut self, correction: C) -> Self {
        self.correction = Arc::new(correction);
        self
    }

    pub fn with_initial_stock(mut self, initial_stock: InitialStock) -> Self {
        self.initial_stock = Some(initial_stock);
        self
    }
}

/// How a stock derives its missing arrays.
#[derive(Debug, Clone)]
pub enum StockKind {
    FlowDriven,
    InflowDriven(DynamicModel),
    StockDriven(DynamicModel),
    Flexible(DynamicModel),
    InflowByCohortDriven(DynamicModel),
}

impl StockKind {
    pub fn name(&self) -> &'static str {
        match self {
            StockKind::FlowDriven => "flow_driven",
            StockKind::InflowDriven(_) => "inflow_driven",
            StockKind::StockDriven(_) => "stock_driven",
            StockKind::Flexible(_) => "flexible",
            StockKind::InflowByCohortDriven(_) => "inflow_by_cohort_driven",
        }
    }

    /// The lifetime model, for every kind except flow-driven.
    pub fn dynamic_model(&self) -> Option<&DynamicModel> {
        match self {
            StockKind::FlowDriven => None,
            StockKind::InflowDriven(m)
            | StockKind::StockDriven(m)
            | StockKind::Flexible(m)
            | StockKind::InflowByCohortDriven(m) => Some(m),
        }
    }

    pub fn dynamic_model_mut(&mut self) -> Option<&mut DynamicModel> {
        match self {
            StockKind::FlowDriven => None,
            StockKind::InflowDriven(m)
            | StockKind::StockDriven(m)
            | StockKind::Flexible(m)
            | StockKind::InflowByCohortDriven(m) => Some(m),
        }
    }
}

impl fmt::Display for StockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A stock with its inflow and outflow.
///
/// The arrays are public so that they can be assigned with
/// [`DimArray::set_from`] and friends; their dimensions must stay those of
/// the stock.
#[derive(Debug, Clone)]
pub struct Stock {
    name: String,
    dims: DimensionSet,
    time: TimeAxis,
    kind: StockKind,
    process: Option<ProcessId>,
    pub stock: StockArray,
    pub inflow: StockArray,
    pub outflow: StockArray,
    stock_by_cohort: Option<ArrayD<f64>>,
    outflow_by_cohort: Option<ArrayD<f64>>,
    zero_survival_steps: Vec<usize>,
    corrected_steps: Vec<usize>,
    seeded_inflow: Option<ArrayD<f64>>,
    computed: bool,
}

impl Stock {
    /// Creates an uncomputed stock with unset arrays.
    ///
    /// The first dimension is the time axis.
    ///
    /// # Errors
    ///
    /// - [`MfaError::Definition`] if the first dimension is not a valid time axis
    /// - [`MfaError::DimensionMismatch`] if a lifetime model has other dimensions
    pub fn new(name: &str, dims: DimensionSet, kind: StockKind) -> MfaResult<Self> {
        let first = dims.dims().first().ok_or_else(|| {
            MfaError::Definition(format!("stock '{}' needs at least a time dimension", name))
        })?;
        let time = TimeAxis::from_dimension(first)?;
        if let Some(model) = kind.dynamic_model() {
            if model.lifetime.dims() != &dims {
                return Err(MfaError::DimensionMismatch(format!(
                    "lifetime model of stock '{}' has dims {}, stock has {}",
                    name,
                    model.lifetime.dims().describe(),
                    dims.describe()
                )));
            }
        }
        let array = |suffix: &str| {
            DimArray::zeros(dims.clone()).with_name(&format!("{}_{}", name, suffix))
        };
        Ok(Stock {
            name: name.to_string(),
            time,
            kind,
            process: None,
            stock: array("stock"),
            inflow: array("inflow"),
            outflow: array("outflow"),
            dims,
            stock_by_cohort: None,
            outflow_by_cohort: None,
            zero_survival_steps: Vec::new(),
            corrected_steps: Vec::new(),
            seeded_inflow: None,
            computed: false,
        })
    }

    pub fn with_process(mut self, process: ProcessId) -> Self {
        self.process = Some(process);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dims(&self) -> &DimensionSet {
        &self.dims
    }

    pub fn kind(&self) -> &StockKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut StockKind {
        &mut self.kind
    }

    pub fn time_axis(&self) -> &TimeAxis {
        &self.time
    }

    pub fn process_id(&self) -> Option<ProcessId> {
        self.process
    }

    pub fn set_process(&mut self, process: ProcessId) {
        self.process = Some(process);
    }

    pub fn is_computed(&self) -> bool {
        self.computed
    }

    /// Stock by time step and cohort, shape `(n_t, n_t, *non_time_shape)`.
    ///
    /// Only available after computing a cohort-based kind.
    pub fn stock_by_cohort(&self) -> Option<&ArrayD<f64>> {
        self.stock_by_cohort.as_ref()
    }

    /// Outflow amount per interval by time step and cohort.
    pub fn outflow_by_cohort(&self) -> Option<&ArrayD<f64>> {
        self.outflow_by_cohort.as_ref()
    }

    /// Time steps whose inflow was zeroed because nothing survives its own step.
    pub fn zero_survival_steps(&self) -> &[usize] {
        &self.zero_survival_steps
    }

    /// Time steps where a negative inflow was corrected into outflow.
    pub fn corrected_steps(&self) -> &[usize] {
        &self.corrected_steps
    }

    /// Derives the missing arrays, marks all three as set and, if enabled,
    /// checks the mass balance.
    ///
    /// A computed stock is left as it is.
    pub fn compute(&mut self, config: &Config) -> MfaResult<()> {
        if self.computed {
            return Ok(());
        }
        for array in [&self.stock, &self.inflow, &self.outflow] {
            if array.dims() != &self.dims {
                return Err(MfaError::DimensionMismatch(format!(
                    "array {} of stock '{}' has dims {}, expected {}",
                    array.label(),
                    self.name,
                    array.dims().describe(),
                    self.dims.describe()
                )));
            }
        }

        let solved = match &self.kind {
            StockKind::FlowDriven => {
                self.require_set(&self.inflow)?;
                self.require_set(&self.outflow)?;
                self.stock.set_values(accumulate(&self.time, &self.inflow, &self.outflow))?;
                None
            }
            StockKind::InflowDriven(model) => {
                self.require_set(&self.inflow)?;
                Some(self.inflow_driven(model)?)
            }
            StockKind::StockDriven(model) => {
                self.require_set(&self.stock)?;
                Some(self.stock_driven(model)?)
            }
            StockKind::Flexible(model) => {
                if self.stock.is_set() {
                    Some(self.stock_driven(model)?)
                } else if self.inflow.is_set() {
                    Some(self.inflow_driven(model)?)
                } else {
                    return Err(MfaError::ParameterNotSet(format!(
                        "flexible stock '{}' needs either its stock or its inflow",
                        self.name
                    )));
                }
            }
            StockKind::InflowByCohortDriven(model) => {
                if model.initial_stock.is_none() {
                    return Err(MfaError::ParameterNotSet(format!(
                        "initial stock of inflow-by-cohort-driven stock '{}'",
                        self.name
                    )));
                }
                Some(self.inflow_driven(model)?)
            }
        };

        if let Some(solved) = solved {
            if !solved.zero_survival_steps.is_empty() {
                warn!(
                    stock = %self.name,
                    steps = ?solved.zero_survival_steps,
                    "zero survival within the own time step, inflow set to zero"
                );
            }
            self.stock.set_values(solved.stock)?;
            self.inflow.set_values(solved.inflow)?;
            self.outflow.set_values(solved.outflow)?;
            self.stock_by_cohort = Some(solved.stock_by_cohort);
            self.outflow_by_cohort = Some(solved.outflow_by_cohort);
            self.zero_survival_steps = solved.zero_survival_steps;
            self.corrected_steps = solved.corrected_steps;
            self.seeded_inflow = solved.seeded_inflow;
        }
        self.stock.mark_set();
        self.inflow.mark_set();
        self.outflow.mark_set();
        self.computed = true;

        if config.checks.mass_balance_stocks {
            self.check_mass_balance(config)?;
        }
        Ok(())
    }

    fn inflow_driven(&self, model: &DynamicModel) -> MfaResult<dynamic::DynamicSolution> {
        dynamic::inflow_driven(&self.name, model, &self.dims, &self.time, &self.inflow)
    }

    fn stock_driven(&self, model: &DynamicModel) -> MfaResult<dynamic::DynamicSolution> {
        dynamic::stock_driven(&self.name, model, &self.dims, &self.time, &self.stock)
    }

    fn require_set(&self, array: &DimArray) -> MfaResult<()> {
        if array.is_set() {
            Ok(())
        } else {
            Err(MfaError::ParameterNotSet(format!("{} of stock '{}'", array.label(), self.name)))
        }
    }

    /// Interval length per time step, over the time dimension only.
    pub fn time_interval_length(&self) -> MfaResult<DimArray> {
        let time_dims = self.dims.subset_letters(&[self.time_letter()])?;
        DimArray::from_vec(time_dims, self.time.interval_lengths().to_vec())
    }

    /// Annual inflow minus annual outflow.
    pub fn net_inflow(&self) -> MfaResult<DimArray> {
        &self.inflow - &self.outflow
    }

    /// Inflow an inflow-driven stock derived from its initial stock, zero
    /// after the seeding year.
    pub fn seeded_inflow(&self) -> Option<&ArrayD<f64>> {
        self.seeded_inflow.as_ref()
    }

    /// Inflow that passes through the owning process: the inflow without the
    /// seeded part.
    pub fn process_inflow(&self) -> MfaResult<DimArray> {
        let mut inflow = self.inflow.clone();
        if let Some(seeded) = &self.seeded_inflow {
            inflow.set_values(self.inflow.values() - seeded)?;
        }
        Ok(inflow)
    }

    /// Process inflow minus outflow, the amount the owning process keeps.
    pub fn process_net_inflow(&self) -> MfaResult<DimArray> {
        &self.process_inflow()? - &self.outflow
    }

    /// Stock change per time step, the first step taken against zero.
    pub fn stock_change(&self) -> MfaResult<DimArray> {
        self.stock.diff_along_first_axis()
    }

    /// Mass balance residual `stock_change - net_inflow * interval_length`.
    pub fn balance(&self) -> MfaResult<DimArray> {
        let net = self.net_inflow()?;
        let net_whole = (&net * &self.time_interval_length()?)?;
        let balance = (&self.stock_change()? - &net_whole)?.cast_to(&self.dims)?;
        Ok(balance.with_name(&format!("{}_balance", self.name)))
    }

    /// Checks the mass balance and applies the configured behavior on failure.
    pub fn check_mass_balance(&self, config: &Config) -> MfaResult<()> {
        let balance = self.balance()?;
        let error = if balance.values().iter().any(|v| v.is_nan()) {
            f64::NAN
        } else {
            balance.max_abs()
        };
        let dt = self.time_interval_length()?;
        let magnitude = self
            .stock
            .max_abs()
            .max((&self.inflow * &dt)?.max_abs())
            .max((&self.outflow * &dt)?.max_abs());
        let tolerance = config.tolerance(magnitude);
        if error.is_nan() || error > tolerance {
            return config.error_behaviors.mass_balance.handle(MfaError::MassBalance {
                context: format!("stock {}", self.name),
                error,
                tolerance,
            });
        }
        debug!(stock = %self.name, error, tolerance, "stock mass balance ok");
        Ok(())
    }

    /// Combines stocks with equal dimensions along a new last dimension.
    ///
    /// The result is a computed flow-driven stock named and attached like the
    /// first stock; cohort tables are not carried over.
    pub fn stack(stocks: &[Stock], dimension: Dimension) -> MfaResult<Stock> {
        let first = stocks.first().ok_or_else(|| {
            MfaError::DimensionMismatch("cannot stack an empty list of stocks".to_string())
        })?;
        let stock: Vec<DimArray> = stocks.iter().map(|s| s.stock.clone()).collect();
        let inflow: Vec<DimArray> = stocks.iter().map(|s| s.inflow.clone()).collect();
        let outflow: Vec<DimArray> = stocks.iter().map(|s| s.outflow.clone()).collect();
        let stock = DimArray::stack(&stock, dimension.clone())?;
        let inflow = DimArray::stack(&inflow, dimension.clone())?;
        let outflow = DimArray::stack(&outflow, dimension)?;

        let mut stacked = Stock::new(&first.name, stock.dims().clone(), StockKind::FlowDriven)?;
        stacked.process = first.process;
        stacked.stock.set_from(&stock)?;
        stacked.inflow.set_from(&inflow)?;
        stacked.outflow.set_from(&outflow)?;
        stacked.computed = stocks.iter().all(|s| s.computed);
        Ok(stacked)
    }

    fn time_letter(&self) -> char {
        self.dims.dims().first().map(|d| d.letter()).unwrap_or('t')
    }
}

/// Cumulative sum of `(inflow - outflow) * interval_length` along time.
fn accumulate(time: &TimeAxis, inflow: &DimArray, outflow: &DimArray) -> ArrayD<f64> {
    let net = inflow.values() - outflow.values();
    let mut stock = time.to_whole_period(&net);
    stock.accumulate_axis_inplace(Axis(0), |previous, current| *current += *previous);
    stock
}
