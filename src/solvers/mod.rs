//! Solvers for material flow systems.
//!
//! # Process Mass Balance
//!
//! A process with `k` flows has `k + 1` unknowns: every flow and the process
//! total. The two conservation equations (inflows sum to the total, outflows
//! sum to the total) leave `k - 1` pieces of information to be supplied as
//! known flow values or shares. [`ProcessSolver`] works through the process in
//! a fixed sequence:
//!
//! 1. Infer the total from the inflow side or, failing that, the outflow side:
//!    - all flows known: their sum
//!    - a known flow with a share: flow / share
//!    - every unknown flow has a share: known sum / (1 - unknown shares)
//! 2. Multiply in the dimension splitter if the unknown flows need dimensions
//!    the total lacks
//! 3. Compute unknown flows: total * share, or the remainder of the side for
//!    the single flow without a share
//! 4. Verify shares and the mass balance
//!
//! A process that owns a stock is driven by it instead: depending on the
//! stock kind, the stock's inflow or outflow becomes the total of one side.
//!
//! Missing information is not an error here. It is reported as
//! [`SolveOutcome::Underdetermined`] and the caller decides what to do with it.
//!
//! # Submodules
//!
//! - [`cohort`]: cohort accounting behind the dynamic stock models
//! - `recursive`: graph traversal computing a process and its neighbors

pub mod cohort;
mod recursive;

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::array::ops::{max_deviation, sum_all};
use crate::array::{DimArray, Flow};
use crate::config::Config;
use crate::dimensions::DimensionSet;
use crate::models::{Stock, StockKind};
use crate::system::Process;
use crate::{MfaError, MfaResult};

/// Progress of a process through the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProcessState {
    #[default]
    Uninitialized,
    TotalInferred,
    FlowsComputed,
    Computed,
    Underdetermined,
}

/// Flows of a process that have neither a value nor a share.
#[derive(Debug, Clone, PartialEq)]
pub struct Underdetermination {
    pub process: String,
    pub missing_inflows: Vec<String>,
    pub missing_outflows: Vec<String>,
}

impl fmt::Display for Underdetermination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Process {} is underdetermined: inflows without value or share: [{}], \
             outflows without value or share: [{}]",
            self.process,
            self.missing_inflows.join(", "),
            self.missing_outflows.join(", ")
        )
    }
}

/// Result of solving one process.
#[derive(Debug, Clone, PartialEq)]
pub enum SolveOutcome {
    /// All flows were computed; `overdetermined` if more information than
    /// needed was given
    Computed { overdetermined: bool },
    /// Not enough information; nothing was written
    Underdetermined(Underdetermination),
}

impl SolveOutcome {
    pub fn is_computed(&self) -> bool {
        matches!(self, SolveOutcome::Computed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    In,
    Out,
}

impl Side {
    fn label(self) -> &'static str {
        match self {
            Side::In => "inflow",
            Side::Out => "outflow",
        }
    }
}

/// Solves the mass balance of a single process.
///
/// Borrows the process definition, the flows of the system and, if the
/// process owns one, its stock.
pub struct ProcessSolver<'a> {
    process: &'a Process,
    flows: &'a mut BTreeMap<String, Flow>,
    stock: Option<&'a mut Stock>,
    config: &'a Config,
    state: ProcessState,
    splitter_used: bool,
}

impl<'a> ProcessSolver<'a> {
    pub fn new(
        process: &'a Process,
        flows: &'a mut BTreeMap<String, Flow>,
        stock: Option<&'a mut Stock>,
        config: &'a Config,
    ) -> Self {
        ProcessSolver {
            process,
            flows,
            stock,
            config,
            state: ProcessState::Uninitialized,
            splitter_used: false,
        }
    }

    /// State reached so far, also after an error.
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Computes all flows of the process and runs the enabled checks.
    ///
    /// # Errors
    ///
    /// Fatal dimension and parameter errors, and check violations whose
    /// configured behavior is [`ErrorBehavior::Error`](crate::ErrorBehavior::Error).
    pub fn solve(&mut self) -> MfaResult<SolveOutcome> {
        if self.process.is_boundary() {
            return Err(MfaError::Definition(format!(
                "process {} is the system boundary and has no mass balance to solve",
                self.process.name()
            )));
        }
        let outcome = match self.stock.take() {
            Some(stock) => {
                let outcome = self.solve_with_stock(stock);
                if let Ok(SolveOutcome::Computed { .. }) = &outcome {
                    self.check_mass_balance(Some(&*stock))?;
                }
                outcome?
            }
            None => {
                let outcome = self.solve_plain()?;
                if outcome.is_computed() {
                    self.check_mass_balance(None)?;
                }
                outcome
            }
        };
        match &outcome {
            SolveOutcome::Computed { overdetermined } => {
                if !self.splitter_used && self.process.dimension_splitter().is_some() {
                    let process = self.process.name().to_string();
                    let behavior = self.config.error_behaviors.unused_dimension_splitter;
                    behavior.handle(MfaError::UnusedSplitter { process })?;
                }
                self.state = ProcessState::Computed;
                debug!(process = %self.process.name(), overdetermined, "process computed");
            }
            SolveOutcome::Underdetermined(_) => self.state = ProcessState::Underdetermined,
        }
        Ok(outcome)
    }

    fn solve_plain(&mut self) -> MfaResult<SolveOutcome> {
        if let Some(missing) = self.unresolvable(&[Side::In, Side::Out])? {
            return Ok(SolveOutcome::Underdetermined(missing));
        }
        let Some(total) = self.infer_total(&[Side::In, Side::Out])? else {
            let missing = self.underdetermination(&[Side::In, Side::Out])?;
            return Ok(SolveOutcome::Underdetermined(missing));
        };
        let overdetermined = self.is_overdetermined()?;
        let total = self.apply_dimension_splitter(total, &[Side::In, Side::Out])?;
        self.state = ProcessState::TotalInferred;

        self.compute_flows(&total, Side::In)?;
        self.compute_flows(&total, Side::Out)?;
        self.state = ProcessState::FlowsComputed;

        self.check_shares(&total, Side::In, overdetermined)?;
        self.check_shares(&total, Side::Out, overdetermined)?;
        Ok(SolveOutcome::Computed { overdetermined })
    }

    fn solve_with_stock(&mut self, stock: &mut Stock) -> MfaResult<SolveOutcome> {
        match stock.kind() {
            StockKind::FlowDriven => self.drive_flow_driven(stock),
            StockKind::InflowDriven(_) | StockKind::InflowByCohortDriven(_) => {
                self.drive_by_inflow(stock)
            }
            StockKind::StockDriven(_) => self.drive_by_stock(stock),
            StockKind::Flexible(_) => {
                if stock.stock.is_set() {
                    self.drive_by_stock(stock)
                } else {
                    self.drive_by_inflow(stock)
                }
            }
        }
    }

    /// Each side determines its own total, which becomes the stock's inflow or outflow.
    fn drive_flow_driven(&mut self, stock: &mut Stock) -> MfaResult<SolveOutcome> {
        if let Some(missing) = self.unresolvable(&[Side::In, Side::Out])? {
            return Ok(SolveOutcome::Underdetermined(missing));
        }
        let mut totals = Vec::with_capacity(2);
        for side in [Side::In, Side::Out] {
            if self.flow_names(side).is_empty() {
                totals.push(None);
                continue;
            }
            match self.infer_total(&[side])? {
                Some(total) => totals.push(Some(total)),
                None => return Ok(SolveOutcome::Underdetermined(self.underdetermination(&[side])?)),
            }
        }
        self.state = ProcessState::TotalInferred;

        for (side, total) in [Side::In, Side::Out].into_iter().zip(&totals) {
            let target = match side {
                Side::In => &mut stock.inflow,
                Side::Out => &mut stock.outflow,
            };
            match total {
                Some(total) => {
                    self.compute_flows(total, side)?;
                    self.check_stock_dims(target, total, side)?;
                    target.set_from(total)?;
                }
                None => target.fill(0.0),
            }
        }
        self.state = ProcessState::FlowsComputed;

        for (side, total) in [Side::In, Side::Out].into_iter().zip(&totals) {
            if let Some(total) = total {
                self.check_shares(total, side, false)?;
            }
        }
        stock.compute(self.config)?;
        Ok(SolveOutcome::Computed { overdetermined: false })
    }

    /// Inflow drives the stock, whose outflow then drives the outflow side.
    ///
    /// Inflow seeded from an initial stock never enters the inflow flows.
    fn drive_by_inflow(&mut self, stock: &mut Stock) -> MfaResult<SolveOutcome> {
        if let Some(missing) = self.unresolvable(&[Side::In, Side::Out])? {
            return Ok(SolveOutcome::Underdetermined(missing));
        }
        if stock.inflow.is_set() {
            stock.compute(self.config)?;
            self.state = ProcessState::TotalInferred;
            self.drive_side(stock.process_inflow()?, Side::In)?;
        } else {
            let Some(total) = self.infer_total(&[Side::In])? else {
                return Ok(SolveOutcome::Underdetermined(self.underdetermination(&[Side::In])?));
            };
            self.state = ProcessState::TotalInferred;
            let total = self.apply_dimension_splitter(total, &[Side::In])?;
            self.compute_flows(&total, Side::In)?;
            self.check_stock_dims(&stock.inflow, &total, Side::In)?;
            stock.inflow.set_from(&total)?;
            stock.compute(self.config)?;
            self.check_shares(&total, Side::In, false)?;
        }
        self.drive_side(stock.outflow.clone(), Side::Out)?;
        Ok(SolveOutcome::Computed { overdetermined: false })
    }

    /// The stock determines both its inflow and outflow, which drive both sides.
    fn drive_by_stock(&mut self, stock: &mut Stock) -> MfaResult<SolveOutcome> {
        if let Some(missing) = self.unresolvable(&[Side::In, Side::Out])? {
            return Ok(SolveOutcome::Underdetermined(missing));
        }
        stock.compute(self.config)?;
        self.state = ProcessState::TotalInferred;
        self.drive_side(stock.outflow.clone(), Side::Out)?;
        self.drive_side(stock.inflow.clone(), Side::In)?;
        Ok(SolveOutcome::Computed { overdetermined: false })
    }

    fn drive_side(&mut self, total: DimArray, side: Side) -> MfaResult<()> {
        if self.flow_names(side).is_empty() {
            return Ok(());
        }
        let total = self.apply_dimension_splitter(total, &[side])?;
        self.compute_flows(&total, side)?;
        self.state = ProcessState::FlowsComputed;
        self.check_shares(&total, side, false)
    }

    fn check_stock_dims(&self, target: &DimArray, total: &DimArray, side: Side) -> MfaResult<()> {
        let missing = target.dims() - total.dims();
        if missing.is_empty() {
            return Ok(());
        }
        Err(MfaError::DimensionMismatch(format!(
            "In process {}: stock {} has dimensions {} not contained in the summed {}s; \
             use fewer dimensions for the stock or a dimension splitter in a neighboring process",
            self.process.name(),
            side.label(),
            missing.describe(),
            side.label()
        )))
    }

    fn flow_names(&self, side: Side) -> Vec<String> {
        match side {
            Side::In => self.process.inflow_names(),
            Side::Out => self.process.outflow_names(),
        }
    }

    fn flow(&self, name: &str) -> MfaResult<&Flow> {
        self.flows.get(name).ok_or_else(|| missing_flow(self.process, name))
    }

    /// Unknown flows of a side, split into those with and without a share.
    fn unknown(&self, side: Side) -> MfaResult<(Vec<String>, Vec<String>)> {
        let mut shared = Vec::new();
        let mut unshared = Vec::new();
        for name in self.flow_names(side) {
            if self.flow(&name)?.is_set() {
                continue;
            }
            if self.process.share(&name).is_some() {
                shared.push(name);
            } else {
                unshared.push(name);
            }
        }
        Ok((shared, unshared))
    }

    /// More than one flow on a side without value or share.
    fn unresolvable(&self, sides: &[Side]) -> MfaResult<Option<Underdetermination>> {
        for side in sides {
            if self.unknown(*side)?.1.len() > 1 {
                return self.underdetermination(sides).map(Some);
            }
        }
        Ok(None)
    }

    fn underdetermination(&self, sides: &[Side]) -> MfaResult<Underdetermination> {
        let mut missing = Underdetermination {
            process: self.process.name().to_string(),
            missing_inflows: Vec::new(),
            missing_outflows: Vec::new(),
        };
        for side in sides {
            let unshared = self.unknown(*side)?.1;
            match side {
                Side::In => missing.missing_inflows = unshared,
                Side::Out => missing.missing_outflows = unshared,
            }
        }
        Ok(missing)
    }

    fn is_overdetermined(&self) -> MfaResult<bool> {
        let mut n_flows = 0;
        let mut n_given = 0;
        for name in self.flow_names(Side::In).iter().chain(&self.flow_names(Side::Out)) {
            n_flows += 1;
            if self.flow(name)?.is_set() {
                n_given += 1;
            }
            if self.process.share(name).is_some() {
                n_given += 1;
            }
        }
        Ok(n_flows > 0 && n_given > n_flows - 1)
    }

    fn infer_total(&self, sides: &[Side]) -> MfaResult<Option<DimArray>> {
        for side in sides {
            if let Some(total) = self.infer_side_total(*side)? {
                debug!(process = %self.process.name(), side = side.label(), "total inferred");
                return Ok(Some(total));
            }
        }
        Ok(None)
    }

    fn infer_side_total(&self, side: Side) -> MfaResult<Option<DimArray>> {
        let names = self.flow_names(side);
        let mut known = Vec::new();
        let mut unknown = Vec::new();
        for name in &names {
            let flow = self.flow(name)?;
            if flow.is_set() {
                known.push(flow);
            } else {
                unknown.push(name);
            }
        }
        if known.is_empty() {
            return Ok(None);
        }
        if unknown.is_empty() {
            return sum_all(known.iter().map(|f| f.array()));
        }
        let known_with_share =
            known.iter().find_map(|f| self.process.share(f.name()).map(|s| (f, s)));
        if let Some((flow, share)) = known_with_share {
            return Ok(Some((flow.array() / share)?));
        }
        let unknown_shares: Option<Vec<&DimArray>> =
            unknown.iter().map(|n| self.process.share(n)).collect();
        let Some(unknown_shares) = unknown_shares else {
            return Ok(None);
        };
        let known_sum = sum_all(known.iter().map(|f| f.array()))?;
        let share_sum = sum_all(unknown_shares)?;
        match (known_sum, share_sum) {
            (Some(known_sum), Some(share_sum)) => Ok(Some((&known_sum / &(1.0 - &share_sum))?)),
            _ => Ok(None),
        }
    }

    /// Dimensions the unknown flows need beyond their shares.
    fn needed_dims(&self, sides: &[Side]) -> MfaResult<DimensionSet> {
        let mut needed = DimensionSet::empty();
        for side in sides {
            let (shared, unshared) = self.unknown(*side)?;
            for name in shared.iter().chain(&unshared) {
                let dims = self.flow(name)?.dims().clone();
                let dims = match self.process.share(name) {
                    Some(share) => &dims - share.dims(),
                    None => dims,
                };
                needed = &needed | &dims;
            }
        }
        Ok(needed)
    }

    fn apply_dimension_splitter(&mut self, total: DimArray, sides: &[Side]) -> MfaResult<DimArray> {
        let missing = &self.needed_dims(sides)? - total.dims();
        if missing.is_empty() {
            return Ok(total);
        }
        let splitter = self.process.dimension_splitter().ok_or_else(|| {
            MfaError::DimensionMismatch(format!(
                "In process {}: flows need dimensions {} that the process total lacks, \
                 and no dimension splitter is set",
                self.process.name(),
                missing.describe()
            ))
        })?;
        if !missing.is_subset_of(splitter.dims()) {
            return Err(MfaError::DimensionMismatch(format!(
                "In process {}: dimension splitter with dims {} lacks dimensions {}",
                self.process.name(),
                splitter.dims().describe(),
                (&missing - splitter.dims()).describe()
            )));
        }
        let sums = splitter.sum_over(&missing.letters())?;
        let error = (&sums - 1.0).max_abs();
        let tolerance = self.config.tolerance(1.0);
        if error.is_nan() || error > tolerance {
            self.config.error_behaviors.dimension_splitter_sum.handle(MfaError::SplitterSum {
                process: self.process.name().to_string(),
                error,
                tolerance,
            })?;
        }
        self.splitter_used = true;
        &total * splitter
    }

    /// Computes every unknown flow of a side, then writes them all.
    fn compute_flows(&mut self, total: &DimArray, side: Side) -> MfaResult<()> {
        let (shared, unshared) = self.unknown(side)?;
        let mut staged: Vec<(String, DimArray)> = Vec::with_capacity(shared.len() + 1);
        for name in shared {
            let Some(share) = self.process.share(&name) else {
                continue;
            };
            let mut value = self.flow(&name)?.array().clone();
            value.set_from(&(total * share)?)?;
            staged.push((name, value));
        }
        if let Some(name) = unshared.first() {
            let target = self.flow(name)?.dims().clone();
            let mut remainder = self.sum_onto(total, &target, name)?;
            for other in self.flow_names(side).iter().filter(|n| *n != name) {
                let value = match staged.iter().find(|(staged_name, _)| staged_name == other) {
                    Some((_, value)) => value,
                    None => self.flow(other)?.array(),
                };
                remainder = (&remainder - &self.sum_onto(value, &target, name)?)?;
            }
            staged.push((name.clone(), remainder));
        }
        for (name, value) in &staged {
            self.write_flow(name, value)?;
        }
        Ok(())
    }

    fn sum_onto(&self, array: &DimArray, target: &DimensionSet, flow: &str) -> MfaResult<DimArray> {
        if !target.is_subset_of(array.dims()) {
            return Err(MfaError::DimensionMismatch(format!(
                "In process {}: cannot compute flow {} with dims {} as remainder, \
                 {} has only dims {}",
                self.process.name(),
                flow,
                target.describe(),
                array.label(),
                array.dims().describe()
            )));
        }
        array.sum_to_dims(target)
    }

    fn write_flow(&mut self, name: &str, value: &DimArray) -> MfaResult<()> {
        let process = self.process;
        let flow = self.flows.get_mut(name).ok_or_else(|| missing_flow(process, name))?;
        flow.set_from(value)?;
        debug!(process = %process.name(), flow = %name, "flow computed");
        Ok(())
    }

    fn check_shares(&self, total: &DimArray, side: Side, overdetermined: bool) -> MfaResult<()> {
        if !self.config.checks.process_shares {
            return Ok(());
        }
        for name in self.flow_names(side) {
            let Some(share) = self.process.share(&name) else {
                continue;
            };
            let flow = self.flow(&name)?;
            let expected = (total * share)?;
            let error = max_deviation(flow.array(), &expected)?;
            let tolerance = self.config.tolerance(flow.max_abs().max(expected.max_abs()));
            if error > tolerance {
                let hint = if overdetermined {
                    ". The process is overdetermined, so given flows and shares may contradict \
                     each other"
                        .to_string()
                } else {
                    String::new()
                };
                self.config.error_behaviors.process_shares.handle(MfaError::ShareViolation {
                    process: self.process.name().to_string(),
                    flow: name.clone(),
                    error,
                    tolerance,
                    hint,
                })?;
            }
        }
        Ok(())
    }

    fn check_mass_balance(&self, stock: Option<&Stock>) -> MfaResult<()> {
        if self.config.checks.mass_balance_processes {
            check_process_balance(self.process, &*self.flows, stock, self.config)?;
        }
        Ok(())
    }
}

/// Checks that inflows minus outflows equal the stock's net inflow, or zero.
///
/// The system boundary is skipped.
pub(crate) fn check_process_balance(
    process: &Process,
    flows: &BTreeMap<String, Flow>,
    stock: Option<&Stock>,
    config: &Config,
) -> MfaResult<()> {
    if process.is_boundary() {
        return Ok(());
    }
    let inflow = sum_all(flow_arrays(process, flows, process.inflow_names())?)?;
    let outflow = sum_all(flow_arrays(process, flows, process.outflow_names())?)?;
    let magnitude = [inflow.as_ref(), outflow.as_ref()]
        .into_iter()
        .flatten()
        .map(|a| a.max_abs())
        .fold(0.0, f64::max);
    let net = match (inflow, outflow) {
        (Some(i), Some(o)) => (&i - &o)?,
        (Some(i), None) => i,
        (None, Some(o)) => -&o,
        (None, None) => return Ok(()),
    };
    let balance = match stock {
        Some(stock) => (&net - &stock.process_net_inflow()?)?,
        None => net,
    };
    let error = if balance.values().iter().any(|v| v.is_nan()) {
        f64::NAN
    } else {
        balance.max_abs()
    };
    let tolerance = config.tolerance(magnitude);
    if error.is_nan() || error > tolerance {
        return config.error_behaviors.mass_balance.handle(MfaError::MassBalance {
            context: format!("process {}", process.name()),
            error,
            tolerance,
        });
    }
    debug!(process = %process.name(), error, tolerance, "process mass balance ok");
    Ok(())
}

fn flow_arrays<'f>(
    process: &Process,
    flows: &'f BTreeMap<String, Flow>,
    names: Vec<String>,
) -> MfaResult<Vec<&'f DimArray>> {
    names
        .iter()
        .map(|n| flows.get(n).map(|f| f.array()).ok_or_else(|| missing_flow(process, n)))
        .collect()
}

fn missing_flow(process: &Process, flow: &str) -> MfaError {
    MfaError::Definition(format!("flow {} of process {} does not exist", flow, process.name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimensions::Dimension;
    use crate::lifetime::{LifetimeKind, LifetimeModel};
    use crate::models::DynamicModel;
    use crate::system::ProcessId;
    use crate::ErrorBehavior;
    use approx::assert_relative_eq;

    fn t() -> DimensionSet {
        DimensionSet::new(vec![Dimension::new("time", 't', [2020, 2021]).unwrap()]).unwrap()
    }

    fn tp() -> DimensionSet {
        DimensionSet::new(vec![
            Dimension::new("time", 't', [2020, 2021]).unwrap(),
            Dimension::new("product", 'p', ["cars", "buildings"]).unwrap(),
        ])
        .unwrap()
    }

    /// `source => p => {a, b}`, all flows over `dims`.
    fn setup(dims: DimensionSet) -> (Process, BTreeMap<String, Flow>) {
        let mut process = Process::new(ProcessId(1), "p");
        let mut flows = BTreeMap::new();
        for (name, from, to) in [("in", 0, 1), ("a", 1, 2), ("b", 1, 3)] {
            let flow = Flow::new(name, dims.clone(), ProcessId(from), ProcessId(to));
            flows.insert(name.to_string(), flow);
        }
        process.add_inflow("source", "in");
        process.add_outflow("a", "a");
        process.add_outflow("b", "b");
        (process, flows)
    }

    fn solve(
        process: &Process,
        flows: &mut BTreeMap<String, Flow>,
        config: &Config,
    ) -> MfaResult<SolveOutcome> {
        ProcessSolver::new(process, flows, None, config).solve()
    }

    #[test]
    fn test_share_and_remainder() {
        let (mut process, mut flows) = setup(t());
        flows.get_mut("in").unwrap().fill(10.0);
        process.set_share("a", DimArray::scalar(0.5));
        let outcome = solve(&process, &mut flows, &Config::default()).unwrap();
        assert_eq!(outcome, SolveOutcome::Computed { overdetermined: false });
        assert_eq!(flows["a"].to_vec(), vec![5.0, 5.0]);
        assert_eq!(flows["b"].to_vec(), vec![5.0, 5.0]);
    }

    #[test]
    fn test_total_from_outflow_side() {
        let (mut process, mut flows) = setup(t());
        flows.get_mut("a").unwrap().fill(3.0);
        process.set_share("a", DimArray::scalar(0.25));
        solve(&process, &mut flows, &Config::default()).unwrap();
        assert_eq!(flows["in"].to_vec(), vec![12.0, 12.0]);
        assert_eq!(flows["b"].to_vec(), vec![9.0, 9.0]);
    }

    #[test]
    fn test_total_from_unknown_shares() {
        let (mut process, mut flows) = setup(t());
        flows.get_mut("b").unwrap().fill(6.0);
        process.set_share("a", DimArray::scalar(0.4));
        solve(&process, &mut flows, &Config::default()).unwrap();
        assert_relative_eq!(flows["a"].to_vec()[0], 4.0, epsilon = 1e-12);
        assert_relative_eq!(flows["in"].to_vec()[0], 10.0, epsilon = 1e-12);
    }

    #[test]
    fn test_underdetermined_reports_missing_flows() {
        let (process, mut flows) = setup(t());
        flows.get_mut("in").unwrap().fill(10.0);
        let config = Config::default();
        let mut solver = ProcessSolver::new(&process, &mut flows, None, &config);
        let outcome = solver.solve().unwrap();
        assert_eq!(solver.state(), ProcessState::Underdetermined);
        let SolveOutcome::Underdetermined(missing) = outcome else {
            panic!("expected underdetermined outcome");
        };
        assert_eq!(missing.missing_outflows, vec!["a".to_string(), "b".to_string()]);
        assert!(missing.to_string().contains("underdetermined"));
        assert!(!flows["a"].is_set());
    }

    #[test]
    fn test_overdetermined_share_conflict() {
        let (mut process, mut flows) = setup(t());
        flows.get_mut("in").unwrap().fill(10.0);
        flows.get_mut("a").unwrap().fill(2.0);
        process.set_share("a", DimArray::scalar(0.5));
        let result = solve(&process, &mut flows, &Config::default());
        match result {
            Err(MfaError::ShareViolation { hint, .. }) => assert!(hint.contains("overdetermined")),
            other => panic!("expected share violation, got {:?}", other),
        }

        let mut config = Config::default();
        config.error_behaviors.process_shares = ErrorBehavior::Ignore;
        config.error_behaviors.mass_balance = ErrorBehavior::Ignore;
        let (mut process, mut flows) = setup(t());
        flows.get_mut("in").unwrap().fill(10.0);
        flows.get_mut("a").unwrap().fill(2.0);
        process.set_share("a", DimArray::scalar(0.5));
        let outcome = solve(&process, &mut flows, &config).unwrap();
        assert_eq!(outcome, SolveOutcome::Computed { overdetermined: true });
        assert_eq!(flows["b"].to_vec(), vec![8.0, 8.0]);
    }

    #[test]
    fn test_dimension_splitter() {
        let (mut process, mut flows) = setup(tp());
        let mut inflow = Flow::new("in", t(), ProcessId(0), ProcessId(1));
        inflow.fill(10.0);
        flows.insert("in".to_string(), inflow);
        flows.get_mut("a").unwrap().fill(1.0);

        let no_splitter = solve(&process, &mut flows.clone(), &Config::default());
        assert!(matches!(no_splitter, Err(MfaError::DimensionMismatch(_))));

        let split = DimArray::from_vec(tp().subset(&["p"]).unwrap(), vec![0.3, 0.7]).unwrap();
        process.set_dimension_splitter(split);
        solve(&process, &mut flows, &Config::default()).unwrap();
        let b = flows["b"].to_vec();
        assert_relative_eq!(b[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(b[1], 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_splitter_sum_checked() {
        let (mut process, mut flows) = setup(tp());
        let mut inflow = Flow::new("in", t(), ProcessId(0), ProcessId(1));
        inflow.fill(10.0);
        flows.insert("in".to_string(), inflow);
        flows.get_mut("a").unwrap().fill(1.0);
        let split = DimArray::from_vec(tp().subset(&["p"]).unwrap(), vec![0.3, 0.3]).unwrap();
        process.set_dimension_splitter(split);
        assert!(matches!(
            solve(&process, &mut flows, &Config::default()),
            Err(MfaError::SplitterSum { .. })
        ));
    }

    #[test]
    fn test_unused_splitter_flagged() {
        let (mut process, mut flows) = setup(t());
        flows.get_mut("in").unwrap().fill(10.0);
        process.set_share("a", DimArray::scalar(0.5));
        process.set_dimension_splitter(DimArray::scalar(1.0));
        let mut config = Config::default();
        config.error_behaviors.unused_dimension_splitter = ErrorBehavior::Error;
        let result = solve(&process, &mut flows, &config);
        assert!(matches!(result, Err(MfaError::UnusedSplitter { .. })));
    }

    #[test]
    fn test_failed_side_leaves_flows_untouched() {
        let (mut process, mut flows) = setup(t());
        flows.insert("b".to_string(), Flow::new("b", tp(), ProcessId(1), ProcessId(3)));
        flows.insert("c".to_string(), Flow::new("c", t(), ProcessId(1), ProcessId(4)));
        process.add_outflow("c", "c");
        flows.get_mut("in").unwrap().fill(10.0);
        flows.get_mut("c").unwrap().fill(1.0);
        process.set_share("a", DimArray::scalar(0.5));
        let split = DimArray::from_vec(tp().subset(&["p"]).unwrap(), vec![0.3, 0.7]).unwrap();
        process.set_dimension_splitter(split);

        // `a` has fewer dims than the remainder `b`
        let result = solve(&process, &mut flows, &Config::default());
        assert!(matches!(result, Err(MfaError::DimensionMismatch(_))));
        assert!(!flows["a"].is_set());
        assert!(!flows["b"].is_set());
    }

    #[test]
    fn test_stock_inflow_side_uses_splitter() {
        let mut process = Process::new(ProcessId(1), "p");
        process.add_inflow("x", "x");
        process.add_inflow("y", "y");
        process.add_outflow("sink", "out");
        let mut flows = BTreeMap::new();
        flows.insert("x".to_string(), Flow::new("x", t(), ProcessId(2), ProcessId(1)));
        flows.insert("y".to_string(), Flow::new("y", tp(), ProcessId(3), ProcessId(1)));
        flows.insert("out".to_string(), Flow::new("out", t(), ProcessId(1), ProcessId(4)));
        flows.get_mut("x").unwrap().fill(1.0);
        process.set_share("x", DimArray::scalar(0.25));
        process.set_share("y", DimArray::scalar(0.75));
        let split = DimArray::from_vec(tp().subset(&["p"]).unwrap(), vec![0.5, 0.5]).unwrap();
        process.set_dimension_splitter(split);

        let lifetime = LifetimeModel::new(LifetimeKind::Fixed, t(), 't')
            .unwrap()
            .with_parameter("mean", &DimArray::scalar(1.0))
            .unwrap();
        let kind = StockKind::InflowDriven(DynamicModel::new(lifetime));
        let mut stock = Stock::new("s", t(), kind).unwrap();
        let config = Config::default();
        let outcome = ProcessSolver::new(&process, &mut flows, Some(&mut stock), &config)
            .solve()
            .unwrap();

        assert!(outcome.is_computed());
        assert_eq!(flows["y"].to_vec(), vec![1.5; 4]);
        assert_eq!(stock.inflow.to_vec(), vec![4.0, 4.0]);
        assert_eq!(flows["out"].to_vec(), stock.outflow.to_vec());
    }

    #[test]
    fn test_mass_balance_violation() {
        let (process, mut flows) = setup(t());
        flows.get_mut("in").unwrap().fill(10.0);
        flows.get_mut("a").unwrap().fill(4.0);
        flows.get_mut("b").unwrap().fill(4.0);
        let result = solve(&process, &mut flows, &Config::default());
        assert!(matches!(result, Err(MfaError::MassBalance { .. })));
    }

    #[test]
    fn test_boundary_not_solved() {
        let process = Process::new(ProcessId(0), crate::SYSTEM_BOUNDARY);
        let mut flows = BTreeMap::new();
        let result = solve(&process, &mut flows, &Config::default());
        assert!(matches!(result, Err(MfaError::Definition(_))));
    }
}
