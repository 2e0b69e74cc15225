//! # Processes and the MFA System
//!
//! An [`MfaSystem`] owns every piece of a material flow model in flat
//! collections: processes in a `Vec` indexed by [`ProcessId`], flows, stocks
//! and parameters in maps keyed by name. Processes refer to their flows and
//! stock by name, and flows refer to their endpoints by id, so the graph has
//! no owning cycles.
//!
//! Process 0 is always the system boundary [`SYSTEM_BOUNDARY`]; it is exempt
//! from the mass balance.
//!
//! # Example
//!
//! ```
//! use stockflow::{Config, DimArray, Dimension, DimensionSet, Flow, MfaSystem, Process, ProcessId};
//!
//! let dims = DimensionSet::new(vec![Dimension::new("time", 't', [2020, 2021])?])?;
//! let processes = vec![
//!     Process::new(ProcessId(0), "sysenv"),
//!     Process::new(ProcessId(1), "sorting"),
//! ];
//! let mut system = MfaSystem::new(dims.clone(), processes, Config::default())?;
//! system.add_flow(Flow::new("scrap", dims.clone(), ProcessId(0), ProcessId(1)))?;
//! system.add_flow(Flow::new("metal", dims.clone(), ProcessId(1), ProcessId(0)))?;
//! system.add_flow(Flow::new("rest", dims.clone(), ProcessId(1), ProcessId(0)))?;
//!
//! system.flow_mut("scrap")?.fill(10.0);
//! system.process_mut("sorting")?.set_share("metal", DimArray::scalar(0.5));
//! system.compute_process("sorting")?;
//!
//! assert_eq!(system.flow("rest")?.to_vec(), vec![5.0, 5.0]);
//! # Ok::<(), stockflow::MfaError>(())
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::array::{DimArray, Flow, Parameter};
use crate::config::Config;
use crate::dimensions::DimensionSet;
use crate::models::Stock;
use crate::solvers::{check_process_balance, ProcessSolver, ProcessState, SolveOutcome};
use crate::{MfaError, MfaResult};

/// Name of process 0, which stands for everything outside the system.
pub const SYSTEM_BOUNDARY: &str = "sysenv";

/// Index of a process in its system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcessId(pub usize);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A node of the system.
///
/// Flows are registered by the name of the process at their other end.
/// Shares are keyed by flow name and give the fraction of the process total a
/// flow carries.
#[derive(Debug, Clone, PartialEq)]
pub struct Process {
    id: ProcessId,
    name: String,
    inflows: BTreeMap<String, String>,
    outflows: BTreeMap<String, String>,
    shares: BTreeMap<String, DimArray>,
    dimension_splitter: Option<DimArray>,
    stock: Option<String>,
    state: ProcessState,
}

impl Process {
    pub fn new(id: ProcessId, name: &str) -> Self {
        Process {
            id,
            name: name.to_string(),
            inflows: BTreeMap::new(),
            outflows: BTreeMap::new(),
            shares: BTreeMap::new(),
            dimension_splitter: None,
            stock: None,
            state: ProcessState::Uninitialized,
        }
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_boundary(&self) -> bool {
        self.name == SYSTEM_BOUNDARY
    }

    /// Inflow names, keyed by the name of the process they come from.
    pub fn inflows(&self) -> &BTreeMap<String, String> {
        &self.inflows
    }

    /// Outflow names, keyed by the name of the process they go to.
    pub fn outflows(&self) -> &BTreeMap<String, String> {
        &self.outflows
    }

    pub fn inflow_names(&self) -> Vec<String> {
        self.inflows.values().cloned().collect()
    }

    pub fn outflow_names(&self) -> Vec<String> {
        self.outflows.values().cloned().collect()
    }

    pub fn add_inflow(&mut self, from_process: &str, flow: &str) {
        self.inflows.insert(from_process.to_string(), flow.to_string());
    }

    pub fn add_outflow(&mut self, to_process: &str, flow: &str) {
        self.outflows.insert(to_process.to_string(), flow.to_string());
    }

    /// Unregisters the inflow from `from_process` and returns its flow name.
    pub fn remove_inflow(&mut self, from_process: &str) -> MfaResult<String> {
        self.inflows.remove(from_process).ok_or_else(|| {
            MfaError::Definition(format!(
                "In process {}: no inflow from process '{}'",
                self.name, from_process
            ))
        })
    }

    /// Unregisters the outflow to `to_process` and returns its flow name.
    pub fn remove_outflow(&mut self, to_process: &str) -> MfaResult<String> {
        self.outflows.remove(to_process).ok_or_else(|| {
            MfaError::Definition(format!(
                "In process {}: no outflow to process '{}'",
                self.name, to_process
            ))
        })
    }

    pub fn set_share(&mut self, flow: &str, share: DimArray) {
        self.shares.insert(flow.to_string(), share);
    }

    pub fn remove_share(&mut self, flow: &str) -> Option<DimArray> {
        self.shares.remove(flow)
    }

    pub fn share(&self, flow: &str) -> Option<&DimArray> {
        self.shares.get(flow)
    }

    /// Splits the process total across dimensions it lacks; must sum to one
    /// over those dimensions.
    pub fn set_dimension_splitter(&mut self, splitter: DimArray) {
        self.dimension_splitter = Some(splitter);
    }

    pub fn dimension_splitter(&self) -> Option<&DimArray> {
        self.dimension_splitter.as_ref()
    }

    pub fn stock_name(&self) -> Option<&str> {
        self.stock.as_deref()
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn is_computed(&self) -> bool {
        self.state == ProcessState::Computed
    }

    pub(crate) fn set_stock(&mut self, stock: &str) {
        self.stock = Some(stock.to_string());
    }

    pub(crate) fn set_state(&mut self, state: ProcessState) {
        self.state = state;
    }
}

/// Checks consecutive ids from zero, unique names and the boundary at id 0.
pub(crate) fn validate_processes(processes: &[Process]) -> MfaResult<()> {
    for (i, process) in processes.iter().enumerate() {
        if process.id.0 != i {
            return Err(MfaError::Definition(format!(
                "Processes must have consecutive ids starting from 0, found id {} at position {}",
                process.id, i
            )));
        }
        if (i == 0) != process.is_boundary() {
            return Err(MfaError::Definition(format!(
                "The process with id 0 must be named '{}', and only that one; \
                 found '{}' with id {}",
                SYSTEM_BOUNDARY, process.name, process.id
            )));
        }
        if processes[..i].iter().any(|p| p.name == process.name) {
            return Err(MfaError::Definition(format!(
                "Process name '{}' is used twice",
                process.name
            )));
        }
    }
    if processes.is_empty() {
        return Err(MfaError::Definition(format!(
            "A system needs at least the '{}' process",
            SYSTEM_BOUNDARY
        )));
    }
    Ok(())
}

/// Registers a flow with its two endpoint processes.
pub(crate) fn link_flow(processes: &mut [Process], flow: &Flow) -> MfaResult<()> {
    let endpoint = |id: ProcessId| {
        processes.get(id.0).map(|p| p.name.clone()).ok_or_else(|| {
            MfaError::Definition(format!(
                "flow {} refers to unknown process id {}",
                flow.name(),
                id
            ))
        })
    };
    let from = endpoint(flow.from_id())?;
    let to = endpoint(flow.to_id())?;
    if processes[flow.to_id().0].inflows.contains_key(&from) {
        return Err(MfaError::Definition(format!("a flow from {} to {} already exists", from, to)));
    }
    processes[flow.from_id().0].add_outflow(&to, flow.name());
    processes[flow.to_id().0].add_inflow(&from, flow.name());
    Ok(())
}

/// Attaches a stock to its process, if it names one.
pub(crate) fn link_stock(processes: &mut [Process], stock: &Stock) -> MfaResult<()> {
    let Some(id) = stock.process_id() else {
        return Ok(());
    };
    let process = processes.get_mut(id.0).ok_or_else(|| {
        MfaError::Definition(format!("stock {} refers to unknown process id {}", stock.name(), id))
    })?;
    if let Some(existing) = process.stock_name() {
        return Err(MfaError::Definition(format!(
            "process {} already has stock {}, cannot add {}",
            process.name,
            existing,
            stock.name()
        )));
    }
    process.set_stock(stock.name());
    Ok(())
}

/// Model-specific computation on top of an [`MfaSystem`].
///
/// Implementors fill parameters and known flows, then call the solver
/// methods of the system in [`MfaCompute::compute`].
pub trait MfaCompute {
    fn system(&self) -> &MfaSystem;
    fn system_mut(&mut self) -> &mut MfaSystem;

    /// Computes all flows and stocks.
    fn compute(&mut self) -> MfaResult<()>;

    /// Runs [`MfaCompute::compute`] followed by the system-wide checks enabled
    /// in the configuration.
    fn run(&mut self) -> MfaResult<()> {
        self.compute()?;
        let system = self.system();
        if system.config.checks.mass_balance_processes {
            system.check_mass_balance()?;
        }
        if system.config.checks.flows {
            system.check_flows()?;
        }
        Ok(())
    }
}

/// Processes, flows, stocks and parameters of one model, with its configuration.
#[derive(Debug, Clone)]
pub struct MfaSystem {
    pub(crate) dims: DimensionSet,
    pub(crate) processes: Vec<Process>,
    pub(crate) flows: BTreeMap<String, Flow>,
    pub(crate) stocks: BTreeMap<String, Stock>,
    pub(crate) parameters: BTreeMap<String, Parameter>,
    pub config: Config,
}

impl MfaSystem {
    /// Creates a system without flows, stocks or parameters.
    ///
    /// # Errors
    ///
    /// Returns [`MfaError::Definition`] for invalid process ids or names, or
    /// an invalid configuration.
    pub fn new(dims: DimensionSet, processes: Vec<Process>, config: Config) -> MfaResult<Self> {
        validate_processes(&processes)?;
        config.validate()?;
        Ok(MfaSystem {
            dims,
            processes,
            flows: BTreeMap::new(),
            stocks: BTreeMap::new(),
            parameters: BTreeMap::new(),
            config,
        })
    }

    pub fn dims(&self) -> &DimensionSet {
        &self.dims
    }

    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    pub fn flows(&self) -> &BTreeMap<String, Flow> {
        &self.flows
    }

    pub fn stocks(&self) -> &BTreeMap<String, Stock> {
        &self.stocks
    }

    pub fn parameters(&self) -> &BTreeMap<String, Parameter> {
        &self.parameters
    }

    pub fn process_id(&self, name: &str) -> MfaResult<ProcessId> {
        self.processes
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.id)
            .ok_or_else(|| MfaError::Definition(format!("no process named {}", name)))
    }

    pub fn process(&self, name: &str) -> MfaResult<&Process> {
        let id = self.process_id(name)?;
        Ok(&self.processes[id.0])
    }

    pub fn process_mut(&mut self, name: &str) -> MfaResult<&mut Process> {
        let id = self.process_id(name)?;
        Ok(&mut self.processes[id.0])
    }

    pub fn process_by_id(&self, id: ProcessId) -> MfaResult<&Process> {
        self.processes
            .get(id.0)
            .ok_or_else(|| MfaError::Definition(format!("no process with id {}", id)))
    }

    pub fn flow(&self, name: &str) -> MfaResult<&Flow> {
        self.flows.get(name).ok_or_else(|| not_found("flow", name))
    }

    pub fn flow_mut(&mut self, name: &str) -> MfaResult<&mut Flow> {
        self.flows.get_mut(name).ok_or_else(|| not_found("flow", name))
    }

    pub fn stock(&self, name: &str) -> MfaResult<&Stock> {
        self.stocks.get(name).ok_or_else(|| not_found("stock", name))
    }

    pub fn stock_mut(&mut self, name: &str) -> MfaResult<&mut Stock> {
        self.stocks.get_mut(name).ok_or_else(|| not_found("stock", name))
    }

    pub fn parameter(&self, name: &str) -> MfaResult<&Parameter> {
        self.parameters.get(name).ok_or_else(|| not_found("parameter", name))
    }

    /// Assigns parameter values, summing surplus dimensions away.
    pub fn set_parameter(&mut self, name: &str, values: &DimArray) -> MfaResult<()> {
        self.parameters.get_mut(name).ok_or_else(|| not_found("parameter", name))?.set_from(values)
    }

    fn check_dims(&self, what: &str, dims: &DimensionSet) -> MfaResult<()> {
        self.dims.check_compatible(dims)?;
        if !dims.is_subset_of(&self.dims) {
            return Err(MfaError::DimensionMismatch(format!(
                "{} has dimensions {} that the system does not declare",
                what,
                (dims - &self.dims).describe()
            )));
        }
        Ok(())
    }

    /// Adds a flow and registers it with its endpoint processes.
    pub fn add_flow(&mut self, flow: Flow) -> MfaResult<()> {
        if self.flows.contains_key(flow.name()) {
            return Err(MfaError::Definition(format!("flow {} already exists", flow.name())));
        }
        self.check_dims(&format!("flow {}", flow.name()), flow.dims())?;
        link_flow(&mut self.processes, &flow)?;
        self.flows.insert(flow.name().to_string(), flow);
        Ok(())
    }

    /// Adds a stock and attaches it to its process.
    pub fn add_stock(&mut self, stock: Stock) -> MfaResult<()> {
        if self.stocks.contains_key(stock.name()) {
            return Err(MfaError::Definition(format!("stock {} already exists", stock.name())));
        }
        self.check_dims(&format!("stock {}", stock.name()), stock.dims())?;
        link_stock(&mut self.processes, &stock)?;
        self.stocks.insert(stock.name().to_string(), stock);
        Ok(())
    }

    pub fn add_parameter(&mut self, name: &str, parameter: Parameter) -> MfaResult<()> {
        if self.parameters.contains_key(name) {
            return Err(MfaError::Definition(format!("parameter {} already exists", name)));
        }
        self.check_dims(&format!("parameter {}", name), parameter.dims())?;
        self.parameters.insert(name.to_string(), parameter.with_name(name));
        Ok(())
    }

    /// Runs the process solver on one process and records the state it reached.
    ///
    /// Underdetermination is returned as an outcome, not an error.
    pub fn solve_process(&mut self, name: &str) -> MfaResult<SolveOutcome> {
        let id = self.process_id(name)?;
        let process = &self.processes[id.0];
        let stock = match process.stock_name() {
            Some(stock) => Some(self.stocks.get_mut(stock).ok_or_else(|| {
                MfaError::Definition(format!(
                    "stock {} of process {} does not exist",
                    stock, name
                ))
            })?),
            None => None,
        };
        let mut solver = ProcessSolver::new(process, &mut self.flows, stock, &self.config);
        let result = solver.solve();
        let state = solver.state();
        self.processes[id.0].set_state(state);
        debug!(process = %name, ?state, "process solved");
        result
    }

    /// Like [`MfaSystem::solve_process`], applying the `underdetermined`
    /// error behavior to an underdetermined outcome.
    pub fn compute_process(&mut self, name: &str) -> MfaResult<SolveOutcome> {
        let outcome = self.solve_process(name)?;
        if let SolveOutcome::Underdetermined(missing) = &outcome {
            let behavior = self.config.error_behaviors.underdetermined;
            behavior.handle(MfaError::Underdetermined(missing.clone()))?;
        }
        Ok(outcome)
    }

    /// Checks the mass balance of every process except the boundary, and of
    /// every computed stock.
    pub fn check_mass_balance(&self) -> MfaResult<()> {
        for process in &self.processes {
            let stock = process.stock_name().and_then(|s| self.stocks.get(s));
            check_process_balance(process, &self.flows, stock, &self.config)?;
        }
        for stock in self.stocks.values().filter(|s| s.is_computed()) {
            stock.check_mass_balance(&self.config)?;
        }
        Ok(())
    }

    /// Flags flows with NaN or negative values per the `check_flows` behavior.
    pub fn check_flows(&self) -> MfaResult<()> {
        for flow in self.flows.values() {
            let problem = if flow.values().iter().any(|v| v.is_nan()) {
                Some("NaN")
            } else {
                let tolerance = self.config.tolerance(flow.max_abs());
                flow.values().iter().any(|v| *v < -tolerance).then_some("negative")
            };
            if let Some(problem) = problem {
                self.config.error_behaviors.check_flows.handle(MfaError::InvalidFlow {
                    flow: flow.name().to_string(),
                    problem: problem.to_string(),
                })?;
            }
        }
        Ok(())
    }
}

fn not_found(what: &str, name: &str) -> MfaError {
    MfaError::Definition(format!("no {} named {}", what, name))
}
