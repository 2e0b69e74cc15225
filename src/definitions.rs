//! # Declarative System Definitions
//!
//! Serializable descriptions of the dimensions, processes, flows, stocks and
//! parameters of a system, and the factories turning them into empty model
//! objects. Flows, stocks and parameters refer to dimensions by letter and to
//! processes by name.
//!
//! # Example
//!
//! ```
//! use stockflow::definitions::MfaDefinition;
//! use stockflow::{Config, MfaSystem};
//!
//! let definition: MfaDefinition = serde_json::from_str(r#"{
//!     "dimensions": [{"name": "time", "letter": "t", "items": [2020, 2021]}],
//!     "processes": ["sysenv", "use"],
//!     "flows": [
//!         {"from_process_name": "sysenv", "to_process_name": "use", "dim_letters": ["t"]}
//!     ]
//! }"#).unwrap();
//!
//! let system = MfaSystem::from_definition(&definition, Config::default())?;
//! assert!(system.flow("sysenv => use").is_ok());
//! # Ok::<(), stockflow::MfaError>(())
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::array::{Flow, Parameter};
use crate::config::Config;
use crate::dimensions::{DType, Dimension, DimensionSet, Item};
use crate::lifetime::{LifetimeKind, LifetimeModel, SubIntervalPolicy};
use crate::models::{DynamicModel, ProportionalOutflowCorrection, Stock, StockKind};
use crate::system::{self, MfaSystem, Process, ProcessId};
use crate::{MfaError, MfaResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionDefinition {
    pub name: String,
    pub letter: char,
    #[serde(default)]
    pub dtype: Option<DType>,
    #[serde(default)]
    pub items: Vec<Item>,
}

impl DimensionDefinition {
    pub fn to_dimension(&self) -> MfaResult<Dimension> {
        let dim = Dimension::new(&self.name, self.letter, self.items.iter())?;
        match self.dtype {
            Some(dtype) => dim.with_dtype(dtype),
            None => Ok(dim),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDefinition {
    pub name: String,
    pub id: usize,
}

/// A process given by name alone takes its position as id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProcessEntry {
    Name(String),
    Definition(ProcessDefinition),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub from_process_name: String,
    pub to_process_name: String,
    pub dim_letters: Vec<char>,
    /// Replaces the default name `"<from> => <to>"`
    #[serde(default)]
    pub name_override: Option<String>,
}

impl FlowDefinition {
    pub fn name(&self) -> String {
        self.name_override
            .clone()
            .unwrap_or_else(|| format!("{} => {}", self.from_process_name, self.to_process_name))
    }
}

/// Stock kinds as named in definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockKindName {
    #[default]
    FlowDriven,
    InflowDriven,
    StockDriven,
    Flexible,
    InflowByCohortDriven,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockDefinition {
    pub name: String,
    pub dim_letters: Vec<char>,
    #[serde(default)]
    pub process_name: Option<String>,
    #[serde(default)]
    pub kind: StockKindName,
    /// Required for every kind except flow-driven
    #[serde(default)]
    pub lifetime_model: Option<LifetimeKind>,
    #[serde(default)]
    pub sub_interval_policy: SubIntervalPolicy,
    /// Turn negative inflows of stock-driven models into extra outflow
    #[serde(default)]
    pub correct_negative_inflow: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,
    pub dim_letters: Vec<char>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MfaDefinition {
    pub dimensions: Vec<DimensionDefinition>,
    pub processes: Vec<ProcessEntry>,
    #[serde(default)]
    pub flows: Vec<FlowDefinition>,
    #[serde(default)]
    pub stocks: Vec<StockDefinition>,
    #[serde(default)]
    pub parameters: Vec<ParameterDefinition>,
}

impl MfaDefinition {
    pub fn make_dims(&self) -> MfaResult<DimensionSet> {
        let dims = self
            .dimensions
            .iter()
            .map(DimensionDefinition::to_dimension)
            .collect::<MfaResult<Vec<_>>>()?;
        DimensionSet::new(dims)
    }
}

fn dims_for(dims: &DimensionSet, letters: &[char], owner: &str) -> MfaResult<DimensionSet> {
    if let Some(letter) = letters.iter().find(|l| !dims.contains_letter(**l)) {
        return Err(MfaError::Definition(format!(
            "{} uses dimension letter '{}' which is not declared",
            owner, letter
        )));
    }
    dims.subset_letters(letters)
}

/// Builds processes, checking consecutive ids from 0 and the boundary at id 0.
pub fn make_processes(entries: &[ProcessEntry]) -> MfaResult<Vec<Process>> {
    let processes: Vec<Process> = entries
        .iter()
        .enumerate()
        .map(|(position, entry)| match entry {
            ProcessEntry::Name(name) => Process::new(ProcessId(position), name),
            ProcessEntry::Definition(def) => Process::new(ProcessId(def.id), &def.name),
        })
        .collect();
    system::validate_processes(&processes)?;
    Ok(processes)
}

/// Builds zero-valued flows and registers them with their processes.
pub fn make_empty_flows(
    processes: &mut [Process],
    definitions: &[FlowDefinition],
    dims: &DimensionSet,
) -> MfaResult<BTreeMap<String, Flow>> {
    let mut flows = BTreeMap::new();
    for def in definitions {
        let name = def.name();
        let from = process_by_name(processes, &def.from_process_name, &name)?;
        let to = process_by_name(processes, &def.to_process_name, &name)?;
        if flows.contains_key(&name) {
            return Err(MfaError::Definition(format!("flow name '{}' is defined twice", name)));
        }
        let flow_dims = dims_for(dims, &def.dim_letters, &format!("flow '{}'", name))?;
        let flow = Flow::new(&name, flow_dims, from, to);
        system::link_flow(processes, &flow)?;
        flows.insert(name, flow);
    }
    Ok(flows)
}

/// Builds stocks with unset arrays and attaches them to their processes.
///
/// Lifetime parameters still have to be set on the returned stocks.
pub fn make_empty_stocks(
    processes: &mut [Process],
    definitions: &[StockDefinition],
    dims: &DimensionSet,
) -> MfaResult<BTreeMap<String, Stock>> {
    let mut stocks = BTreeMap::new();
    for def in definitions {
        if stocks.contains_key(&def.name) {
            return Err(MfaError::Definition(format!("stock name '{}' is defined twice", def.name)));
        }
        let stock_dims = dims_for(dims, &def.dim_letters, &format!("stock '{}'", def.name))?;
        let kind = stock_kind(def, &stock_dims)?;
        let mut stock = Stock::new(&def.name, stock_dims, kind)?;
        if let Some(process) = &def.process_name {
            stock.set_process(process_by_name(processes, process, &def.name)?);
        }
        system::link_stock(processes, &stock)?;
        stocks.insert(def.name.clone(), stock);
    }
    Ok(stocks)
}

pub fn make_empty_parameters(
    definitions: &[ParameterDefinition],
    dims: &DimensionSet,
) -> MfaResult<BTreeMap<String, Parameter>> {
    let mut parameters = BTreeMap::new();
    for def in definitions {
        let parameter_dims =
            dims_for(dims, &def.dim_letters, &format!("parameter '{}'", def.name))?;
        let parameter = Parameter::zeros(parameter_dims).with_name(&def.name);
        if parameters.insert(def.name.clone(), parameter).is_some() {
            return Err(MfaError::Definition(format!(
                "parameter name '{}' is defined twice",
                def.name
            )));
        }
    }
    Ok(parameters)
}

fn process_by_name(processes: &[Process], name: &str, referrer: &str) -> MfaResult<ProcessId> {
    processes
        .iter()
        .find(|p| p.name() == name)
        .map(Process::id)
        .ok_or_else(|| {
            MfaError::Definition(format!(
                "process '{}' referenced by '{}' is not defined",
                name, referrer
            ))
        })
}

fn stock_kind(def: &StockDefinition, dims: &DimensionSet) -> MfaResult<StockKind> {
    if def.kind == StockKindName::FlowDriven {
        return Ok(StockKind::FlowDriven);
    }
    let lifetime = def.lifetime_model.ok_or_else(|| {
        MfaError::Definition(format!(
            "stock '{}' of kind {:?} needs a lifetime model",
            def.name, def.kind
        ))
    })?;
    let time_letter = dims
        .dims()
        .first()
        .map(Dimension::letter)
        .ok_or_else(|| MfaError::Definition(format!("stock '{}' has no dimensions", def.name)))?;
    let lifetime = LifetimeModel::new(lifetime, dims.clone(), time_letter)?
        .with_policy(def.sub_interval_policy)?;
    let mut model = DynamicModel::new(lifetime);
    if def.correct_negative_inflow {
        model = model.with_correction(ProportionalOutflowCorrection);
    }
    Ok(match def.kind {
        StockKindName::FlowDriven => StockKind::FlowDriven,
        StockKindName::InflowDriven => StockKind::InflowDriven(model),
        StockKindName::StockDriven => StockKind::StockDriven(model),
        StockKindName::Flexible => StockKind::Flexible(model),
        StockKindName::InflowByCohortDriven => StockKind::InflowByCohortDriven(model),
    })
}

impl MfaSystem {
    /// Builds a system with empty flows, stocks and parameters from a definition.
    pub fn from_definition(definition: &MfaDefinition, config: Config) -> MfaResult<Self> {
        let dims = definition.make_dims()?;
        let mut processes = make_processes(&definition.processes)?;
        let flows = make_empty_flows(&mut processes, &definition.flows, &dims)?;
        let stocks = make_empty_stocks(&mut processes, &definition.stocks, &dims)?;
        let parameters = make_empty_parameters(&definition.parameters, &dims)?;

        let mut system = MfaSystem::new(dims, processes, config)?;
        system.flows = flows;
        system.stocks = stocks;
        system.parameters = parameters;
        Ok(system)
    }
}
