//! # Stockflow: Dimension-Aware Material Flow Analysis
//!
//! A material flow analysis (MFA) toolkit. Processes are connected by flows of
//! material, every flow carries a labeled multi-dimensional array (time,
//! region, material, product, ...), and stocks accumulate material over time
//! following lifetime distributions.
//!
//! The crate is organised in layers:
//!
//! - [`dimensions`]: named, lettered axes and their set algebra
//! - [`array`]: labeled arrays with intersection/union arithmetic, casting and
//!   partial indexing
//! - [`lifetime`]: survival-function tables for several lifetime distributions
//! - [`models`]: flow-driven and dynamic stock models
//! - [`solvers`]: the process mass-balance solver, recursive graph computation
//!   and the cohort engine behind the dynamic stock models
//! - [`system`]: processes, flows and the `MfaSystem` orchestrator
//! - [`config`] and [`definitions`]: tolerances, error policies and the
//!   declarative schema used to build a system
//!
//! ## Example
//!
//! ```
//! use stockflow::{DimArray, Dimension, DimensionSet};
//!
//! let dims = DimensionSet::new(vec![
//!     Dimension::new("time", 't', [2020, 2021])?,
//!     Dimension::new("product", 'p', ["cars", "buildings"])?,
//! ])?;
//!
//! let flow = DimArray::full(dims.clone(), 2.0);
//! let share = DimArray::from_vec(dims.subset(&["p"])?, vec![0.25, 0.75])?;
//!
//! // Multiplication keeps the union of dimensions...
//! let split = (&flow * &share)?;
//! assert_eq!(split.dims().letters(), vec!['t', 'p']);
//!
//! // ...addition keeps the intersection.
//! let total = (&split + &share)?;
//! assert_eq!(total.dims().letters(), vec!['p']);
//! # Ok::<(), stockflow::MfaError>(())
//! ```

pub mod array;
pub mod config;
pub mod definitions;
pub mod dimensions;
pub mod lifetime;
pub mod models;
pub mod solvers;
pub mod system;

pub use array::{DimArray, Flow, Index, Parameter, Selection, StockArray, Table};
pub use config::{Checks, Config, ErrorBehavior, ErrorBehaviors};
pub use dimensions::{DType, Dimension, DimensionSet, Item};
pub use lifetime::{InflowAnchor, LifetimeKind, LifetimeModel, SubIntervalPolicy, TimeAxis};
pub use models::{
    AllowNegativeInflow, DynamicModel, InitialStock, NegativeInflowCorrection,
    ProportionalOutflowCorrection, Stock, StockKind,
};
pub use solvers::{ProcessState, SolveOutcome, Underdetermination};
pub use system::{MfaCompute, MfaSystem, Process, ProcessId, SYSTEM_BOUNDARY};

/// Result type for all fallible model operations.
pub type MfaResult<T> = Result<T, MfaError>;

/// Errors raised by the array algebra, the stock models and the process solver.
///
/// Definition, dimension and parameter errors are always fatal. Underdetermined
/// processes and consistency violations (mass balance, shares, splitter sums)
/// are routed through [`ErrorBehavior`] by the caller and only surface here
/// when the configured behaviour is [`ErrorBehavior::Error`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MfaError {
    /// Invalid schema: bad letters, duplicates, ids, boundary naming
    #[error("Invalid definition: {0}")]
    Definition(String),
    /// Operation requires a dimension that is absent or incompatible
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),
    /// Requested dimension does not exist
    #[error("Unknown dimension: {0}")]
    UnknownDimension(String),
    /// Item lookup failed
    #[error("Item {item} not found: {context}")]
    ItemNotFound {
        item: String,
        context: String,
    },
    /// Item lookup matched more than one dimension
    #[error("Item {item} is ambiguous, found in dimensions {letters}")]
    AmbiguousItem {
        item: String,
        letters: String,
    },
    /// Buffer shape does not match the dimension set
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    /// A value needed for computation was never assigned
    #[error("Parameter not set: {0}")]
    ParameterNotSet(String),
    /// A parameter value is out of its admissible range
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    /// Tabular data cannot be converted to a dense array
    #[error("Invalid table: {0}")]
    Table(String),
    /// Process cannot be determined from the available information
    #[error("{0}")]
    Underdetermined(Underdetermination),
    /// Mass balance violated beyond tolerance
    #[error(
        "In {context}: mass balance check failed \
         (error = {error:.6e}, tolerance = {tolerance:.6e})"
    )]
    MassBalance {
        context: String,
        error: f64,
        tolerance: f64,
    },
    /// A flow does not realise its declared share of the process total
    #[error(
        "In process {process}: flow {flow} does not match its share \
         (error = {error:.6e}, tolerance = {tolerance:.6e}){hint}"
    )]
    ShareViolation {
        process: String,
        flow: String,
        error: f64,
        tolerance: f64,
        hint: String,
    },
    /// Dimension splitter does not sum to one over the dimensions it adds
    #[error(
        "In process {process}: dimension splitter does not sum to 1 \
         (error = {error:.6e}, tolerance = {tolerance:.6e})"
    )]
    SplitterSum {
        process: String,
        error: f64,
        tolerance: f64,
    },
    /// Dimension splitter configured but not needed
    #[error("In process {process}: dimension splitter is set but not needed")]
    UnusedSplitter { process: String },
    /// Negative or NaN flow values
    #[error("Flow {flow} contains {problem} values")]
    InvalidFlow {
        flow: String,
        problem: String,
    },
}
