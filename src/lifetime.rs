//! Lifetime distributions and survival-function tables.
//!
//! A [`LifetimeModel`] turns per-cohort lifetime parameters into two cohort
//! tables over the model dimensions, whose first dimension is time:
//!
//! - `sf[t, c, ...]`: fraction of the inflow of cohort `c` still in stock at
//!   time step `t`
//! - `pdf[t, c, ...]`: fraction of that inflow leaving during step `t`
//!
//! Both tables are zero above the diagonal (`t < c`). Time steps may be uneven;
//! their lengths follow the midpoint rule of [`TimeAxis`].
//!
//! # Example
//!
//! ```
//! use stockflow::{DimArray, Dimension, DimensionSet, LifetimeKind, LifetimeModel};
//!
//! let dims = DimensionSet::new(vec![Dimension::new("time", 't', [2000, 2001, 2002, 2003])?])?;
//! let mut model = LifetimeModel::new(LifetimeKind::Fixed, dims, 't')?;
//! model.set_mean(&DimArray::scalar(2.0))?;
//!
//! let sf = model.sf()?;
//! // the 2000 cohort is present at ages 0 and 1, gone at age 2
//! assert_eq!(sf[[0, 0].as_slice()], 1.0);
//! assert_eq!(sf[[1, 0].as_slice()], 1.0);
//! assert_eq!(sf[[2, 0].as_slice()], 0.0);
//! # Ok::<(), stockflow::MfaError>(())
//! ```

use std::f64::consts::SQRT_2;

use nalgebra::DMatrix;
use ndarray::{ArrayD, Axis};
use serde::{Deserialize, Serialize};

use crate::array::DimArray;
use crate::dimensions::{Dimension, DimensionSet};
use crate::solvers::cohort::join_cohort_cells;
use crate::{MfaError, MfaResult};

/// Time points with the length of the interval each one represents.
///
/// Interior intervals span the midpoints to both neighbours. The first and
/// last intervals mirror the distance to their only neighbour.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeAxis {
    points: Vec<f64>,
    interval_lengths: Vec<f64>,
}

impl TimeAxis {
    /// Creates a time axis from strictly increasing points.
    pub fn new(points: Vec<f64>) -> MfaResult<Self> {
        if points.is_empty() {
            return Err(MfaError::Definition("time axis must not be empty".to_string()));
        }
        if points.windows(2).any(|w| w[1] <= w[0]) {
            return Err(MfaError::Definition(format!(
                "time points must be strictly increasing, got {:?}",
                points
            )));
        }
        let n = points.len();
        let interval_lengths = if n == 1 {
            vec![1.0]
        } else {
            (0..n)
                .map(|i| match i {
                    0 => points[1] - points[0],
                    i if i == n - 1 => points[n - 1] - points[n - 2],
                    i => (points[i + 1] - points[i - 1]) / 2.0,
                })
                .collect()
        };
        Ok(TimeAxis { points, interval_lengths })
    }

    /// Creates a time axis from a dimension with integer items.
    pub fn from_dimension(dim: &Dimension) -> MfaResult<Self> {
        TimeAxis::new(dim.numeric_items()?)
    }

    pub fn points(&self) -> &[f64] {
        &self.points
    }

    pub fn interval_lengths(&self) -> &[f64] {
        &self.interval_lengths
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Converts annual rates (time on axis 0) into amounts per interval.
    pub fn to_whole_period(&self, annual: &ArrayD<f64>) -> ArrayD<f64> {
        let mut out = annual.clone();
        for (mut row, dt) in out.axis_iter_mut(Axis(0)).zip(&self.interval_lengths) {
            row *= *dt;
        }
        out
    }

    /// Converts amounts per interval (time on axis 0) back into annual rates.
    pub fn to_annual(&self, whole_period: &ArrayD<f64>) -> ArrayD<f64> {
        let mut out = whole_period.clone();
        for (mut row, dt) in out.axis_iter_mut(Axis(0)).zip(&self.interval_lengths) {
            row /= *dt;
        }
        out
    }
}

/// Where within its interval a cohort's inflow is assumed to arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InflowAnchor {
    Start,
    Middle,
    /// Age at observation equals the distance between time points
    #[default]
    End,
}

/// How the survival function is evaluated within a cohort's interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubIntervalPolicy {
    /// Inflow arrives at one point of its interval
    Anchor(InflowAnchor),
    /// Inflow is spread over `n_pts_per_interval` evenly spaced points and the
    /// survival function is averaged over them
    Quadrature { n_pts_per_interval: usize },
}

impl Default for SubIntervalPolicy {
    fn default() -> Self {
        SubIntervalPolicy::Anchor(InflowAnchor::End)
    }
}

impl SubIntervalPolicy {
    pub const MAX_POINTS_PER_INTERVAL: usize = 10;

    /// Extra age, as a fraction of the cohort's interval length, per evaluation point.
    fn age_offsets(&self) -> MfaResult<Vec<f64>> {
        match *self {
            SubIntervalPolicy::Anchor(InflowAnchor::Start) => Ok(vec![1.0]),
            SubIntervalPolicy::Anchor(InflowAnchor::Middle) => Ok(vec![0.5]),
            SubIntervalPolicy::Anchor(InflowAnchor::End) => Ok(vec![0.0]),
            SubIntervalPolicy::Quadrature { n_pts_per_interval: n } => {
                if n == 0 || n > Self::MAX_POINTS_PER_INTERVAL {
                    return Err(MfaError::InvalidParameter(format!(
                        "n_pts_per_interval must be between 1 and {}, got {}",
                        Self::MAX_POINTS_PER_INTERVAL,
                        n
                    )));
                }
                Ok((0..n).map(|k| (n as f64 - k as f64 - 0.5) / n as f64).collect())
            }
        }
    }
}

/// Lifetime distribution family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifetimeKind {
    /// Survives while age < mean
    Fixed,
    /// Normal distribution with mean and std
    Normal,
    /// Normal distribution with mean and std, folded at zero age
    FoldedNormal,
    /// Log-normal distribution, parameterised by its own mean and std
    LogNormal,
    /// Weibull distribution with shape and scale
    Weibull,
}

impl LifetimeKind {
    /// Names of the parameters this family needs.
    pub fn parameter_names(&self) -> &'static [&'static str] {
        match self {
            LifetimeKind::Fixed => &["mean"],
            LifetimeKind::Normal | LifetimeKind::FoldedNormal | LifetimeKind::LogNormal => {
                &["mean", "std"]
            }
            LifetimeKind::Weibull => &["shape", "scale"],
        }
    }

    /// Survival function at `age` for parameters `(a, b)`.
    ///
    /// `(a, b)` is `(mean, std)`, `(mean, _)` or `(shape, scale)` depending on
    /// the family.
    fn survival(&self, age: f64, a: f64, b: f64) -> f64 {
        let step = |mean: f64| if age < mean { 1.0 } else { 0.0 };
        let sf = match self {
            LifetimeKind::Fixed => step(a),
            LifetimeKind::Normal => {
                if b == 0.0 {
                    step(a)
                } else {
                    upper_tail((age - a) / b)
                }
            }
            LifetimeKind::FoldedNormal => {
                if b == 0.0 {
                    step(a)
                } else {
                    upper_tail((age - a) / b) + upper_tail((age + a) / b)
                }
            }
            LifetimeKind::LogNormal => {
                if a == 0.0 {
                    0.0
                } else if age <= 0.0 {
                    1.0
                } else if b == 0.0 {
                    step(a)
                } else {
                    let sigma_sq = (1.0 + (b * b) / (a * a)).ln();
                    let mu = a.ln() - sigma_sq / 2.0;
                    upper_tail((age.ln() - mu) / sigma_sq.sqrt())
                }
            }
            LifetimeKind::Weibull => {
                if b == 0.0 {
                    0.0
                } else if age <= 0.0 {
                    1.0
                } else {
                    (-(age / b).powf(a)).exp()
                }
            }
        };
        sf.clamp(0.0, 1.0)
    }
}

/// Standard normal survival function.
fn upper_tail(z: f64) -> f64 {
    0.5 * libm::erfc(z / SQRT_2)
}

/// Survival-function model over a dimension set whose first dimension is time.
///
/// Parameters are [`DimArray`]s of any subset of the model dimensions and are
/// cast up to the full model dimensions; along the time axis they are read
/// per cohort.
#[derive(Debug, Clone, PartialEq)]
pub struct LifetimeModel {
    kind: LifetimeKind,
    dims: DimensionSet,
    time: TimeAxis,
    policy: SubIntervalPolicy,
    mean: Option<ArrayD<f64>>,
    std: Option<ArrayD<f64>>,
    shape: Option<ArrayD<f64>>,
    scale: Option<ArrayD<f64>>,
}

impl LifetimeModel {
    /// Creates a model without parameters.
    ///
    /// # Errors
    ///
    /// Returns [`MfaError::Definition`] if `time_letter` is not the first
    /// dimension or its items are not strictly increasing integers.
    pub fn new(kind: LifetimeKind, dims: DimensionSet, time_letter: char) -> MfaResult<Self> {
        let first = dims.dims().first().ok_or_else(|| {
            MfaError::Definition("lifetime model needs at least a time dimension".to_string())
        })?;
        if first.letter() != time_letter {
            return Err(MfaError::Definition(format!(
                "time dimension '{}' must be the first dimension, found '{}'",
                time_letter,
                first.letter()
            )));
        }
        let time = TimeAxis::from_dimension(first)?;
        Ok(LifetimeModel {
            kind,
            dims,
            time,
            policy: SubIntervalPolicy::default(),
            mean: None,
            std: None,
            shape: None,
            scale: None,
        })
    }

    /// Sets the sub-interval policy.
    pub fn with_policy(mut self, policy: SubIntervalPolicy) -> MfaResult<Self> {
        policy.age_offsets()?;
        self.policy = policy;
        Ok(self)
    }

    pub fn kind(&self) -> LifetimeKind {
        self.kind
    }

    pub fn dims(&self) -> &DimensionSet {
        &self.dims
    }

    pub fn time_axis(&self) -> &TimeAxis {
        &self.time
    }

    pub fn policy(&self) -> SubIntervalPolicy {
        self.policy
    }

    pub fn set_mean(&mut self, mean: &DimArray) -> MfaResult<()> {
        self.mean = Some(self.cast_parameter("mean", mean)?);
        Ok(())
    }

    pub fn set_std(&mut self, std: &DimArray) -> MfaResult<()> {
        self.std = Some(self.cast_parameter("std", std)?);
        Ok(())
    }

    pub fn set_shape(&mut self, shape: &DimArray) -> MfaResult<()> {
        self.shape = Some(self.cast_parameter("shape", shape)?);
        Ok(())
    }

    pub fn set_scale(&mut self, scale: &DimArray) -> MfaResult<()> {
        self.scale = Some(self.cast_parameter("scale", scale)?);
        Ok(())
    }

    /// Builder-style parameter assignment by name (`mean`, `std`, `shape`, `scale`).
    pub fn with_parameter(mut self, name: &str, value: &DimArray) -> MfaResult<Self> {
        match name {
            "mean" => self.set_mean(value)?,
            "std" => self.set_std(value)?,
            "shape" => self.set_shape(value)?,
            "scale" => self.set_scale(value)?,
            other => {
                return Err(MfaError::InvalidParameter(format!(
                    "unknown lifetime parameter '{}'",
                    other
                )))
            }
        }
        Ok(self)
    }

    /// Checks that every parameter of the family is set.
    pub fn check_parameters_set(&self) -> MfaResult<()> {
        self.parameters().map(|_| ())
    }

    /// Survival table of shape `(n_t, n_t, *non_time_shape)`.
    pub fn sf(&self) -> MfaResult<ArrayD<f64>> {
        self.assemble(&self.survival_matrices()?)
    }

    /// Outflow probability table of shape `(n_t, n_t, *non_time_shape)`.
    pub fn pdf(&self) -> MfaResult<ArrayD<f64>> {
        let pdf: Vec<_> = self.survival_matrices()?.iter().map(pdf_from_sf).collect();
        self.assemble(&pdf)
    }

    /// Number of non-time cells, i.e. the product of the non-time shape.
    pub(crate) fn n_cells(&self) -> usize {
        self.dims.total_size() / self.time.len()
    }

    /// One lower-triangular `(t, c)` survival matrix per non-time cell.
    pub(crate) fn survival_matrices(&self) -> MfaResult<Vec<DMatrix<f64>>> {
        let (a, b) = self.parameters()?;
        let offsets = self.policy.age_offsets()?;
        let n_t = self.time.len();
        let n_cells = self.n_cells();
        let points = self.time.points();
        let dt = self.time.interval_lengths();

        let mut matrices = Vec::with_capacity(n_cells);
        for cell in 0..n_cells {
            let mut sf = DMatrix::zeros(n_t, n_t);
            for c in 0..n_t {
                let pa = a[c * n_cells + cell];
                let pb = b[c * n_cells + cell];
                for t in c..n_t {
                    let base_age = points[t] - points[c];
                    let total: f64 = offsets
                        .iter()
                        .map(|o| self.kind.survival(base_age + o * dt[c], pa, pb))
                        .sum();
                    sf[(t, c)] = total / offsets.len() as f64;
                }
            }
            matrices.push(sf);
        }
        Ok(matrices)
    }

    /// Flattened, validated parameter pair in `(cohort, cell)` order.
    fn parameters(&self) -> MfaResult<(Vec<f64>, Vec<f64>)> {
        let (first, second) = match self.kind {
            LifetimeKind::Fixed => (("mean", &self.mean), None),
            LifetimeKind::Normal | LifetimeKind::FoldedNormal | LifetimeKind::LogNormal => {
                (("mean", &self.mean), Some(("std", &self.std)))
            }
            LifetimeKind::Weibull => (("shape", &self.shape), Some(("scale", &self.scale))),
        };
        let a = self.flatten_parameter(first.0, first.1)?;
        let b = match second {
            Some((name, value)) => self.flatten_parameter(name, value)?,
            None => vec![0.0; a.len()],
        };
        Ok((a, b))
    }

    fn flatten_parameter(&self, name: &str, value: &Option<ArrayD<f64>>) -> MfaResult<Vec<f64>> {
        let value = value.as_ref().ok_or_else(|| {
            MfaError::ParameterNotSet(format!(
                "lifetime {} of {:?} model must be set before use",
                name, self.kind
            ))
        })?;
        if let Some(bad) = value.iter().find(|v| v.is_nan() || **v < 0.0) {
            return Err(MfaError::InvalidParameter(format!(
                "lifetime {} must be non-negative, got {}",
                name, bad
            )));
        }
        Ok(value.iter().copied().collect())
    }

    fn cast_parameter(&self, name: &str, value: &DimArray) -> MfaResult<ArrayD<f64>> {
        if !self.kind.parameter_names().contains(&name) {
            return Err(MfaError::InvalidParameter(format!(
                "{:?} lifetime model has no parameter '{}'",
                self.kind, name
            )));
        }
        value.cast_values(&self.dims)
    }

    fn assemble(&self, matrices: &[DMatrix<f64>]) -> MfaResult<ArrayD<f64>> {
        let non_time: Vec<usize> = self.dims.shape().into_iter().skip(1).collect();
        join_cohort_cells(matrices, &non_time)
    }
}

/// Outflow probabilities from survival fractions.
///
/// The diagonal is `1 - sf[c, c]`; below it, the drop in survival from the
/// previous step.
pub(crate) fn pdf_from_sf(sf: &DMatrix<f64>) -> DMatrix<f64> {
    let n = sf.nrows();
    let mut pdf = DMatrix::zeros(n, n);
    for c in 0..n {
        pdf[(c, c)] = 1.0 - sf[(c, c)];
        for t in (c + 1)..n {
            pdf[(t, c)] = sf[(t - 1, c)] - sf[(t, c)];
        }
    }
    pdf
}
