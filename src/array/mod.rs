//! Labeled multi-dimensional arrays.
//!
//! A [`DimArray`] is a dense `f64` buffer tagged with a [`DimensionSet`]. The
//! buffer's axis order is the order of the dimension set, and its shape always
//! matches `dims.shape()`.
//!
//! Arithmetic is dimension-aware (see [`ops`]):
//!
//! - `+`, `-`, `minimum`, `maximum` work on the **intersection** of the operand
//!   dimensions, summing away surplus axes
//! - `*` and `/` work on the **union**, broadcasting each operand across the
//!   axes it lacks
//!
//! # Example
//!
//! ```
//! use stockflow::{DimArray, Dimension, DimensionSet};
//!
//! let dims = DimensionSet::new(vec![
//!     Dimension::new("time", 't', [2020, 2021, 2022])?,
//!     Dimension::new("region", 'r', ["EU", "US"])?,
//! ])?;
//!
//! let flow = DimArray::from_vec(dims.clone(), vec![1.0, 3.0, 2.0, 2.0, 3.0, 1.0])?;
//! let shares = flow.shares_over(&['r'])?;
//! assert_eq!(shares.to_vec(), vec![0.25, 0.75, 0.5, 0.5, 0.75, 0.25]);
//!
//! let per_year = flow.sum_to(&['t'])?;
//! assert_eq!(per_year.to_vec(), vec![4.0, 4.0, 4.0]);
//! # Ok::<(), stockflow::MfaError>(())
//! ```

pub mod ops;
pub mod slicing;
pub mod table;

pub use slicing::{Index, Selection};
pub use table::Table;

use std::ops::{Deref, DerefMut};

use ndarray::{ArrayD, Axis, IxDyn, Zip};

use crate::dimensions::{Dimension, DimensionSet};
use crate::system::ProcessId;
use crate::{MfaError, MfaResult};

/// Dense numeric array tagged with a dimension set.
#[derive(Debug, Clone, PartialEq)]
pub struct DimArray {
    name: Option<String>,
    dims: DimensionSet,
    values: ArrayD<f64>,
    is_set: bool,
}

/// Values of a stock, inflow or outflow.
pub type StockArray = DimArray;

/// Read-only model input such as a share or a lifetime.
pub type Parameter = DimArray;

impl DimArray {
    /// Creates a zero-filled array that is not yet marked as set.
    pub fn zeros(dims: DimensionSet) -> Self {
        let values = ArrayD::zeros(IxDyn(&dims.shape()));
        DimArray { name: None, dims, values, is_set: false }
    }

    /// Creates an array with every element equal to `value`.
    pub fn full(dims: DimensionSet, value: f64) -> Self {
        let values = ArrayD::from_elem(IxDyn(&dims.shape()), value);
        DimArray { name: None, dims, values, is_set: true }
    }

    /// Creates a dimensionless array.
    pub fn scalar(value: f64) -> Self {
        DimArray::full(DimensionSet::empty(), value)
    }

    /// Creates an array from a row-major buffer.
    ///
    /// # Errors
    ///
    /// Returns [`MfaError::ShapeMismatch`] if the buffer length differs from the
    /// number of elements implied by `dims`.
    pub fn from_vec(dims: DimensionSet, values: Vec<f64>) -> MfaResult<Self> {
        let shape = dims.shape();
        if values.len() != dims.total_size() {
            return Err(MfaError::ShapeMismatch { expected: shape, got: vec![values.len()] });
        }
        let values = ArrayD::from_shape_vec(IxDyn(&shape), values).map_err(|_| {
            MfaError::ShapeMismatch { expected: dims.shape(), got: vec![dims.total_size()] }
        })?;
        Ok(DimArray { name: None, dims, values, is_set: true })
    }

    /// Wraps an existing buffer, validating its shape.
    pub fn from_array(dims: DimensionSet, values: ArrayD<f64>) -> MfaResult<Self> {
        if values.shape() != dims.shape().as_slice() {
            return Err(MfaError::ShapeMismatch {
                expected: dims.shape(),
                got: values.shape().to_vec(),
            });
        }
        Ok(DimArray { name: None, dims, values, is_set: true })
    }

    /// Builder-style name assignment.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name for log and error messages.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }

    pub fn dims(&self) -> &DimensionSet {
        &self.dims
    }

    pub fn values(&self) -> &ArrayD<f64> {
        &self.values
    }

    /// Mutable access to the buffer. Marks the array as set.
    pub fn values_mut(&mut self) -> &mut ArrayD<f64> {
        self.is_set = true;
        &mut self.values
    }

    /// Whether values were meaningfully assigned, as opposed to default zeros.
    pub fn is_set(&self) -> bool {
        self.is_set
    }

    pub fn mark_set(&mut self) {
        self.is_set = true;
    }

    pub fn mark_unset(&mut self) {
        self.is_set = false;
    }

    /// Element at a positional index, if in bounds.
    pub fn value(&self, index: &[usize]) -> Option<f64> {
        self.values.get(index).copied()
    }

    /// Values in row-major (logical) order.
    pub fn to_vec(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }

    /// Scalar assignment: every element becomes `value`.
    pub fn fill(&mut self, value: f64) {
        self.values.fill(value);
        self.is_set = true;
    }

    /// Replaces the buffer, validating its shape.
    pub fn set_values(&mut self, values: ArrayD<f64>) -> MfaResult<()> {
        if values.shape() != self.values.shape() {
            return Err(MfaError::ShapeMismatch {
                expected: self.dims.shape(),
                got: values.shape().to_vec(),
            });
        }
        self.values = values;
        self.is_set = true;
        Ok(())
    }

    /// Ellipsis assignment: `self[...] = other`.
    ///
    /// `other` is summed down onto the dimensions of `self`. The dimensions of
    /// `self` never change.
    ///
    /// # Errors
    ///
    /// Returns [`MfaError::DimensionMismatch`] if `other` lacks a dimension of `self`.
    pub fn set_from(&mut self, other: &DimArray) -> MfaResult<()> {
        if !self.dims.is_subset_of(&other.dims) {
            return Err(MfaError::DimensionMismatch(format!(
                "cannot assign {} with dims {} to {} with dims {}: missing dims {}",
                other.label(),
                other.dims.describe(),
                self.label(),
                self.dims.describe(),
                (&self.dims - &other.dims).describe()
            )));
        }
        self.values = other.summed_onto(&self.dims)?;
        self.is_set = true;
        Ok(())
    }

    /// Broadcasts the array to a superset of its dimensions.
    ///
    /// The result follows the axis order of `target`.
    ///
    /// # Errors
    ///
    /// Returns [`MfaError::DimensionMismatch`] if a current dimension is missing
    /// from `target` or has different items there.
    pub fn cast_to(&self, target: &DimensionSet) -> MfaResult<DimArray> {
        let values = self.cast_values(target)?;
        Ok(DimArray { name: self.name.clone(), dims: target.clone(), values, is_set: self.is_set })
    }

    /// Sums over every dimension not in `letters`, keeping the order of `letters`.
    ///
    /// # Errors
    ///
    /// Returns [`MfaError::UnknownDimension`] if a letter is not a dimension of the array.
    pub fn sum_to(&self, letters: &[char]) -> MfaResult<DimArray> {
        let target = self.dims.subset_letters(letters)?;
        let values = self.summed_onto(&target)?;
        Ok(DimArray { name: self.name.clone(), dims: target, values, is_set: self.is_set })
    }

    /// Sums over the dimensions in `letters`.
    pub fn sum_over(&self, letters: &[char]) -> MfaResult<DimArray> {
        let removed = self.dims.subset_letters(letters)?;
        let kept: Vec<char> = (&self.dims - &removed).letters();
        self.sum_to(&kept)
    }

    /// Sums onto an arbitrary subset of the dimensions, given as a set.
    pub fn sum_to_dims(&self, target: &DimensionSet) -> MfaResult<DimArray> {
        self.sum_to(&target.letters())
    }

    /// Divides by the sum over `letters`, giving per-item proportions.
    ///
    /// Zero sums produce NaN or infinite values.
    pub fn shares_over(&self, letters: &[char]) -> MfaResult<DimArray> {
        let totals = self.sum_over(letters)?;
        let mut shares = (self / &totals)?;
        shares.name = self.name.clone();
        Ok(shares)
    }

    /// Sum of all elements.
    pub fn sum_values(&self) -> f64 {
        self.values.sum()
    }

    /// Largest absolute element, ignoring NaN.
    pub fn max_abs(&self) -> f64 {
        self.values.iter().fold(0.0_f64, |acc, v| if v.abs() > acc { v.abs() } else { acc })
    }

    /// Applies `f` to every element.
    pub fn apply<F>(&self, f: F) -> DimArray
    where
        F: Fn(f64) -> f64,
    {
        DimArray {
            name: self.name.clone(),
            dims: self.dims.clone(),
            values: self.values.mapv(f),
            is_set: self.is_set,
        }
    }

    pub fn abs(&self) -> DimArray {
        self.apply(f64::abs)
    }

    /// Copy with a fresh name and the same values.
    pub fn copy_as(&self, name: &str) -> DimArray {
        self.clone().with_name(name)
    }

    /// Difference along the first axis, with the first slice taken against zero.
    ///
    /// For a stock over time this is the per-step stock change.
    pub fn diff_along_first_axis(&self) -> MfaResult<DimArray> {
        if self.dims.is_empty() {
            return Err(MfaError::DimensionMismatch(format!(
                "{} has no axis to difference along",
                self.label()
            )));
        }
        let mut values = self.values.clone();
        let n = values.len_of(Axis(0));
        for t in (1..n).rev() {
            let previous = self.values.index_axis(Axis(0), t - 1);
            let mut current = values.index_axis_mut(Axis(0), t);
            current -= &previous;
        }
        Ok(DimArray { name: self.name.clone(), dims: self.dims.clone(), values, is_set: true })
    }

    /// Stacks equally-dimensioned arrays along a new last dimension.
    ///
    /// `dimension` must have one item per array. Arrays whose dimensions are a
    /// permutation of the first array's are reordered to match it.
    pub fn stack(arrays: &[DimArray], dimension: Dimension) -> MfaResult<DimArray> {
        let first = arrays.first().ok_or_else(|| {
            MfaError::DimensionMismatch("cannot stack an empty list of arrays".to_string())
        })?;
        if dimension.len() != arrays.len() {
            return Err(MfaError::ShapeMismatch {
                expected: vec![dimension.len()],
                got: vec![arrays.len()],
            });
        }
        let mut parts = Vec::with_capacity(arrays.len());
        for array in arrays {
            if !array.dims.same_dims_as(&first.dims) {
                return Err(MfaError::DimensionMismatch(format!(
                    "cannot stack {} with dims {} onto dims {}",
                    array.label(),
                    array.dims.describe(),
                    first.dims.describe()
                )));
            }
            parts.push(array.cast_values(&first.dims)?);
        }
        let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
        let values = ndarray::stack(Axis(first.dims.len()), &views).map_err(|_| {
            MfaError::ShapeMismatch { expected: first.dims.shape(), got: parts[0].shape().to_vec() }
        })?;
        let dims = first.dims.expand_by(vec![dimension])?;
        Ok(DimArray { name: first.name.clone(), dims, values, is_set: true })
    }

    /// Element-wise minimum on the intersection of the dimensions.
    pub fn minimum(&self, other: &DimArray) -> MfaResult<DimArray> {
        self.combine_on_intersection(other, f64::min)
    }

    /// Element-wise maximum on the intersection of the dimensions.
    pub fn maximum(&self, other: &DimArray) -> MfaResult<DimArray> {
        self.combine_on_intersection(other, f64::max)
    }

    /// Sums away the axes not in `target` and reorders the rest like `target`.
    pub(crate) fn summed_onto(&self, target: &DimensionSet) -> MfaResult<ArrayD<f64>> {
        if !target.is_subset_of(&self.dims) {
            return Err(MfaError::DimensionMismatch(format!(
                "cannot sum {} with dims {} to dims {}",
                self.label(),
                self.dims.describe(),
                target.describe()
            )));
        }
        self.dims.check_compatible(target)?;
        let mut values = self.values.clone();
        for (axis, dim) in self.dims.iter().enumerate().rev() {
            if !target.contains_letter(dim.letter()) {
                values = values.sum_axis(Axis(axis));
            }
        }
        let kept: Vec<char> =
            self.dims.letters().into_iter().filter(|l| target.contains_letter(*l)).collect();
        let perm = axis_order(&kept, &target.letters());
        Ok(values.permuted_axes(perm).as_standard_layout().into_owned())
    }

    /// Broadcasts the buffer to `target`, a superset of the current dimensions.
    pub(crate) fn cast_values(&self, target: &DimensionSet) -> MfaResult<ArrayD<f64>> {
        if !self.dims.is_subset_of(target) {
            return Err(MfaError::DimensionMismatch(format!(
                "cannot cast {} with dims {} to dims {}: missing dims {}",
                self.label(),
                self.dims.describe(),
                target.describe(),
                (&self.dims - target).describe()
            )));
        }
        self.dims.check_compatible(target)?;
        let own = self.dims.letters();
        let ordered: Vec<char> =
            target.letters().into_iter().filter(|l| own.contains(l)).collect();
        let mut values = self.values.clone().permuted_axes(axis_order(&own, &ordered));
        for (axis, dim) in target.iter().enumerate() {
            if !self.dims.contains_letter(dim.letter()) {
                values = values.insert_axis(Axis(axis));
            }
        }
        let shape = target.shape();
        let cast = values
            .broadcast(shape.as_slice())
            .ok_or_else(|| MfaError::ShapeMismatch {
                expected: shape.clone(),
                got: values.shape().to_vec(),
            })?
            .as_standard_layout()
            .into_owned();
        Ok(cast)
    }

    /// Shared implementation of the intersection-based binary operations.
    pub(crate) fn combine_on_intersection<F>(&self, other: &DimArray, f: F) -> MfaResult<DimArray>
    where
        F: Fn(f64, f64) -> f64,
    {
        self.dims.check_compatible(&other.dims)?;
        let (dims, a, b) = if self.dims.is_empty() {
            (other.dims.clone(), self.cast_values(&other.dims)?, other.values.clone())
        } else if other.dims.is_empty() {
            (self.dims.clone(), self.values.clone(), other.cast_values(&self.dims)?)
        } else {
            let dims = &self.dims & &other.dims;
            if dims.is_empty() {
                return Err(MfaError::DimensionMismatch(format!(
                    "{} with dims {} and {} with dims {} share no dimension",
                    self.label(),
                    self.dims.describe(),
                    other.label(),
                    other.dims.describe()
                )));
            }
            let a = self.summed_onto(&dims)?;
            let b = other.summed_onto(&dims)?;
            (dims, a, b)
        };
        let values = Zip::from(&a).and(&b).map_collect(|x, y| f(*x, *y));
        Ok(DimArray { name: None, dims, values, is_set: true })
    }

    /// Shared implementation of the union-based binary operations.
    pub(crate) fn combine_on_union<F>(&self, other: &DimArray, f: F) -> MfaResult<DimArray>
    where
        F: Fn(f64, f64) -> f64,
    {
        self.dims.check_compatible(&other.dims)?;
        let dims = &self.dims | &other.dims;
        let a = self.cast_values(&dims)?;
        let b = other.cast_values(&dims)?;
        let values = Zip::from(&a).and(&b).map_collect(|x, y| f(*x, *y));
        Ok(DimArray { name: None, dims, values, is_set: true })
    }

    pub(crate) fn from_parts(dims: DimensionSet, values: ArrayD<f64>) -> Self {
        DimArray { name: None, dims, values, is_set: true }
    }
}

/// Permutation taking axes ordered as `from` to the order of `to`.
///
/// Both slices must hold the same letters.
fn axis_order(from: &[char], to: &[char]) -> Vec<usize> {
    to.iter().filter_map(|l| from.iter().position(|f| f == l)).collect()
}

/// A [`DimArray`] carried between two processes.
///
/// The endpoints are keys into the process arena of an
/// [`MfaSystem`](crate::MfaSystem).
#[derive(Debug, Clone, PartialEq)]
pub struct Flow {
    array: DimArray,
    from: ProcessId,
    to: ProcessId,
}

impl Flow {
    /// Creates an unset, zero-valued flow.
    pub fn new(name: &str, dims: DimensionSet, from: ProcessId, to: ProcessId) -> Self {
        Flow { array: DimArray::zeros(dims).with_name(name), from, to }
    }

    /// Name of the flow.
    pub fn name(&self) -> &str {
        self.array.label()
    }

    /// Source process.
    pub fn from_id(&self) -> ProcessId {
        self.from
    }

    /// Destination process.
    pub fn to_id(&self) -> ProcessId {
        self.to
    }

    pub fn array(&self) -> &DimArray {
        &self.array
    }

    pub fn array_mut(&mut self) -> &mut DimArray {
        &mut self.array
    }
}

impl Deref for Flow {
    type Target = DimArray;

    fn deref(&self) -> &DimArray {
        &self.array
    }
}

impl DerefMut for Flow {
    fn deref_mut(&mut self) -> &mut DimArray {
        &mut self.array
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn dims_tp() -> DimensionSet {
        DimensionSet::new(vec![
            Dimension::new("time", 't', [2000, 2001, 2002]).unwrap(),
            Dimension::new("product", 'p', ["a", "b"]).unwrap(),
        ])
        .unwrap()
    }

    fn x() -> DimArray {
        DimArray::from_vec(dims_tp(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap()
    }

    #[test]
    fn test_zeros_unset_full_set() {
        assert!(!DimArray::zeros(dims_tp()).is_set());
        assert!(DimArray::full(dims_tp(), 1.0).is_set());
    }

    #[test]
    fn test_shape_validated() {
        let err = DimArray::from_vec(dims_tp(), vec![1.0, 2.0]).unwrap_err();
        assert!(matches!(err, MfaError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_sum_to_and_over() {
        let a = x();
        assert_eq!(a.sum_to(&['t']).unwrap().to_vec(), vec![3.0, 7.0, 11.0]);
        assert_eq!(a.sum_over(&['t']).unwrap().to_vec(), vec![9.0, 12.0]);
        assert_eq!(a.sum_to(&['p', 't']).unwrap().to_vec(), vec![1.0, 3.0, 5.0, 2.0, 4.0, 6.0]);
        assert_eq!(a.sum_over(&['t', 'p']).unwrap().to_vec(), vec![21.0]);
        assert!(matches!(a.sum_to(&['x']), Err(MfaError::UnknownDimension(_))));
    }

    #[test]
    fn test_cast_to_superset() {
        let a = x().sum_to(&['p']).unwrap();
        let cast = a.cast_to(&dims_tp()).unwrap();
        assert_eq!(cast.to_vec(), vec![9.0, 12.0, 9.0, 12.0, 9.0, 12.0]);
        assert!(x().cast_to(a.dims()).is_err());
    }

    #[test]
    fn test_shares_over() {
        let shares = x().shares_over(&['p']).unwrap();
        assert_eq!(shares.dims(), &dims_tp());
        assert_relative_eq!(shares.value(&[0, 0]).unwrap(), 1.0 / 3.0);
        assert_relative_eq!(shares.value(&[2, 1]).unwrap(), 6.0 / 11.0);
        let zero_shares = DimArray::zeros(dims_tp()).shares_over(&['p']).unwrap();
        assert!(zero_shares.value(&[0, 0]).unwrap().is_nan());
    }

    #[test]
    fn test_set_from_sums_surplus_dims() {
        let mut per_year = DimArray::zeros(dims_tp().subset(&["t"]).unwrap());
        per_year.set_from(&x()).unwrap();
        assert_eq!(per_year.to_vec(), vec![3.0, 7.0, 11.0]);
        assert!(per_year.is_set());

        let mut full = DimArray::zeros(dims_tp());
        assert!(full.set_from(&per_year).is_err());
    }

    #[test]
    fn test_diff_along_first_axis() {
        let d = x().diff_along_first_axis().unwrap();
        assert_eq!(d.to_vec(), vec![1.0, 2.0, 2.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_stack() {
        let t = DimensionSet::new(vec![Dimension::new("time", 't', [1, 2]).unwrap()]).unwrap();
        let a = DimArray::from_vec(t.clone(), vec![1.0, 2.0]).unwrap();
        let b = DimArray::from_vec(t, vec![3.0, 4.0]).unwrap();
        let region = Dimension::new("region", 'r', ["north", "south"]).unwrap();
        let stacked = DimArray::stack(&[a, b], region).unwrap();
        assert_eq!(stacked.dims().letters(), vec!['t', 'r']);
        assert_eq!(stacked.to_vec(), vec![1.0, 3.0, 2.0, 4.0]);
    }

    #[test]
    fn test_flow_derefs_to_array() {
        let mut flow = Flow::new("a => b", dims_tp(), ProcessId(1), ProcessId(2));
        assert_eq!(flow.name(), "a => b");
        flow.fill(2.0);
        assert_eq!(flow.sum_values(), 12.0);
        assert_eq!(flow.from_id(), ProcessId(1));
    }
}
