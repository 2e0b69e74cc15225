//! Operator overloads for [`DimArray`].
//!
//! Binary operations between two arrays return [`MfaResult`] because they can
//! fail on incompatible dimensions. Operations with a plain `f64` never fail.
//!
//! | Operation | Result dimensions |
//! |-----------|-------------------|
//! | `a + b`, `a - b` | `a.dims & b.dims` (surplus axes summed) |
//! | `a * b`, `a / b` | `a.dims \| b.dims` (missing axes broadcast) |
//! | `a.minimum(b)`, `a.maximum(b)` | `a.dims & b.dims` |
//!
//! A dimensionless array acts like a plain number and keeps the other
//! operand's dimensions.

use std::ops::{Add, Div, Mul, Neg, Sub};

use super::DimArray;
use crate::{MfaError, MfaResult};

impl Add for &DimArray {
    type Output = MfaResult<DimArray>;

    fn add(self, rhs: &DimArray) -> MfaResult<DimArray> {
        self.combine_on_intersection(rhs, |a, b| a + b)
    }
}

impl Sub for &DimArray {
    type Output = MfaResult<DimArray>;

    fn sub(self, rhs: &DimArray) -> MfaResult<DimArray> {
        self.combine_on_intersection(rhs, |a, b| a - b)
    }
}

impl Mul for &DimArray {
    type Output = MfaResult<DimArray>;

    fn mul(self, rhs: &DimArray) -> MfaResult<DimArray> {
        self.combine_on_union(rhs, |a, b| a * b)
    }
}

impl Div for &DimArray {
    type Output = MfaResult<DimArray>;

    fn div(self, rhs: &DimArray) -> MfaResult<DimArray> {
        self.combine_on_union(rhs, |a, b| a / b)
    }
}

impl Add<f64> for &DimArray {
    type Output = DimArray;

    fn add(self, rhs: f64) -> DimArray {
        self.apply(|v| v + rhs)
    }
}

impl Sub<f64> for &DimArray {
    type Output = DimArray;

    fn sub(self, rhs: f64) -> DimArray {
        self.apply(|v| v - rhs)
    }
}

impl Mul<f64> for &DimArray {
    type Output = DimArray;

    fn mul(self, rhs: f64) -> DimArray {
        self.apply(|v| v * rhs)
    }
}

impl Div<f64> for &DimArray {
    type Output = DimArray;

    fn div(self, rhs: f64) -> DimArray {
        self.apply(|v| v / rhs)
    }
}

impl Sub<&DimArray> for f64 {
    type Output = DimArray;

    fn sub(self, rhs: &DimArray) -> DimArray {
        rhs.apply(|v| self - v)
    }
}

impl Mul<&DimArray> for f64 {
    type Output = DimArray;

    fn mul(self, rhs: &DimArray) -> DimArray {
        rhs.apply(|v| self * v)
    }
}

impl Neg for &DimArray {
    type Output = DimArray;

    fn neg(self) -> DimArray {
        self.apply(|v| -v)
    }
}

/// Sums a list of arrays with intersection semantics.
///
/// Returns `None` for an empty list.
pub fn sum_all<'a, I>(arrays: I) -> MfaResult<Option<DimArray>>
where
    I: IntoIterator<Item = &'a DimArray>,
{
    let mut total: Option<DimArray> = None;
    for array in arrays {
        total = Some(match total {
            None => array.clone(),
            Some(acc) => (&acc + array)?,
        });
    }
    Ok(total)
}

/// Largest absolute element-wise deviation between `a` and `b`, after both are
/// summed onto their common dimensions.
pub fn max_deviation(a: &DimArray, b: &DimArray) -> MfaResult<f64> {
    let diff = (a - b)?;
    if diff.values().iter().any(|v| v.is_nan()) {
        return Err(MfaError::InvalidParameter(format!(
            "comparison of {} and {} produced NaN values",
            a.label(),
            b.label()
        )));
    }
    Ok(diff.max_abs())
}
