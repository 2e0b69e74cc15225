//! Row-per-combination tabular form of a [`DimArray`].

use std::collections::HashMap;

use ndarray::Dimension as _;
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

use super::DimArray;
use crate::dimensions::{DimensionSet, Item};
use crate::{MfaError, MfaResult};

/// Name of the value column.
pub const VALUE_COLUMN: &str = "value";

/// Long-format table: one column per dimension name plus a value column.
///
/// Each row holds one item per dimension column, in column order, and a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<(Vec<Item>, f64)>,
}

impl Table {
    /// Dimension columns, without the value column.
    pub fn dimension_columns(&self) -> &[String] {
        match self.columns.last() {
            Some(last) if last == VALUE_COLUMN => &self.columns[..self.columns.len() - 1],
            _ => &self.columns,
        }
    }
}

impl DimArray {
    /// Flattens the array into one row per item combination.
    ///
    /// With `sparse`, rows with a zero value are left out.
    pub fn to_table(&self, sparse: bool) -> Table {
        let mut columns: Vec<String> = self.dims.names().iter().map(|n| n.to_string()).collect();
        columns.push(VALUE_COLUMN.to_string());
        let rows = self
            .values
            .indexed_iter()
            .filter(|(_, v)| !sparse || **v != 0.0)
            .map(|(index, v)| {
                let items = index
                    .slice()
                    .iter()
                    .zip(self.dims.iter())
                    .map(|(i, dim)| dim.items()[*i].clone())
                    .collect();
                (items, *v)
            })
            .collect();
        Table { columns, rows }
    }

    /// Builds a dense array from a table that covers every combination exactly once.
    ///
    /// Columns may come in any order and rows in any order.
    ///
    /// # Errors
    ///
    /// Returns [`MfaError::Table`] for missing or unknown columns, items that
    /// are not on their dimension, duplicate rows and missing combinations.
    pub fn from_table(dims: DimensionSet, table: &Table) -> MfaResult<DimArray> {
        build_from_table(dims, table, false)
    }

    /// Like [`DimArray::from_table`], but missing combinations become zero.
    pub fn from_sparse_table(dims: DimensionSet, table: &Table) -> MfaResult<DimArray> {
        build_from_table(dims, table, true)
    }
}

fn build_from_table(dims: DimensionSet, table: &Table, allow_missing: bool) -> MfaResult<DimArray> {
    let columns = table.dimension_columns();
    if columns.len() != dims.len() {
        return Err(MfaError::Table(format!(
            "expected columns for dimensions {:?}, got {:?}",
            dims.names(),
            columns
        )));
    }
    // axis of the dimension described by each column
    let axes = columns
        .iter()
        .map(|c| {
            dims.names()
                .iter()
                .position(|n| n == c)
                .ok_or_else(|| MfaError::Table(format!("column '{}' is not a dimension name", c)))
        })
        .collect::<MfaResult<Vec<_>>>()?;
    if (1..axes.len()).any(|i| axes[..i].contains(&axes[i])) {
        return Err(MfaError::Table(format!("repeated dimension column in {:?}", columns)));
    }

    let lookups: Vec<HashMap<&Item, usize>> = dims
        .iter()
        .map(|d| d.items().iter().enumerate().map(|(i, item)| (item, i)).collect())
        .collect();

    let shape = dims.shape();
    let mut values = ArrayD::<f64>::zeros(IxDyn(&shape));
    let mut filled = ArrayD::<bool>::from_elem(IxDyn(&shape), false);
    let mut index = vec![0; dims.len()];

    for (items, value) in &table.rows {
        if items.len() != axes.len() {
            return Err(MfaError::Table(format!(
                "row {:?} has {} items, expected {}",
                items,
                items.len(),
                axes.len()
            )));
        }
        for (item, &axis) in items.iter().zip(&axes) {
            index[axis] = *lookups[axis].get(item).ok_or_else(|| {
                MfaError::Table(format!(
                    "item {} is not in dimension '{}'",
                    item,
                    dims.dims()[axis].name()
                ))
            })?;
        }
        let slot = &mut filled[index.as_slice()];
        if *slot {
            return Err(MfaError::Table(format!("duplicate row for items {:?}", items)));
        }
        *slot = true;
        values[index.as_slice()] = *value;
    }

    if !allow_missing {
        let missing = filled.iter().filter(|f| !**f).count();
        if missing > 0 {
            return Err(MfaError::Table(format!(
                "{} item combinations are missing from the table",
                missing
            )));
        }
    }
    DimArray::from_array(dims, values)
}
