//! Item and sub-dimension indexing of [`DimArray`].
//!
//! A [`Selection`] maps dimension letters to either a single item, which drops
//! the axis, or a sub-dimension, which keeps the axis restricted to a subset of
//! items under a new letter. Entries are applied independently per axis, so
//! selecting two subsets of sizes 2 and 3 yields a 2 x 3 block, never a
//! paired-up fancy index.
//!
//! ```
//! use stockflow::{DimArray, Dimension, DimensionSet, Selection};
//!
//! let dims = DimensionSet::new(vec![
//!     Dimension::new("time", 't', [2020, 2021])?,
//!     Dimension::new("region", 'r', ["EU", "US", "CN"])?,
//! ])?;
//! let values = DimArray::from_vec(dims, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])?;
//!
//! let eu = values.get(&Selection::new().item('r', "EU"))?;
//! assert_eq!(eu.to_vec(), vec![1.0, 4.0]);
//!
//! let west = Dimension::new("western regions", 'w', ["EU", "US"])?;
//! let block = values.get(&Selection::new().subset('r', west))?;
//! assert_eq!(block.dims().letters(), vec!['t', 'w']);
//! assert_eq!(block.to_vec(), vec![1.0, 2.0, 4.0, 5.0]);
//! # Ok::<(), stockflow::MfaError>(())
//! ```

use ndarray::Dimension as _;
use ndarray::{ArrayD, Axis};

use super::DimArray;
use crate::dimensions::{Dimension, DimensionSet, Item};
use crate::{MfaError, MfaResult};

/// What to take along one axis.
#[derive(Debug, Clone, PartialEq)]
pub enum Index {
    /// A single item; the axis is dropped
    Item(Item),
    /// A subset of items under a new letter; the axis is kept
    Subset(Dimension),
}

/// Per-dimension indexing request, keyed by the letter of an existing axis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    entries: Vec<(char, Index)>,
}

impl Selection {
    pub fn new() -> Self {
        Selection::default()
    }

    /// Selects a single item along the axis `letter`.
    pub fn item<T: Into<Item>>(mut self, letter: char, item: T) -> Self {
        self.entries.push((letter, Index::Item(item.into())));
        self
    }

    /// Restricts the axis `letter` to the items of `subset`.
    pub fn subset(mut self, letter: char, subset: Dimension) -> Self {
        self.entries.push((letter, Index::Subset(subset)));
        self
    }

    pub fn entries(&self) -> &[(char, Index)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A selection resolved against concrete dimensions.
enum Pick {
    All,
    One(usize),
    Many(Vec<usize>),
}

struct Resolved {
    picks: Vec<Pick>,
    dims: DimensionSet,
}

impl DimArray {
    /// Reads the part of the array described by `selection`.
    ///
    /// # Errors
    ///
    /// Fails with [`MfaError::UnknownDimension`] for letters not on the array,
    /// [`MfaError::ItemNotFound`] for items not on their axis and
    /// [`MfaError::DimensionMismatch`] for invalid sub-dimensions.
    pub fn get(&self, selection: &Selection) -> MfaResult<DimArray> {
        let resolved = self.resolve(selection)?;
        let mut values: ArrayD<f64> = self.values.clone();
        for (axis, pick) in resolved.picks.iter().enumerate().rev() {
            match pick {
                Pick::All => {}
                Pick::One(i) => values = values.index_axis_move(Axis(axis), *i),
                Pick::Many(indices) => values = values.select(Axis(axis), indices),
            }
        }
        let mut out = DimArray::from_parts(resolved.dims, values);
        out.name = self.name.clone();
        out.is_set = self.is_set;
        Ok(out)
    }

    /// Reads the slice at a bare item, searching every dimension for it.
    ///
    /// # Errors
    ///
    /// Fails with [`MfaError::ItemNotFound`] if no dimension has the item and
    /// [`MfaError::AmbiguousItem`] if more than one does.
    pub fn get_item<T: Into<Item>>(&self, item: T) -> MfaResult<DimArray> {
        let item = item.into();
        let letters: Vec<char> = self
            .dims
            .iter()
            .filter(|d| d.position(&item).is_some())
            .map(Dimension::letter)
            .collect();
        match letters.as_slice() {
            [] => Err(MfaError::ItemNotFound {
                item: item.to_string(),
                context: format!("no dimension of {} contains it", self.label()),
            }),
            [letter] => self.get(&Selection::new().item(*letter, item)),
            _ => Err(MfaError::AmbiguousItem {
                item: item.to_string(),
                letters: letters.iter().collect(),
            }),
        }
    }

    /// Writes `value` into the selected part of the array.
    ///
    /// `value` is summed over its surplus dimensions and broadcast over the
    /// missing ones before writing.
    pub fn set(&mut self, selection: &Selection, value: &DimArray) -> MfaResult<()> {
        let resolved = self.resolve(selection)?;
        let fitted = value.fitted_to(&resolved.dims)?;
        for (target_index, v) in fitted.indexed_iter() {
            let target_index = target_index.slice();
            let mut full = Vec::with_capacity(resolved.picks.len());
            let mut next = 0;
            for pick in &resolved.picks {
                match pick {
                    Pick::All => {
                        full.push(target_index[next]);
                        next += 1;
                    }
                    Pick::One(i) => full.push(*i),
                    Pick::Many(indices) => {
                        full.push(indices[target_index[next]]);
                        next += 1;
                    }
                }
            }
            self.values[full.as_slice()] = *v;
        }
        self.is_set = true;
        Ok(())
    }

    /// Writes a scalar into the selected part of the array.
    pub fn fill_selection(&mut self, selection: &Selection, value: f64) -> MfaResult<()> {
        self.set(selection, &DimArray::scalar(value))
    }

    /// Sums surplus dimensions away, then broadcasts to `target`.
    fn fitted_to(&self, target: &DimensionSet) -> MfaResult<ArrayD<f64>> {
        let common = &self.dims & target;
        let reduced = DimArray::from_parts(common.clone(), self.summed_onto(&common)?);
        reduced.cast_values(target)
    }

    fn resolve(&self, selection: &Selection) -> MfaResult<Resolved> {
        let mut picks: Vec<Pick> = self.dims.iter().map(|_| Pick::All).collect();
        let mut subsets: Vec<Option<Dimension>> = self.dims.iter().map(|_| None).collect();

        for (letter, index) in selection.entries() {
            let axis = self.dims.position_of_letter(*letter).ok_or_else(|| {
                MfaError::UnknownDimension(format!(
                    "'{}' is not a letter of {} {}",
                    letter,
                    self.label(),
                    self.dims.describe()
                ))
            })?;
            if !matches!(picks[axis], Pick::All) {
                return Err(MfaError::DimensionMismatch(format!(
                    "dimension '{}' is selected more than once",
                    letter
                )));
            }
            let original = &self.dims.dims()[axis];
            match index {
                Index::Item(item) => {
                    let i = original.position(item).ok_or_else(|| MfaError::ItemNotFound {
                        item: item.to_string(),
                        context: format!("not an item of dimension '{}'", original.name()),
                    })?;
                    picks[axis] = Pick::One(i);
                }
                Index::Subset(subset) => {
                    if self.dims.contains_letter(subset.letter()) {
                        return Err(MfaError::DimensionMismatch(format!(
                            "subset '{}' must use a letter not already in {}, got '{}'",
                            subset.name(),
                            self.dims.describe(),
                            subset.letter()
                        )));
                    }
                    let indices = subset
                        .items()
                        .iter()
                        .map(|item| {
                            original.position(item).ok_or_else(|| MfaError::ItemNotFound {
                                item: item.to_string(),
                                context: format!(
                                    "subset '{}' is not contained in dimension '{}'",
                                    subset.name(),
                                    original.name()
                                ),
                            })
                        })
                        .collect::<MfaResult<Vec<_>>>()?;
                    picks[axis] = Pick::Many(indices);
                    subsets[axis] = Some(subset.clone());
                }
            }
        }

        let mut dims = Vec::new();
        for ((dim, pick), subset) in self.dims.iter().zip(&picks).zip(subsets) {
            match pick {
                Pick::All => dims.push(dim.clone()),
                Pick::One(_) => {}
                Pick::Many(_) => dims.extend(subset),
            }
        }
        Ok(Resolved { picks, dims: DimensionSet::new(dims)? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims() -> DimensionSet {
        DimensionSet::new(vec![
            Dimension::new("time", 't', [2020, 2021, 2022]).unwrap(),
            Dimension::new("region", 'r', ["EU", "US", "CN"]).unwrap(),
            Dimension::new("product", 'p', ["car", "bus"]).unwrap(),
        ])
        .unwrap()
    }

    fn array() -> DimArray {
        DimArray::from_vec(dims(), (0..18).map(f64::from).collect()).unwrap()
    }

    #[test]
    fn test_single_item_drops_axis() {
        let sel = array().get(&Selection::new().item('t', 2021).item('p', "bus")).unwrap();
        assert_eq!(sel.dims().letters(), vec!['r']);
        assert_eq!(sel.to_vec(), vec![7.0, 9.0, 11.0]);
    }

    #[test]
    fn test_multi_axis_subsets_apply_independently() {
        let years = Dimension::new("some years", 's', [2020, 2022]).unwrap();
        let regions = Dimension::new("some regions", 'x', ["US", "CN", "EU"]).unwrap();
        let sel = array().get(&Selection::new().subset('t', years).subset('r', regions)).unwrap();
        assert_eq!(sel.dims().letters(), vec!['s', 'x', 'p']);
        assert_eq!(sel.dims().shape(), vec![2, 3, 2]);
        assert_eq!(
            sel.to_vec(),
            vec![2.0, 3.0, 4.0, 5.0, 0.0, 1.0, 14.0, 15.0, 16.0, 17.0, 12.0, 13.0]
        );
    }

    #[test]
    fn test_subset_letter_must_be_new() {
        let years = Dimension::new("some years", 'r', [2020]).unwrap();
        assert!(matches!(
            array().get(&Selection::new().subset('t', years)),
            Err(MfaError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_subset_items_must_exist() {
        let years = Dimension::new("some years", 's', [2020, 1999]).unwrap();
        assert!(matches!(
            array().get(&Selection::new().subset('t', years)),
            Err(MfaError::ItemNotFound { .. })
        ));
    }

    #[test]
    fn test_get_item_lookup() {
        assert_eq!(array().get_item("US").unwrap().dims().letters(), vec!['t', 'p']);
        assert!(matches!(array().get_item("truck"), Err(MfaError::ItemNotFound { .. })));

        let ambiguous = DimensionSet::new(vec![
            Dimension::new("origin", 'o', ["EU", "US"]).unwrap(),
            Dimension::new("destination", 'd', ["EU", "US"]).unwrap(),
        ])
        .unwrap();
        let trade = DimArray::zeros(ambiguous);
        assert!(matches!(trade.get_item("EU"), Err(MfaError::AmbiguousItem { .. })));
    }

    #[test]
    fn test_set_with_subsets_writes_block() {
        let mut target = DimArray::zeros(dims());
        let years = Dimension::new("later years", 's', [2021, 2022]).unwrap();
        let regions = Dimension::new("west", 'w', ["EU", "US"]).unwrap();
        let selection = Selection::new().subset('t', years).subset('r', regions);
        target.fill_selection(&selection, 1.0).unwrap();
        assert_eq!(target.sum_values(), 8.0);
        assert_eq!(target.value(&[0, 0, 0]), Some(0.0));
        assert_eq!(target.value(&[1, 0, 1]), Some(1.0));
        assert_eq!(target.value(&[2, 2, 0]), Some(0.0));
        assert!(target.is_set());
    }

    #[test]
    fn test_set_item_broadcasts_value() {
        let mut target = DimArray::zeros(dims());
        let per_product = DimArray::from_vec(
            dims().subset(&["p"]).unwrap(),
            vec![3.0, 5.0],
        )
        .unwrap();
        target.set(&Selection::new().item('r', "CN"), &per_product).unwrap();
        let cn = target.get_item("CN").unwrap();
        assert_eq!(cn.to_vec(), vec![3.0, 5.0, 3.0, 5.0, 3.0, 5.0]);
        assert_eq!(target.sum_values(), 24.0);
    }
}
