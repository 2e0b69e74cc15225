//! Named, lettered dimensions and ordered dimension sets.
//!
//! A [`Dimension`] is an axis such as time or region: a name, a single-letter
//! identifier and an ordered list of unique items. A [`DimensionSet`] is the
//! ordered collection of dimensions an array is defined on, and its order is
//! the storage axis order of that array.
//!
//! # Example
//!
//! ```
//! use stockflow::{Dimension, DimensionSet};
//!
//! let dims = DimensionSet::new(vec![
//!     Dimension::new("time", 't', [1990, 2000, 2010])?,
//!     Dimension::new("place", 'p', ["World"])?,
//! ])?;
//!
//! assert_eq!(dims.shape(), vec![3, 1]);
//! assert_eq!(dims.index("place")?, 1);
//! assert_eq!(dims.index("t")?, 0);
//! # Ok::<(), stockflow::MfaError>(())
//! ```

use std::collections::HashSet;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitXor, Sub};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{MfaError, MfaResult};

/// A single item along a dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Item {
    /// Integer item, e.g. a year
    Int(i64),
    /// Text item, e.g. a region or product name
    Text(String),
}

impl Item {
    /// Numeric value of the item, if it is an integer.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Item::Int(v) => Some(*v as f64),
            Item::Text(_) => None,
        }
    }

    /// Type tag of this item.
    pub fn dtype(&self) -> DType {
        match self {
            Item::Int(_) => DType::Int,
            Item::Text(_) => DType::Text,
        }
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Item::Int(v) => write!(f, "{}", v),
            Item::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Item {
    fn from(v: i64) -> Self {
        Item::Int(v)
    }
}

impl From<i32> for Item {
    fn from(v: i32) -> Self {
        Item::Int(v as i64)
    }
}

impl From<&str> for Item {
    fn from(v: &str) -> Self {
        Item::Text(v.to_string())
    }
}

impl From<String> for Item {
    fn from(v: String) -> Self {
        Item::Text(v)
    }
}

impl From<&Item> for Item {
    fn from(v: &Item) -> Self {
        v.clone()
    }
}

/// Type tag of the items of a dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// Integer items
    Int,
    /// Text items
    Text,
}

/// One axis of a labeled array.
///
/// Dimensions are immutable once built. Items are stored behind an `Arc`, so
/// cloning a dimension (and therefore a [`DimensionSet`]) is cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    name: String,
    letter: char,
    items: Arc<Vec<Item>>,
    dtype: Option<DType>,
}

impl Dimension {
    /// Creates a dimension, checking that the items are unique.
    ///
    /// # Errors
    ///
    /// Returns [`MfaError::Definition`] if an item is repeated or the name is empty.
    pub fn new<I, T>(name: &str, letter: char, items: I) -> MfaResult<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<Item>,
    {
        if name.is_empty() {
            return Err(MfaError::Definition("Dimension name must not be empty".to_string()));
        }
        let items: Vec<Item> = items.into_iter().map(Into::into).collect();
        let mut seen = HashSet::new();
        for item in &items {
            if !seen.insert(item) {
                return Err(MfaError::Definition(format!(
                    "Dimension '{}' contains item {} more than once",
                    name, item
                )));
            }
        }
        Ok(Dimension { name: name.to_string(), letter, items: Arc::new(items), dtype: None })
    }

    /// Attaches a type tag, checking that all items conform to it.
    pub fn with_dtype(mut self, dtype: DType) -> MfaResult<Self> {
        if let Some(item) = self.items.iter().find(|item| item.dtype() != dtype) {
            return Err(MfaError::Definition(format!(
                "Dimension '{}' has dtype {:?} but contains item {}",
                self.name, dtype, item
            )));
        }
        self.dtype = Some(dtype);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn letter(&self) -> char {
        self.letter
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn dtype(&self) -> Option<DType> {
        self.dtype
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Position of an item along this dimension.
    pub fn position(&self, item: &Item) -> Option<usize> {
        self.items.iter().position(|i| i == item)
    }

    /// Whether every item of `self` is also an item of `other`.
    pub fn is_subset_of(&self, other: &Dimension) -> bool {
        self.items.iter().all(|item| other.position(item).is_some())
    }

    /// Numeric item values, for time-like dimensions.
    pub fn numeric_items(&self) -> MfaResult<Vec<f64>> {
        self.items
            .iter()
            .map(|item| {
                item.as_f64().ok_or_else(|| {
                    MfaError::Definition(format!(
                        "Dimension '{}' must have numeric items, found {}",
                        self.name, item
                    ))
                })
            })
            .collect()
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {} items)", self.name, self.letter, self.items.len())
    }
}

/// Ordered collection of dimensions with unique letters and names.
///
/// Two sets are equal if they hold the same dimensions in the same order.
/// The set operators `&`, `|`, `-` and `^` compare dimensions by letter and
/// keep the order of the left operand.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DimensionSet {
    dims: Vec<Dimension>,
}

impl DimensionSet {
    /// Creates a dimension set, rejecting repeated letters or names.
    pub fn new(dims: Vec<Dimension>) -> MfaResult<Self> {
        let mut letters = HashSet::new();
        let mut names = HashSet::new();
        for dim in &dims {
            if !letters.insert(dim.letter) {
                return Err(MfaError::Definition(format!(
                    "Dimension letter '{}' is used more than once",
                    dim.letter
                )));
            }
            if !names.insert(dim.name.as_str()) {
                return Err(MfaError::Definition(format!(
                    "Dimension name '{}' is used more than once",
                    dim.name
                )));
            }
        }
        Ok(DimensionSet { dims })
    }

    /// The empty set, used for scalars.
    pub fn empty() -> Self {
        DimensionSet { dims: Vec::new() }
    }

    pub fn dims(&self) -> &[Dimension] {
        &self.dims
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Dimension> {
        self.dims.iter()
    }

    /// Number of dimensions.
    pub fn len(&self) -> usize {
        self.dims.len()
    }

    /// Number of dimensions (array rank).
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    pub fn letters(&self) -> Vec<char> {
        self.dims.iter().map(|d| d.letter).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.dims.iter().map(|d| d.name.as_str()).collect()
    }

    /// Per-dimension item counts.
    pub fn shape(&self) -> Vec<usize> {
        self.dims.iter().map(|d| d.len()).collect()
    }

    /// Total number of elements of an array on these dimensions.
    pub fn total_size(&self) -> usize {
        self.dims.iter().map(|d| d.len()).product()
    }

    /// Position of a dimension given by letter or by name.
    pub fn position(&self, key: &str) -> Option<usize> {
        let mut chars = key.chars();
        if let (Some(letter), None) = (chars.next(), chars.next()) {
            if let Some(pos) = self.position_of_letter(letter) {
                return Some(pos);
            }
        }
        self.dims.iter().position(|d| d.name == key)
    }

    pub fn position_of_letter(&self, letter: char) -> Option<usize> {
        self.dims.iter().position(|d| d.letter == letter)
    }

    pub fn contains_letter(&self, letter: char) -> bool {
        self.position_of_letter(letter).is_some()
    }

    /// Position of a dimension given by letter or by name.
    ///
    /// # Errors
    ///
    /// Returns [`MfaError::UnknownDimension`] if no dimension matches.
    pub fn index(&self, key: &str) -> MfaResult<usize> {
        self.position(key).ok_or_else(|| self.unknown(key))
    }

    /// Dimension given by letter or by name.
    pub fn get(&self, key: &str) -> MfaResult<&Dimension> {
        self.index(key).map(|i| &self.dims[i])
    }

    pub fn by_letter(&self, letter: char) -> Option<&Dimension> {
        self.dims.iter().find(|d| d.letter == letter)
    }

    /// Number of items of a dimension given by letter or by name.
    pub fn size(&self, key: &str) -> MfaResult<usize> {
        self.get(key).map(Dimension::len)
    }

    /// Subset in the order of `keys`, each given by letter or by name.
    pub fn subset(&self, keys: &[&str]) -> MfaResult<Self> {
        let dims = keys.iter().map(|k| self.get(k).cloned()).collect::<MfaResult<Vec<_>>>()?;
        DimensionSet::new(dims)
    }

    /// Subset in the order of `letters`.
    pub fn subset_letters(&self, letters: &[char]) -> MfaResult<Self> {
        let dims = letters
            .iter()
            .map(|l| {
                self.by_letter(*l).cloned().ok_or_else(|| self.unknown(&l.to_string()))
            })
            .collect::<MfaResult<Vec<_>>>()?;
        DimensionSet::new(dims)
    }

    /// Copy without the dimension given by letter or by name.
    pub fn drop(&self, key: &str) -> MfaResult<Self> {
        let pos = self.index(key)?;
        let mut dims = self.dims.clone();
        dims.remove(pos);
        Ok(DimensionSet { dims })
    }

    /// Copy with one dimension swapped for another at the same position.
    pub fn replace(&self, key: &str, new: Dimension) -> MfaResult<Self> {
        let pos = self.index(key)?;
        let mut dims = self.dims.clone();
        dims[pos] = new;
        DimensionSet::new(dims)
    }

    /// Copy with further dimensions appended.
    pub fn expand_by(&self, added: Vec<Dimension>) -> MfaResult<Self> {
        let mut dims = self.dims.clone();
        dims.extend(added);
        DimensionSet::new(dims)
    }

    /// Dimensions present in both sets, in the order of `self`.
    pub fn intersect_with(&self, other: &DimensionSet) -> DimensionSet {
        let dims =
            self.dims.iter().filter(|d| other.contains_letter(d.letter)).cloned().collect();
        DimensionSet { dims }
    }

    /// Dimensions of `self` followed by those only in `other`.
    pub fn union_with(&self, other: &DimensionSet) -> DimensionSet {
        let mut dims = self.dims.clone();
        dims.extend(other.dims.iter().filter(|d| !self.contains_letter(d.letter)).cloned());
        DimensionSet { dims }
    }

    /// Dimensions of `self` not in `other`.
    pub fn difference_with(&self, other: &DimensionSet) -> DimensionSet {
        let dims =
            self.dims.iter().filter(|d| !other.contains_letter(d.letter)).cloned().collect();
        DimensionSet { dims }
    }

    /// Dimensions in exactly one of the two sets.
    pub fn symmetric_difference_with(&self, other: &DimensionSet) -> DimensionSet {
        self.difference_with(other).union_with(&other.difference_with(self))
    }

    /// Whether every letter of `self` occurs in `other`.
    pub fn is_subset_of(&self, other: &DimensionSet) -> bool {
        self.dims.iter().all(|d| other.contains_letter(d.letter))
    }

    /// Equality ignoring order.
    pub fn same_dims_as(&self, other: &DimensionSet) -> bool {
        self.len() == other.len()
            && self.dims.iter().all(|d| other.by_letter(d.letter).is_some_and(|o| o == d))
    }

    /// Checks that dimensions sharing a letter are identical.
    pub fn check_compatible(&self, other: &DimensionSet) -> MfaResult<()> {
        for dim in &self.dims {
            if let Some(o) = other.by_letter(dim.letter) {
                if o != dim {
                    return Err(MfaError::DimensionMismatch(format!(
                        "Dimension '{}' ({}) differs between operands \
                         ('{}' with {} items vs '{}' with {} items)",
                        dim.name,
                        dim.letter,
                        dim.name,
                        dim.len(),
                        o.name,
                        o.len()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Names of the dimensions, joined for messages.
    pub fn describe(&self) -> String {
        let letters: String = self.dims.iter().map(|d| d.letter).collect();
        format!("({})", letters)
    }

    fn unknown(&self, key: &str) -> MfaError {
        MfaError::UnknownDimension(format!(
            "'{}' is not a letter or name in {}",
            key,
            self.describe()
        ))
    }
}

impl<'a> IntoIterator for &'a DimensionSet {
    type Item = &'a Dimension;
    type IntoIter = std::slice::Iter<'a, Dimension>;

    fn into_iter(self) -> Self::IntoIter {
        self.dims.iter()
    }
}

impl BitAnd for &DimensionSet {
    type Output = DimensionSet;

    fn bitand(self, rhs: Self) -> DimensionSet {
        self.intersect_with(rhs)
    }
}

impl BitOr for &DimensionSet {
    type Output = DimensionSet;

    fn bitor(self, rhs: Self) -> DimensionSet {
        self.union_with(rhs)
    }
}

impl Sub for &DimensionSet {
    type Output = DimensionSet;

    fn sub(self, rhs: Self) -> DimensionSet {
        self.difference_with(rhs)
    }
}

impl BitXor for &DimensionSet {
    type Output = DimensionSet;

    fn bitxor(self, rhs: Self) -> DimensionSet {
        self.symmetric_difference_with(rhs)
    }
}
