//! Row-key schema and key-space regions.
//!
//! A table's key space has one dimension per row-key field. A [`Range`] is a
//! half-open interval `[min, max)` over one dimension, where a missing `max`
//! means unbounded. A [`Region`] is one range per dimension.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Type of a row-key field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RowKeyType {
    /// Signed 64-bit integer.
    Long,
    /// UTF-8 string, ordered bytewise.
    String,
    /// Raw bytes, ordered lexicographically.
    Bytes,
}

impl RowKeyType {
    /// Returns the smallest value of this type, the lower bound of the key space.
    #[must_use]
    pub fn min_value(self) -> KeyValue {
        match self {
            Self::Long => KeyValue::Long(i64::MIN),
            Self::String => KeyValue::String(String::new()),
            Self::Bytes => KeyValue::Bytes(Vec::new()),
        }
    }

    /// Returns true if `value` is of this type.
    #[must_use]
    pub fn accepts(self, value: &KeyValue) -> bool {
        matches!(
            (self, value),
            (Self::Long, KeyValue::Long(_))
                | (Self::String, KeyValue::String(_))
                | (Self::Bytes, KeyValue::Bytes(_))
        )
    }
}

/// A single row-key value.
///
/// Values of the same type are totally ordered. Comparing values of different
/// types is meaningless; ranges never mix types.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "value")]
pub enum KeyValue {
    /// Integer key.
    Long(i64),
    /// String key.
    String(String),
    /// Bytes key.
    Bytes(Vec<u8>),
}

impl KeyValue {
    /// Returns the type of this value.
    #[must_use]
    pub const fn key_type(&self) -> RowKeyType {
        match self {
            Self::Long(_) => RowKeyType::Long,
            Self::String(_) => RowKeyType::String,
            Self::Bytes(_) => RowKeyType::Bytes,
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Bytes(v) => write!(f, "0x{}", hex::encode(v)),
        }
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

/// Half-open interval `[min, max)` over one row-key dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Range {
    /// Inclusive lower bound.
    pub min: KeyValue,
    /// Exclusive upper bound, `None` for unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<KeyValue>,
}

impl Range {
    /// Creates a range, returning `None` if it would be empty or mix types.
    #[must_use]
    pub fn new(min: KeyValue, max: Option<KeyValue>) -> Option<Self> {
        let range = Self { min, max };
        range.is_valid().then_some(range)
    }

    /// Creates the range covering an entire dimension.
    #[must_use]
    pub fn full(key_type: RowKeyType) -> Self {
        Self {
            min: key_type.min_value(),
            max: None,
        }
    }

    /// Returns true if min < max and both bounds share a type.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        match &self.max {
            None => true,
            Some(max) => max.key_type() == self.min.key_type() && self.min < *max,
        }
    }

    /// Returns true if the value falls inside this range.
    #[must_use]
    pub fn contains(&self, value: &KeyValue) -> bool {
        value.key_type() == self.min.key_type()
            && *value >= self.min
            && self.max.as_ref().map_or(true, |max| value < max)
    }

    /// Returns true if `point` lies strictly inside the range, so splitting
    /// there leaves both halves non-empty.
    #[must_use]
    pub fn can_split_at(&self, point: &KeyValue) -> bool {
        self.contains(point) && *point != self.min
    }

    /// Splits the range into `[min, point)` and `[point, max)`.
    #[must_use]
    pub fn split_at(&self, point: &KeyValue) -> Option<(Self, Self)> {
        if !self.can_split_at(point) {
            return None;
        }
        Some((
            Self {
                min: self.min.clone(),
                max: Some(point.clone()),
            },
            Self {
                min: point.clone(),
                max: self.max.clone(),
            },
        ))
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.max {
            Some(max) => write!(f, "[{}, {max})", self.min),
            None => write!(f, "[{}, +inf)", self.min),
        }
    }
}

/// One range per row-key dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    /// Ranges indexed by dimension.
    pub ranges: Vec<Range>,
}

impl Region {
    /// Creates a region from per-dimension ranges.
    #[must_use]
    pub fn new(ranges: Vec<Range>) -> Self {
        Self { ranges }
    }

    /// Returns the number of dimensions.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.ranges.len()
    }

    /// Returns true if the row key falls inside every dimension's range.
    #[must_use]
    pub fn contains(&self, key: &[KeyValue]) -> bool {
        key.len() == self.ranges.len()
            && self
                .ranges
                .iter()
                .zip(key)
                .all(|(range, value)| range.contains(value))
    }

    /// Splits the region on one dimension, leaving other dimensions untouched.
    #[must_use]
    pub fn split(&self, dimension: usize, point: &KeyValue) -> Option<(Self, Self)> {
        let (left_range, right_range) = self.ranges.get(dimension)?.split_at(point)?;
        let mut left = self.clone();
        let mut right = self.clone();
        left.ranges[dimension] = left_range;
        right.ranges[dimension] = right_range;
        Some((left, right))
    }

    /// Checks that `left` and `right` cover this region exactly, split on
    /// `dimension`, with no overlap and no gap.
    ///
    /// # Errors
    ///
    /// Returns a description of the first mismatch found.
    pub fn check_split(&self, dimension: usize, left: &Self, right: &Self) -> Result<(), String> {
        if left.dimensions() != self.dimensions() || right.dimensions() != self.dimensions() {
            return Err("child regions have a different number of dimensions".into());
        }
        let Some(parent_range) = self.ranges.get(dimension) else {
            return Err(format!("dimension {dimension} does not exist"));
        };
        for (d, range) in self.ranges.iter().enumerate() {
            if d != dimension && (left.ranges[d] != *range || right.ranges[d] != *range) {
                return Err(format!("children differ from parent on unsplit dimension {d}"));
            }
        }

        let left_range = &left.ranges[dimension];
        let right_range = &right.ranges[dimension];
        if left_range.min != parent_range.min {
            return Err(format!(
                "left child starts at {} but parent starts at {}",
                left_range.min, parent_range.min
            ));
        }
        if right_range.max != parent_range.max {
            return Err(format!(
                "right child ends at {right_range} but parent is {parent_range}"
            ));
        }
        if left_range.max.as_ref() != Some(&right_range.min) {
            return Err(format!(
                "left child {left_range} does not meet right child {right_range}"
            ));
        }
        if !left_range.is_valid() || !right_range.is_valid() {
            return Err(format!(
                "split point {} leaves an empty child",
                right_range.min
            ));
        }
        Ok(())
    }
}

/// The row-key schema of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    /// One type per row-key dimension.
    pub row_key_types: Vec<RowKeyType>,
}

impl TableSchema {
    /// Creates a schema with the given row-key types.
    #[must_use]
    pub fn new(row_key_types: Vec<RowKeyType>) -> Self {
        Self { row_key_types }
    }

    /// Creates a schema with a single row key.
    #[must_use]
    pub fn single_key(key_type: RowKeyType) -> Self {
        Self::new(vec![key_type])
    }

    /// Returns the region covering the whole key space.
    #[must_use]
    pub fn root_region(&self) -> Region {
        Region::new(self.row_key_types.iter().map(|t| Range::full(*t)).collect())
    }
}
