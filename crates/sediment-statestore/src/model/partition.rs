//! Partitions and the partition tree.
//!
//! The tree is stored as a flat map keyed by partition ID, with parent and
//! child links held as IDs. The root covers the whole key space; splitting a
//! leaf into two children is the only mutation after initialisation.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::region::{KeyValue, Region, TableSchema};
use crate::error::ValidationError;

/// ID conventionally given to the root partition of a fresh table.
pub const ROOT_PARTITION_ID: &str = "root";

/// A node in the partition tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Partition {
    /// Unique partition ID.
    pub id: String,
    /// Parent partition, `None` for the root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Either empty (leaf) or exactly two children, left then right.
    #[serde(default)]
    pub child_ids: Vec<String>,
    /// True if the partition has not been split.
    pub is_leaf: bool,
    /// Key-space region covered by this partition.
    pub region: Region,
    /// Dimension the partition was split on, once split.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub split_dimension: Option<usize>,
}

impl Partition {
    /// Creates a root partition covering `region`.
    #[must_use]
    pub fn root(id: impl Into<String>, region: Region) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            child_ids: Vec::new(),
            is_leaf: true,
            region,
            split_dimension: None,
        }
    }

    /// Creates a leaf partition under `parent_id`.
    #[must_use]
    pub fn leaf(id: impl Into<String>, parent_id: impl Into<String>, region: Region) -> Self {
        Self {
            id: id.into(),
            parent_id: Some(parent_id.into()),
            child_ids: Vec::new(),
            is_leaf: true,
            region,
            split_dimension: None,
        }
    }

    /// Returns true if this is the root partition.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Result of planning a split of one leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSplit {
    /// The parent, updated to reference its children.
    pub parent: Partition,
    /// Child covering keys below the split point.
    pub left: Partition,
    /// Child covering keys from the split point upwards.
    pub right: Partition,
}

/// Materialised partition state: every partition, keyed by ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionTree {
    partitions: BTreeMap<String, Partition>,
}

impl PartitionTree {
    /// Builds a tree from a list of partitions without validating it.
    #[must_use]
    pub fn from_partitions(partitions: impl IntoIterator<Item = Partition>) -> Self {
        Self {
            partitions: partitions
                .into_iter()
                .map(|p| (p.id.clone(), p))
                .collect(),
        }
    }

    /// Creates a tree with a single root partition covering the schema's key space.
    #[must_use]
    pub fn single_root(schema: &TableSchema) -> Self {
        Self::from_partitions([Partition::root(ROOT_PARTITION_ID, schema.root_region())])
    }

    /// Returns true if no partitions exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Returns the number of partitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    /// Looks up a partition by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Partition> {
        self.partitions.get(id)
    }

    /// Iterates over all partitions in ID order.
    pub fn iter(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.values()
    }

    /// Returns all partitions in ID order.
    #[must_use]
    pub fn all(&self) -> Vec<Partition> {
        self.partitions.values().cloned().collect()
    }

    /// Returns the root partition.
    #[must_use]
    pub fn root(&self) -> Option<&Partition> {
        self.partitions.values().find(|p| p.is_root())
    }

    /// Returns all leaf partitions.
    #[must_use]
    pub fn leaves(&self) -> Vec<&Partition> {
        self.partitions.values().filter(|p| p.is_leaf).collect()
    }

    /// Returns the children of a partition, left then right.
    #[must_use]
    pub fn children(&self, id: &str) -> Vec<&Partition> {
        self.get(id)
            .map(|p| p.child_ids.iter().filter_map(|c| self.get(c)).collect())
            .unwrap_or_default()
    }

    /// Returns the ancestors of a partition, nearest first.
    #[must_use]
    pub fn ancestors(&self, id: &str) -> Vec<&Partition> {
        let mut ancestors = Vec::new();
        let mut current = self.get(id).and_then(|p| p.parent_id.as_deref());
        while let Some(parent_id) = current {
            let Some(parent) = self.get(parent_id) else {
                break;
            };
            // a malformed tree could loop; the tree cannot be deeper than its size
            if ancestors.len() > self.partitions.len() {
                break;
            }
            ancestors.push(parent);
            current = parent.parent_id.as_deref();
        }
        ancestors
    }

    /// Finds the leaf partition whose region contains the row key.
    #[must_use]
    pub fn leaf_partition_for_key(&self, key: &[KeyValue]) -> Option<&Partition> {
        let mut current = self.root()?;
        if !current.region.contains(key) {
            return None;
        }
        while !current.is_leaf {
            current = self
                .children(&current.id)
                .into_iter()
                .find(|child| child.region.contains(key))?;
        }
        Some(current)
    }

    /// Plans a split of a leaf partition at `point` on `dimension`.
    ///
    /// Child IDs are freshly generated. The tree itself is not modified; pass
    /// the result to the state store's `split_partition`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the partition is missing, already split,
    /// or the point does not lie strictly inside its range.
    pub fn split_leaf(
        &self,
        partition_id: &str,
        dimension: usize,
        point: &KeyValue,
    ) -> Result<PartitionSplit, ValidationError> {
        let existing = self
            .get(partition_id)
            .ok_or_else(|| ValidationError::PartitionNotFound {
                partition_id: partition_id.to_string(),
            })?;
        if !existing.is_leaf {
            return Err(ValidationError::PartitionAlreadySplit {
                partition_id: partition_id.to_string(),
            });
        }
        let (left_region, right_region) =
            existing.region.split(dimension, point).ok_or_else(|| {
                ValidationError::InvalidPartitionSplit {
                    partition_id: partition_id.to_string(),
                    reason: format!("cannot split dimension {dimension} at {point}"),
                }
            })?;

        let left = Partition::leaf(Ulid::new().to_string(), partition_id, left_region);
        let right = Partition::leaf(Ulid::new().to_string(), partition_id, right_region);
        let mut parent = existing.clone();
        parent.is_leaf = false;
        parent.child_ids = vec![left.id.clone(), right.id.clone()];
        parent.split_dimension = Some(dimension);

        Ok(PartitionSplit {
            parent,
            left,
            right,
        })
    }

    /// Checks the tree is well formed.
    ///
    /// - exactly one root
    /// - every link resolves, in both directions
    /// - leaves have no children and split partitions have exactly two
    /// - each split partition's children divide its region on its split dimension
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidPartitionTree`] describing the first problem.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: String| ValidationError::InvalidPartitionTree { reason };

        let roots: Vec<_> = self.partitions.values().filter(|p| p.is_root()).collect();
        if roots.len() != 1 {
            return Err(invalid(format!(
                "expected exactly one root partition, found {}",
                roots.len()
            )));
        }

        for partition in self.partitions.values() {
            if let Some(parent_id) = &partition.parent_id {
                let parent = self.get(parent_id).ok_or_else(|| {
                    invalid(format!(
                        "partition {} references missing parent {parent_id}",
                        partition.id
                    ))
                })?;
                if !parent.child_ids.contains(&partition.id) {
                    return Err(invalid(format!(
                        "parent {parent_id} does not list {} as a child",
                        partition.id
                    )));
                }
            }

            if partition.is_leaf {
                if !partition.child_ids.is_empty() || partition.split_dimension.is_some() {
                    return Err(invalid(format!(
                        "leaf partition {} has split information",
                        partition.id
                    )));
                }
                continue;
            }

            let [left_id, right_id] = partition.child_ids.as_slice() else {
                return Err(invalid(format!(
                    "split partition {} must have exactly two children",
                    partition.id
                )));
            };
            let dimension = partition.split_dimension.ok_or_else(|| {
                invalid(format!("split partition {} has no split dimension", partition.id))
            })?;
            let (Some(left), Some(right)) = (self.get(left_id), self.get(right_id)) else {
                return Err(invalid(format!(
                    "split partition {} references a missing child",
                    partition.id
                )));
            };
            if left.parent_id.as_deref() != Some(partition.id.as_str())
                || right.parent_id.as_deref() != Some(partition.id.as_str())
            {
                return Err(invalid(format!(
                    "children of {} do not point back to it",
                    partition.id
                )));
            }
            partition
                .region
                .check_split(dimension, &left.region, &right.region)
                .map_err(|reason| {
                    invalid(format!("partition {} is badly split: {reason}", partition.id))
                })?;
        }

        // every partition must be reachable from the root
        let mut reachable = BTreeSet::new();
        let mut pending = vec![roots[0].id.as_str()];
        while let Some(id) = pending.pop() {
            if reachable.insert(id) {
                if let Some(p) = self.get(id) {
                    pending.extend(p.child_ids.iter().map(String::as_str));
                }
            }
        }
        if reachable.len() != self.partitions.len() {
            return Err(invalid(format!(
                "{} partitions are not reachable from the root",
                self.partitions.len() - reachable.len()
            )));
        }

        Ok(())
    }

    pub(crate) fn insert(&mut self, partition: Partition) {
        self.partitions.insert(partition.id.clone(), partition);
    }
}
