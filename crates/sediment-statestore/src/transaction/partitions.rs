//! Transactions on the partition log.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{LogKind, StateTransaction};
use crate::error::ValidationError;
use crate::model::{Partition, PartitionTree};

/// A change to the partition tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PartitionTransaction {
    /// Replaces the whole tree.
    InitialisePartitions(InitialisePartitionsTransaction),
    /// Splits one leaf into two children.
    SplitPartition(SplitPartitionTransaction),
}

impl StateTransaction for PartitionTransaction {
    type State = PartitionTree;

    const LOG: LogKind = LogKind::Partitions;

    fn kind(&self) -> &'static str {
        match self {
            Self::InitialisePartitions(_) => "initialise_partitions",
            Self::SplitPartition(_) => "split_partition",
        }
    }

    fn validate(&self, state: &PartitionTree) -> Result<(), ValidationError> {
        match self {
            Self::InitialisePartitions(t) => t.validate(),
            Self::SplitPartition(t) => t.validate(state),
        }
    }

    fn apply(&self, state: &mut PartitionTree, _update_time: DateTime<Utc>) {
        match self {
            Self::InitialisePartitions(t) => {
                *state = PartitionTree::from_partitions(t.partitions.iter().cloned());
            }
            Self::SplitPartition(t) => {
                state.insert(t.parent.clone());
                state.insert(t.left.clone());
                state.insert(t.right.clone());
            }
        }
    }
}

/// Sets the partition tree, discarding any previous one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialisePartitionsTransaction {
    /// Every partition of the new tree.
    pub partitions: Vec<Partition>,
}

impl InitialisePartitionsTransaction {
    /// Creates the transaction from a tree.
    #[must_use]
    pub fn new(tree: &PartitionTree) -> Self {
        Self {
            partitions: tree.all(),
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let mut ids = BTreeSet::new();
        for partition in &self.partitions {
            if !ids.insert(partition.id.as_str()) {
                return Err(ValidationError::PartitionAlreadyExists {
                    partition_id: partition.id.clone(),
                });
            }
        }
        PartitionTree::from_partitions(self.partitions.iter().cloned()).validate()
    }
}

/// Splits a leaf into two new leaves.
///
/// `parent` is the leaf as it will be after the split: no longer a leaf,
/// listing `left` and `right` as children and naming the split dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitPartitionTransaction {
    /// The split partition.
    pub parent: Partition,
    /// New child below the split point.
    pub left: Partition,
    /// New child from the split point upwards.
    pub right: Partition,
}

impl SplitPartitionTransaction {
    /// Creates the transaction.
    #[must_use]
    pub fn new(parent: Partition, left: Partition, right: Partition) -> Self {
        Self {
            parent,
            left,
            right,
        }
    }

    fn validate(&self, state: &PartitionTree) -> Result<(), ValidationError> {
        let parent_id = self.parent.id.as_str();
        let invalid = |reason: String| ValidationError::InvalidPartitionSplit {
            partition_id: parent_id.to_string(),
            reason,
        };

        let existing = state
            .get(parent_id)
            .ok_or_else(|| ValidationError::PartitionNotFound {
                partition_id: parent_id.to_string(),
            })?;
        if !existing.is_leaf {
            return Err(ValidationError::PartitionAlreadySplit {
                partition_id: parent_id.to_string(),
            });
        }

        if self.parent.parent_id != existing.parent_id || self.parent.region != existing.region {
            return Err(invalid("split changes the parent's position or region".into()));
        }
        if self.parent.is_leaf {
            return Err(invalid("split parent is still marked as a leaf".into()));
        }
        let dimension = self
            .parent
            .split_dimension
            .ok_or_else(|| invalid("no split dimension".into()))?;
        if self.parent.child_ids != [self.left.id.clone(), self.right.id.clone()] {
            return Err(invalid(format!(
                "parent lists children {:?}, expected [{}, {}]",
                self.parent.child_ids, self.left.id, self.right.id
            )));
        }
        if self.left.id == self.right.id {
            return Err(invalid("children share an id".into()));
        }

        for child in [&self.left, &self.right] {
            if state.get(&child.id).is_some() {
                return Err(ValidationError::PartitionAlreadyExists {
                    partition_id: child.id.clone(),
                });
            }
            if !child.is_leaf || !child.child_ids.is_empty() || child.split_dimension.is_some() {
                return Err(invalid(format!("child {} is not a leaf", child.id)));
            }
            if child.parent_id.as_deref() != Some(parent_id) {
                return Err(invalid(format!("child {} has the wrong parent", child.id)));
            }
        }

        existing
            .region
            .check_split(dimension, &self.left.region, &self.right.region)
            .map_err(invalid)
    }
}
