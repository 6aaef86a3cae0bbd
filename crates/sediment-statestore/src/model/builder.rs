//! Builds an initial partition tree from split points.

use super::partition::PartitionTree;
use super::region::{KeyValue, TableSchema};
use crate::error::ValidationError;

/// Builds balanced partition trees for a schema.
///
/// ```rust
/// use sediment_statestore::model::{KeyValue, PartitionsBuilder, RowKeyType, TableSchema};
///
/// let schema = TableSchema::single_key(RowKeyType::Long);
/// let tree = PartitionsBuilder::new(schema)
///     .from_split_points(0, vec![KeyValue::Long(10), KeyValue::Long(20)])
///     .unwrap();
/// assert_eq!(tree.leaves().len(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct PartitionsBuilder {
    schema: TableSchema,
}

impl PartitionsBuilder {
    /// Creates a builder for the given schema.
    #[must_use]
    pub fn new(schema: TableSchema) -> Self {
        Self { schema }
    }

    /// Returns a tree with a single root partition.
    #[must_use]
    pub fn single_partition(&self) -> PartitionTree {
        PartitionTree::single_root(&self.schema)
    }

    /// Builds a tree whose leaves are bounded by the given split points on
    /// one dimension. Points are sorted and deduplicated first.
    ///
    /// # Errors
    ///
    /// Returns an error if the dimension does not exist or a point has the
    /// wrong type or equals the dimension's minimum value.
    pub fn from_split_points(
        &self,
        dimension: usize,
        mut split_points: Vec<KeyValue>,
    ) -> Result<PartitionTree, ValidationError> {
        let Some(key_type) = self.schema.row_key_types.get(dimension) else {
            return Err(ValidationError::InvalidPartitionTree {
                reason: format!("schema has no row-key dimension {dimension}"),
            });
        };
        if let Some(bad) = split_points.iter().find(|p| !key_type.accepts(p)) {
            return Err(ValidationError::InvalidPartitionTree {
                reason: format!("split point {bad} is not of type {key_type:?}"),
            });
        }
        split_points.sort();
        split_points.dedup();

        let mut tree = self.single_partition();
        let root_id = tree
            .root()
            .map(|p| p.id.clone())
            .unwrap_or_default();
        split_recursively(&mut tree, &root_id, dimension, &split_points)?;
        Ok(tree)
    }
}

fn split_recursively(
    tree: &mut PartitionTree,
    partition_id: &str,
    dimension: usize,
    points: &[KeyValue],
) -> Result<(), ValidationError> {
    if points.is_empty() {
        return Ok(());
    }
    let middle = points.len() / 2;
    let split = tree.split_leaf(partition_id, dimension, &points[middle])?;
    let (left_id, right_id) = (split.left.id.clone(), split.right.id.clone());
    tree.insert(split.parent);
    tree.insert(split.left);
    tree.insert(split.right);

    split_recursively(tree, &left_id, dimension, &points[..middle])?;
    split_recursively(tree, &right_id, dimension, &points[middle + 1..])
}
