//! Table identity and row-key schema.

use serde::{Deserialize, Serialize};

use sediment_core::TableId;

use super::region::TableSchema;

/// The properties of a table the state store needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableProperties {
    /// The table.
    pub table_id: TableId,
    /// Row-key types, which determine the partition key space.
    pub schema: TableSchema,
}

impl TableProperties {
    /// Creates table properties.
    #[must_use]
    pub fn new(table_id: TableId, schema: TableSchema) -> Self {
        Self { table_id, schema }
    }
}
