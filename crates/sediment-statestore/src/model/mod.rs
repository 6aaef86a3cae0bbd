//! The materialised state the transaction logs fold into.

mod builder;
mod file_reference;
mod partition;
mod region;
mod table;

pub use builder::PartitionsBuilder;
pub use file_reference::{
    FileOrigin, FileReference, FileReferenceState, FileReferences, UnreferencedFiles,
};
pub use partition::{Partition, PartitionSplit, PartitionTree, ROOT_PARTITION_ID};
pub use region::{KeyValue, Range, Region, RowKeyType, TableSchema};
pub use table::TableProperties;
