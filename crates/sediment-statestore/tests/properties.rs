//! Property-based tests for the transaction logs and the state built from them.
//!
//! These check invariants that must hold for any sequence of operations:
//!
//! - a log accepts exactly the next sequence number and nothing else
//! - splitting leaves always yields a well-formed tree covering every key once
//! - a compacted file is unreferenced, and never also a live reference

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::BTreeSet;

use chrono::Utc;
use futures::TryStreamExt;
use proptest::prelude::*;
use tokio_test::block_on;

use sediment_core::{JobId, TableId};
use sediment_statestore::log::{
    InMemoryTransactionLogStore, TransactionLogEntry, TransactionLogStore,
};
use sediment_statestore::model::{KeyValue, RowKeyType, TableSchema, ROOT_PARTITION_ID};
use sediment_statestore::{
    FileReference, FileReferenceTransaction, StateStore, TableProperties, TransactionLogError,
};

fn long_key_store() -> StateStore {
    StateStore::in_memory(TableProperties::new(
        TableId::generate(),
        TableSchema::single_key(RowKeyType::Long),
    ))
}

fn entry(n: u64) -> TransactionLogEntry<FileReferenceTransaction> {
    TransactionLogEntry::new(n, Utc::now(), FileReferenceTransaction::ClearFiles)
}

/// Distinct split points, in the order they are applied.
fn arb_split_points() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::btree_set(-1_000i64..1_000, 1..12)
        .prop_map(|points| points.into_iter().collect::<Vec<_>>())
        .prop_shuffle()
}

proptest! {
    /// INVARIANT: N appends numbered 1..=N produce exactly those numbers, in order.
    #[test]
    fn appends_are_gapless(count in 1u64..40) {
        let log = InMemoryTransactionLogStore::new();
        block_on(async {
            for n in 1..=count {
                log.add_transaction(&entry(n)).await.unwrap();
            }
        });

        let numbers: Vec<u64> = block_on(
            log.read_transactions_after(0)
                .map_ok(|e| e.sequence_number)
                .try_collect(),
        )
        .unwrap();
        prop_assert_eq!(numbers, (1..=count).collect::<Vec<_>>());
    }

    /// INVARIANT: Any number other than latest + 1 is rejected without changing the log.
    #[test]
    fn wrong_numbers_never_mutate_the_log(
        committed in 0u64..20,
        proposed in 1u64..40,
    ) {
        prop_assume!(proposed != committed + 1);
        let log = InMemoryTransactionLogStore::new();
        block_on(async {
            for n in 1..=committed {
                log.add_transaction(&entry(n)).await.unwrap();
            }
        });

        let err = block_on(log.add_transaction(&entry(proposed))).unwrap_err();
        if proposed <= committed {
            let is_duplicate = matches!(
                err,
                TransactionLogError::DuplicateTransactionNumber { number, .. } if number == proposed
            );
            prop_assert!(is_duplicate);
        } else {
            let is_too_high = matches!(
                err,
                TransactionLogError::TransactionNumberTooHigh { number, expected, .. }
                    if number == proposed && expected == committed + 1
            );
            prop_assert!(is_too_high);
        }
        prop_assert_eq!(log.len().unwrap(), usize::try_from(committed).unwrap());
    }

    /// INVARIANT: Splitting the leaf that holds each point keeps the tree valid,
    /// and every point becomes the lower bound of exactly one leaf.
    #[test]
    fn splits_keep_the_tree_well_formed(points in arb_split_points()) {
        let store = long_key_store();
        block_on(store.initialise()).unwrap();

        for point in &points {
            let tree = block_on(store.get_partition_tree()).unwrap();
            let key = [KeyValue::Long(*point)];
            let leaf = tree.leaf_partition_for_key(&key).unwrap();
            let split = tree.split_leaf(&leaf.id, 0, &key[0]).unwrap();
            block_on(store.split_partition(split.parent, split.left, split.right)).unwrap();
        }

        let tree = block_on(store.get_partition_tree()).unwrap();
        prop_assert!(tree.validate().is_ok());
        prop_assert_eq!(tree.leaves().len(), points.len() + 1);
        prop_assert_eq!(tree.len(), 2 * points.len() + 1);
        for point in &points {
            let leaf = tree.leaf_partition_for_key(&[KeyValue::Long(*point)]).unwrap();
            prop_assert_eq!(&leaf.region.ranges[0].min, &KeyValue::Long(*point));
        }
    }

    /// INVARIANT: After a compaction, exactly its inputs are unreferenced and
    /// none of them is still a live reference.
    #[test]
    fn compacted_inputs_are_exactly_the_unreferenced_files(
        compacted_mask in prop::collection::vec(any::<bool>(), 1..16),
    ) {
        prop_assume!(compacted_mask.iter().any(|c| *c));
        let store = long_key_store();
        block_on(store.initialise()).unwrap();

        let filenames: Vec<String> = (0..compacted_mask.len())
            .map(|i| format!("in-{i:04}.parquet"))
            .collect();
        let references = filenames
            .iter()
            .map(|name| FileReference::ingested(name.clone(), ROOT_PARTITION_ID, 10))
            .collect();
        block_on(store.add_files(references)).unwrap();

        let inputs: Vec<String> = filenames
            .iter()
            .zip(&compacted_mask)
            .filter(|(_, compacted)| **compacted)
            .map(|(name, _)| name.clone())
            .collect();
        let job = JobId::new("compaction");
        block_on(async {
            store
                .assign_job_id(&job, ROOT_PARTITION_ID, inputs.clone())
                .await
                .unwrap();
            store
                .atomically_replace_files_with_new_references(
                    &job,
                    ROOT_PARTITION_ID,
                    inputs.clone(),
                    vec![FileReference::compacted("out.parquet", ROOT_PARTITION_ID, 10)],
                )
                .await
                .unwrap();
        });

        let unreferenced: BTreeSet<String> = block_on(store.get_files_with_no_references(100))
            .unwrap()
            .filenames
            .into_iter()
            .collect();
        let live: BTreeSet<String> = block_on(store.get_all_file_references())
            .unwrap()
            .into_iter()
            .map(|r| r.filename)
            .collect();

        prop_assert_eq!(&unreferenced, &inputs.iter().cloned().collect::<BTreeSet<_>>());
        prop_assert!(unreferenced.is_disjoint(&live));
        prop_assert_eq!(live.len(), filenames.len() - inputs.len() + 1);
    }
}
