//! ActivityStore trait and RocksDB implementation
//!
//! Append-only persistence for activity records derived from on-chain events.
//! Upserts are idempotent on the record's primary key, and each batch is
//! written atomically through a RocksDB WriteBatch.

use crate::keys::{encode_activity_key, encode_group_prefix, encode_group_upper_bound};
use crate::records::{ActivityRecord, EventGroupKey};
use anyhow::{Context, Result};
use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};
use std::path::Path;

/// Trait defining the interface for activity persistence.
///
/// Implementations must be idempotent on the record primary key: writing a
/// record whose key already exists has no visible effect. Batch writes are
/// atomic per call; no multi-batch transactional guarantees are offered.
pub trait ActivityStore: Send + Sync {
    /// Get the activity record with the highest block number in a group,
    /// or None if the group has no records yet.
    fn last_matched_event(&self, group: &EventGroupKey) -> Result<Option<ActivityRecord>>;

    /// Write a batch of records. Atomic: either every record in the batch
    /// is persisted or none is. Records whose primary key already exists
    /// are absorbed without effect.
    fn upsert_batch(&self, records: &[ActivityRecord]) -> Result<()>;

    /// Get all records in a group, ordered by (block, transaction, log index).
    fn activities_in_group(&self, group: &EventGroupKey) -> Result<Vec<ActivityRecord>>;

    /// Count the records in a group.
    fn count_in_group(&self, group: &EventGroupKey) -> Result<u64>;
}

/// RocksDB-backed implementation of ActivityStore.
///
/// A single "activities" column family holds every record, keyed so that a
/// reverse prefix scan yields the highest-block record for a group.
pub struct RocksActivityStore {
    db: DB,
}

impl RocksActivityStore {
    /// Open or create a RocksDB database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let column_families = vec![ColumnFamilyDescriptor::new("activities", Options::default())];

        let db = DB::open_cf_descriptors(&opts, path, column_families)
            .context("Failed to open RocksDB database")?;

        Ok(Self { db })
    }

    /// Get a column family handle by name.
    fn get_cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .with_context(|| format!("Column family '{}' not found", name))
    }
}

/// Event names are length-prefixed with a single byte in the key encoding.
fn validate_event_name(name: &str) -> Result<()> {
    if name.is_empty() {
        anyhow::bail!("Event name must not be empty");
    }
    if name.len() > 255 {
        anyhow::bail!("Event name too long ({} bytes, max 255)", name.len());
    }
    Ok(())
}

impl ActivityStore for RocksActivityStore {
    fn last_matched_event(&self, group: &EventGroupKey) -> Result<Option<ActivityRecord>> {
        validate_event_name(&group.event_name)?;
        let cf = self.get_cf("activities")?;
        let prefix = encode_group_prefix(group);
        let upper = encode_group_upper_bound(group);

        // The first key at or below the upper bound that still carries the
        // group prefix is the highest-block record in the group.
        let iter = self.db.iterator_cf(
            cf,
            rocksdb::IteratorMode::From(&upper, rocksdb::Direction::Reverse),
        );

        for item in iter {
            let (key, value) = item.context("Failed to read iterator")?;
            if !key.starts_with(&prefix) {
                break;
            }
            let record = postcard::from_bytes(&value)
                .context("Failed to deserialize activity record")?;
            return Ok(Some(record));
        }

        Ok(None)
    }

    fn upsert_batch(&self, records: &[ActivityRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let cf = self.get_cf("activities")?;
        let mut batch = WriteBatch::default();
        for record in records {
            validate_event_name(&record.event_name)?;
            let key = encode_activity_key(
                &record.group_key(),
                record.block_number,
                record.transaction_id,
                record.log_index,
            );
            let value =
                postcard::to_allocvec(record).context("Failed to serialize activity record")?;
            batch.put_cf(cf, &key, &value);
        }
        self.db
            .write(batch)
            .context("Failed to write activity batch")?;
        Ok(())
    }

    fn activities_in_group(&self, group: &EventGroupKey) -> Result<Vec<ActivityRecord>> {
        validate_event_name(&group.event_name)?;
        let cf = self.get_cf("activities")?;
        let prefix = encode_group_prefix(group);

        let mut records = Vec::new();
        let iter = self.db.iterator_cf(
            cf,
            rocksdb::IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        for item in iter {
            let (key, value) = item.context("Failed to read iterator")?;
            if !key.starts_with(&prefix) {
                break;
            }
            let record: ActivityRecord = postcard::from_bytes(&value)
                .context("Failed to deserialize activity record")?;
            records.push(record);
        }

        Ok(records)
    }

    fn count_in_group(&self, group: &EventGroupKey) -> Result<u64> {
        validate_event_name(&group.event_name)?;
        let cf = self.get_cf("activities")?;
        let prefix = encode_group_prefix(group);

        let mut count = 0u64;
        let iter = self.db.iterator_cf(
            cf,
            rocksdb::IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        for item in iter {
            let (key, _) = item.context("Failed to read iterator")?;
            if !key.starts_with(&prefix) {
                break;
            }
            count += 1;
        }

        Ok(count)
    }
}
