//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `JournalStore`
//! trait on top of a pessimistic `TransactionDB`. Row ownership comes from
//! `get_for_update` locks; lock timeouts and busy errors surface as
//! `StoreError::Conflict` and are retried by [`crate::retry::with_retries`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mlnx_sdn_core::RowId;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, MultiThreaded, Options,
    Transaction, TransactionDB, TransactionDBOptions,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::retry::{self, RetryPolicy};
use crate::schema::{all_column_families, cf, MAINTENANCE_LOCK_KEY};
use crate::types::{
    JournalRow, JournalState, LockState, MaintenanceLock, NewJournalRow, Operation, RetryLimit,
};
use crate::JournalStore;

type Db = TransactionDB<MultiThreaded>;

/// Column family handles used by journal transactions.
struct Families<'a> {
    journal: Arc<BoundColumnFamily<'a>>,
    by_state: Arc<BoundColumnFamily<'a>>,
    by_object: Arc<BoundColumnFamily<'a>>,
    maintenance: Arc<BoundColumnFamily<'a>>,
}

/// RocksDB-backed journal storage.
pub struct RocksStore {
    db: Arc<Db>,
    retry: RetryPolicy,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_policy(path, RetryPolicy::default())
    }

    /// Open with a custom conflict retry policy.
    ///
    /// The maintenance lock record is created in the free state if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open_with_policy<P: AsRef<Path>>(path: P, retry: RetryPolicy) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = Db::open_cf_descriptors(
            &opts,
            &TransactionDBOptions::default(),
            path,
            cf_descriptors,
        )?;

        let store = Self {
            db: Arc::new(db),
            retry,
        };
        store.init_maintenance_lock()?;
        Ok(store)
    }

    fn init_maintenance_lock(&self) -> Result<()> {
        self.in_transaction("init_maintenance_lock", |txn, fam| {
            if txn
                .get_for_update_cf(&fam.maintenance, MAINTENANCE_LOCK_KEY, true)?
                .is_none()
            {
                let value = Self::serialize(&MaintenanceLock::default())?;
                txn.put_cf(&fam.maintenance, MAINTENANCE_LOCK_KEY, value)?;
            }
            Ok(())
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    fn families(&self) -> Result<Families<'_>> {
        Ok(Families {
            journal: self.cf(cf::JOURNAL)?,
            by_state: self.cf(cf::JOURNAL_BY_STATE)?,
            by_object: self.cf(cf::JOURNAL_BY_OBJECT)?,
            maintenance: self.cf(cf::MAINTENANCE)?,
        })
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Run `f` inside a transaction, committing on success and re-running the
    /// whole transaction on conflicts.
    fn in_transaction<T, F>(&self, operation: &'static str, mut f: F) -> Result<T>
    where
        F: FnMut(&Transaction<'_, Db>, &Families<'_>) -> Result<T>,
    {
        let fam = self.families()?;
        retry::with_retries(&self.retry, operation, StoreError::is_retriable, || {
            let txn = self.db.transaction();
            let value = f(&txn, &fam)?;
            txn.commit()?;
            Ok(value)
        })
    }

    /// Collect the keys of an index iterator that share `prefix`.
    fn collect_prefixed<I>(iter: I, prefix: &[u8]) -> Result<Vec<Box<[u8]>>>
    where
        I: Iterator<Item = std::result::Result<(Box<[u8]>, Box<[u8]>), rocksdb::Error>>,
    {
        let mut keys = Vec::new();
        for item in iter {
            let (key, _) = item?;

            // Stop if we're past the prefix
            if !key.starts_with(prefix) {
                break;
            }
            keys.push(key);
        }
        Ok(keys)
    }

    fn read_row(
        txn: &Transaction<'_, Db>,
        fam: &Families<'_>,
        row_id: &RowId,
        lock: bool,
    ) -> Result<Option<JournalRow>> {
        let key = keys::row_key(row_id);
        let data = if lock {
            txn.get_for_update_cf(&fam.journal, key, true)?
        } else {
            txn.get_cf(&fam.journal, key)?
        };
        data.map(|d| Self::deserialize(&d)).transpose()
    }

    fn put_row(txn: &Transaction<'_, Db>, fam: &Families<'_>, row: &JournalRow) -> Result<()> {
        txn.put_cf(&fam.journal, keys::row_key(&row.id), Self::serialize(row)?)?;
        txn.put_cf(&fam.by_state, keys::state_row_key(row), [])?;
        txn.put_cf(
            &fam.by_object,
            keys::object_row_key(&row.object_uuid, &row.id),
            [],
        )?;
        Ok(())
    }

    fn remove_row(txn: &Transaction<'_, Db>, fam: &Families<'_>, row: &JournalRow) -> Result<()> {
        txn.delete_cf(&fam.journal, keys::row_key(&row.id))?;
        txn.delete_cf(&fam.by_state, keys::state_row_key(row))?;
        txn.delete_cf(&fam.by_object, keys::object_row_key(&row.object_uuid, &row.id))?;
        Ok(())
    }

    /// Move a locked row along one state machine edge and write it back.
    fn transition(
        txn: &Transaction<'_, Db>,
        fam: &Families<'_>,
        mut row: JournalRow,
        state: JournalState,
    ) -> Result<JournalRow> {
        if !row.state.can_transition_to(state) {
            return Err(StoreError::InvalidTransition {
                from: row.state,
                to: state,
            });
        }

        txn.delete_cf(&fam.by_state, keys::state_row_key(&row))?;
        row.state = state;
        row.last_retried = Utc::now();
        Self::put_row(txn, fam, &row)?;
        Ok(row)
    }

    /// Lock the stored copy of `row`, apply `f` and write back the result.
    fn update_locked<F>(
        &self,
        operation: &'static str,
        row: &JournalRow,
        mut f: F,
    ) -> Result<JournalRow>
    where
        F: FnMut(&Transaction<'_, Db>, &Families<'_>, JournalRow) -> Result<JournalRow>,
    {
        self.in_transaction(operation, |txn, fam| {
            let stored = Self::read_row(txn, fam, &row.id, true)?.ok_or(StoreError::NotFound)?;
            f(txn, fam, stored)
        })
    }

    /// Lock every row in `state` whose index timestamp is before `cutoff`
    /// and hand it to `f`. Returns how many rows `f` accepted.
    fn sweep_state<F>(
        &self,
        operation: &'static str,
        state: JournalState,
        cutoff: Option<DateTime<Utc>>,
        mut f: F,
    ) -> Result<usize>
    where
        F: FnMut(&Transaction<'_, Db>, &Families<'_>, JournalRow) -> Result<bool>,
    {
        let cutoff_bytes = cutoff.as_ref().map(keys::timestamp_bytes);

        self.in_transaction(operation, |txn, fam| {
            let prefix = keys::state_prefix(state);
            let index = Self::collect_prefixed(
                txn.iterator_cf(&fam.by_state, IteratorMode::From(&prefix, Direction::Forward)),
                &prefix,
            )?;

            let mut count = 0;
            for key in index {
                if let (Some(limit), Some(ts)) =
                    (cutoff_bytes, keys::extract_timestamp_from_state_key(&key))
                {
                    // Index is ordered by time; everything after is younger.
                    if ts >= limit {
                        break;
                    }
                }
                let Some(row_id) = keys::extract_row_id_from_state_key(&key) else {
                    continue;
                };
                let Some(row) = Self::read_row(txn, fam, &row_id, true)? else {
                    continue;
                };
                if row.state != state || cutoff.is_some_and(|c| row.last_retried >= c) {
                    continue;
                }
                if f(txn, fam, row)? {
                    count += 1;
                }
            }
            Ok(count)
        })
    }

    fn cutoff(age: Duration) -> Result<DateTime<Utc>> {
        let age = chrono::Duration::from_std(age)
            .map_err(|e| StoreError::InvalidArgument(e.to_string()))?;
        Utc::now()
            .checked_sub_signed(age)
            .ok_or_else(|| StoreError::InvalidArgument(format!("age out of range: {age}")))
    }

    /// Rows of one object, read without locks.
    fn rows_for_object(&self, object_uuid: &str) -> Result<Vec<JournalRow>> {
        let fam = self.families()?;
        let prefix = keys::object_prefix(object_uuid);
        let index = Self::collect_prefixed(
            self.db
                .iterator_cf(&fam.by_object, IteratorMode::From(&prefix, Direction::Forward)),
            &prefix,
        )?;

        let mut rows = Vec::with_capacity(index.len());
        for key in index {
            if let Some(row_id) = keys::extract_row_id_from_object_key(&key) {
                if let Some(row) = self.get_row(&row_id)? {
                    rows.push(row);
                }
            }
        }
        Ok(rows)
    }

    fn active_rows(&self) -> Result<Vec<JournalRow>> {
        let mut rows = self.list_rows_by_state(JournalState::Pending)?;
        rows.extend(self.list_rows_by_state(JournalState::Processing)?);
        Ok(rows)
    }

    fn update_lock<F>(&self, operation: &'static str, mut f: F) -> Result<bool>
    where
        F: FnMut(&mut MaintenanceLock) -> bool,
    {
        self.in_transaction(operation, |txn, fam| {
            let mut lock: MaintenanceLock = txn
                .get_for_update_cf(&fam.maintenance, MAINTENANCE_LOCK_KEY, true)?
                .map(|d| Self::deserialize(&d))
                .transpose()?
                .unwrap_or_default();

            if !f(&mut lock) {
                return Ok(false);
            }
            lock.updated_at = Utc::now();
            txn.put_cf(&fam.maintenance, MAINTENANCE_LOCK_KEY, Self::serialize(&lock)?)?;
            Ok(true)
        })
    }
}

const fn is_active(state: JournalState) -> bool {
    matches!(state, JournalState::Pending | JournalState::Processing)
}

impl JournalStore for RocksStore {
    // =========================================================================
    // Recording and Inspection
    // =========================================================================

    fn create_pending_row(&self, new_row: NewJournalRow) -> Result<JournalRow> {
        let now = Utc::now();
        let row = JournalRow {
            id: RowId::generate(),
            object_type: new_row.object_type,
            object_uuid: new_row.object_uuid,
            operation: new_row.operation,
            data: new_row.data,
            state: JournalState::Pending,
            created_at: now,
            last_retried: now,
            retry_count: 0,
            job_id: None,
            fabric_type: new_row.fabric_type,
        };

        self.in_transaction("create_pending_row", |txn, fam| Self::put_row(txn, fam, &row))?;

        tracing::debug!(
            row_id = %row.id,
            object_type = %row.object_type,
            object_uuid = %row.object_uuid,
            operation = %row.operation,
            "Recorded journal row"
        );
        Ok(row)
    }

    fn get_row(&self, row_id: &RowId) -> Result<Option<JournalRow>> {
        let cf = self.cf(cf::JOURNAL)?;

        self.db
            .get_cf(&cf, keys::row_key(row_id))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn list_all_rows(&self) -> Result<Vec<JournalRow>> {
        let cf = self.cf(cf::JOURNAL)?;

        let mut rows = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            rows.push(Self::deserialize(&value)?);
        }
        Ok(rows)
    }

    fn list_rows_by_state(&self, state: JournalState) -> Result<Vec<JournalRow>> {
        let cf_by_state = self.cf(cf::JOURNAL_BY_STATE)?;
        let prefix = keys::state_prefix(state);
        let index = Self::collect_prefixed(
            self.db
                .iterator_cf(&cf_by_state, IteratorMode::From(&prefix, Direction::Forward)),
            &prefix,
        )?;

        let mut rows = Vec::with_capacity(index.len());
        for key in index {
            let Some(row_id) = keys::extract_row_id_from_state_key(&key) else {
                continue;
            };
            // The index is read without a snapshot; skip rows that moved on.
            if let Some(row) = self.get_row(&row_id)? {
                if row.state == state {
                    rows.push(row);
                }
            }
        }
        Ok(rows)
    }

    // =========================================================================
    // Dependency Queries
    // =========================================================================

    fn exists_pending_or_processing(
        &self,
        object_uuid: &str,
        operations: &[Operation],
    ) -> Result<bool> {
        Ok(self.rows_for_object(object_uuid)?.iter().any(|row| {
            is_active(row.state) && (operations.is_empty() || operations.contains(&row.operation))
        }))
    }

    fn exists_pending_delete_with_parent(
        &self,
        object_type: &str,
        parent_id: &str,
    ) -> Result<bool> {
        Ok(self.active_rows()?.iter().any(|row| {
            row.object_type == object_type
                && row.operation == Operation::Delete
                && row.data_contains(parent_id)
        }))
    }

    fn exists_pending_or_processing_add(&self, object_type: &str, ids: &[&str]) -> Result<bool> {
        Ok(self.active_rows()?.iter().any(|row| {
            row.object_type == object_type
                && row.operation == Operation::Add
                && row.data_values_include_all(ids)
        }))
    }

    fn exists_older_operation(&self, row: &JournalRow) -> Result<bool> {
        Ok(self.rows_for_object(&row.object_uuid)?.iter().any(|other| {
            other.id != row.id
                && other.operation == row.operation
                && is_active(other.state)
                && other.created_at < row.created_at
        }))
    }

    // =========================================================================
    // State Transitions
    // =========================================================================

    fn acquire_oldest_pending_row(&self) -> Result<Option<JournalRow>> {
        let claimed = self.in_transaction("acquire_oldest_pending_row", |txn, fam| {
            let prefix = keys::state_prefix(JournalState::Pending);
            let index = Self::collect_prefixed(
                txn.iterator_cf(&fam.by_state, IteratorMode::From(&prefix, Direction::Forward)),
                &prefix,
            )?;

            for key in index {
                let Some(row_id) = keys::extract_row_id_from_state_key(&key) else {
                    continue;
                };

                // Cheap unlocked check so rows claimed since the scan began
                // are skipped without waiting on their locks.
                match Self::read_row(txn, fam, &row_id, false)? {
                    Some(row) if row.state == JournalState::Pending => {}
                    _ => continue,
                }

                let Some(row) = Self::read_row(txn, fam, &row_id, true)? else {
                    continue;
                };
                if row.state != JournalState::Pending {
                    continue;
                }
                return Self::transition(txn, fam, row, JournalState::Processing).map(Some);
            }
            Ok(None)
        })?;

        if let Some(row) = &claimed {
            tracing::debug!(row_id = %row.id, operation = %row.operation, "Claimed journal row");
        }
        Ok(claimed)
    }

    fn update_state(&self, row: &JournalRow, state: JournalState) -> Result<JournalRow> {
        self.update_locked("update_state", row, |txn, fam, stored| {
            Self::transition(txn, fam, stored, state)
        })
    }

    fn update_job_id(&self, row: &JournalRow, job_id: &str) -> Result<JournalRow> {
        self.update_locked("update_job_id", row, |txn, fam, mut stored| {
            stored.job_id = Some(job_id.to_string());
            txn.put_cf(&fam.journal, keys::row_key(&stored.id), Self::serialize(&stored)?)?;
            Ok(stored)
        })
    }

    fn start_monitoring(&self, row: &JournalRow, job_id: &str) -> Result<JournalRow> {
        self.update_locked("start_monitoring", row, |txn, fam, mut stored| {
            stored.job_id = Some(job_id.to_string());
            Self::transition(txn, fam, stored, JournalState::Monitoring)
        })
    }

    fn update_retry(&self, row: &JournalRow, limit: RetryLimit) -> Result<JournalRow> {
        let updated = self.update_locked("update_retry", row, |txn, fam, mut stored| {
            if limit.is_exhausted(stored.retry_count) {
                Self::transition(txn, fam, stored, JournalState::Failed)
            } else {
                stored.retry_count += 1;
                Self::transition(txn, fam, stored, JournalState::Pending)
            }
        })?;

        if updated.state == JournalState::Failed {
            tracing::warn!(
                row_id = %updated.id,
                retry_count = updated.retry_count,
                "Journal row failed after exhausting retries"
            );
        }
        Ok(updated)
    }

    // =========================================================================
    // Bulk Maintenance
    // =========================================================================

    fn reap_stale_rows(&self, state: JournalState, age: Duration) -> Result<usize> {
        let cutoff = Self::cutoff(age)?;
        self.sweep_state("reap_stale_rows", state, Some(cutoff), |txn, fam, row| {
            Self::remove_row(txn, fam, &row)?;
            Ok(true)
        })
    }

    fn reset_stuck_processing_rows(&self, max_age: Duration) -> Result<usize> {
        let cutoff = Self::cutoff(max_age)?;
        self.sweep_state(
            "reset_stuck_processing_rows",
            JournalState::Processing,
            Some(cutoff),
            |txn, fam, row| {
                Self::transition(txn, fam, row, JournalState::Pending)?;
                Ok(true)
            },
        )
    }

    fn delete_pending_rows(&self, operations: &[Operation]) -> Result<usize> {
        self.sweep_state(
            "delete_pending_rows",
            JournalState::Pending,
            None,
            |txn, fam, row| {
                if !operations.contains(&row.operation) {
                    return Ok(false);
                }
                Self::remove_row(txn, fam, &row)?;
                Ok(true)
            },
        )
    }

    fn delete_row(&self, row_id: &RowId) -> Result<()> {
        self.in_transaction("delete_row", |txn, fam| {
            let row = Self::read_row(txn, fam, row_id, true)?.ok_or(StoreError::NotFound)?;
            Self::remove_row(txn, fam, &row)
        })
    }

    // =========================================================================
    // Maintenance Lock
    // =========================================================================

    fn acquire_maintenance_lock(&self) -> Result<bool> {
        self.update_lock("acquire_maintenance_lock", |lock| {
            if lock.state != LockState::Pending {
                return false;
            }
            lock.state = LockState::Processing;
            true
        })
    }

    fn release_maintenance_lock(&self) -> Result<bool> {
        self.update_lock("release_maintenance_lock", |lock| {
            if lock.state != LockState::Processing {
                return false;
            }
            lock.state = LockState::Pending;
            true
        })
    }

    fn update_maintenance_operation(&self, operation: Option<&str>) -> Result<()> {
        self.update_lock("update_maintenance_operation", |lock| {
            lock.processing_operation = operation.map(str::to_string);
            true
        })
        .map(|_| ())
    }

    fn maintenance_lock(&self) -> Result<MaintenanceLock> {
        let cf = self.cf(cf::MAINTENANCE)?;

        self.db
            .get_cf(&cf, MAINTENANCE_LOCK_KEY)?
            .map(|data| Self::deserialize(&data))
            .transpose()?
            .ok_or(StoreError::NotFound)
    }
}
