//! `RocksDB` journal storage for mlnx-sdn.
//!
//! This crate persists the operation journal replayed against the SDN
//! controller, plus the singleton lock that serializes maintenance runs.
//! Storage is a `RocksDB` `TransactionDB`, so every state change takes a row
//! lock and commits atomically with its index updates.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `journal`: Primary journal rows, keyed by `row_id`
//! - `journal_by_state`: Index for oldest-first scans by state
//! - `journal_by_object`: Index for per-object lookups
//! - `maintenance`: The maintenance lock record
//!
//! # Example
//!
//! ```no_run
//! use mlnx_sdn_store::{JournalStore, NewJournalRow, Operation, RocksStore};
//!
//! let store = RocksStore::open("/tmp/mlnx-sdn-db").unwrap();
//!
//! let row = NewJournalRow::new("network", "net-1", Operation::Post, serde_json::json!({}));
//! store.create_pending_row(row).unwrap();
//!
//! let claimed = store.acquire_oldest_pending_row().unwrap();
//! assert!(claimed.is_some());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod retry;
pub mod rocks;
pub mod schema;
pub mod types;

use std::time::Duration;

pub use error::{Result, StoreError};
pub use retry::RetryPolicy;
pub use rocks::RocksStore;
pub use types::{
    FabricType, JournalRow, JournalState, LockState, MaintenanceLock, NewJournalRow, Operation,
    RetryLimit,
};

use mlnx_sdn_core::RowId;

/// The storage trait defining all journal operations.
///
/// This trait abstracts the storage layer so the sync and maintenance
/// workers can be exercised against any transactional backend.
pub trait JournalStore: Send + Sync {
    // =========================================================================
    // Recording and Inspection
    // =========================================================================

    /// Insert a new row in `PENDING` state.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn create_pending_row(&self, row: NewJournalRow) -> Result<JournalRow>;

    /// Get a row by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_row(&self, row_id: &RowId) -> Result<Option<JournalRow>>;

    /// List every row in the journal.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_all_rows(&self) -> Result<Vec<JournalRow>>;

    /// List rows in a state, oldest `last_retried` first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_rows_by_state(&self, state: JournalState) -> Result<Vec<JournalRow>>;

    /// List `MONITORING` rows, oldest `last_retried` first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_monitoring_rows_oldest_first(&self) -> Result<Vec<JournalRow>> {
        self.list_rows_by_state(JournalState::Monitoring)
    }

    // =========================================================================
    // Dependency Queries
    // =========================================================================

    /// Whether a `PENDING` or `PROCESSING` row exists for the object with one
    /// of `operations`. An empty slice matches any operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn exists_pending_or_processing(
        &self,
        object_uuid: &str,
        operations: &[Operation],
    ) -> Result<bool>;

    /// Whether a `PENDING` or `PROCESSING` `DELETE` row of `object_type`
    /// mentions `parent_id` in its payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn exists_pending_delete_with_parent(&self, object_type: &str, parent_id: &str)
        -> Result<bool>;

    /// Whether a `PENDING` or `PROCESSING` `ADD` row of `object_type` carries
    /// all of `ids` among its payload's top-level values.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn exists_pending_or_processing_add(&self, object_type: &str, ids: &[&str]) -> Result<bool>;

    /// Whether another `PENDING` or `PROCESSING` row with the same operation
    /// and object was created before `row`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn exists_older_operation(&self, row: &JournalRow) -> Result<bool>;

    // =========================================================================
    // State Transitions
    // =========================================================================

    /// Claim the `PENDING` row with the oldest `last_retried` and move it to
    /// `PROCESSING` in one transaction.
    ///
    /// Returns `None` if nothing is pending. Concurrent callers never receive
    /// the same row.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::RetriesExhausted` if lock conflicts persist.
    fn acquire_oldest_pending_row(&self) -> Result<Option<JournalRow>>;

    /// Move a row to `state`, bumping `last_retried`.
    ///
    /// Only the state fields are written; the rest of the stored row is kept.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the row doesn't exist, or
    /// `StoreError::InvalidTransition` if the stored state cannot move to
    /// `state`.
    fn update_state(&self, row: &JournalRow, state: JournalState) -> Result<JournalRow>;

    /// Record the controller job tracking a row.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the row doesn't exist.
    fn update_job_id(&self, row: &JournalRow, job_id: &str) -> Result<JournalRow>;

    /// Record the controller job and move the row to `MONITORING` in one
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the row doesn't exist, or
    /// `StoreError::InvalidTransition` if it is not `PROCESSING`.
    fn start_monitoring(&self, row: &JournalRow, job_id: &str) -> Result<JournalRow>;

    /// Count a failed submission: `FAILED` once `limit` is exhausted,
    /// otherwise bump `retry_count` and return the row to `PENDING`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the row doesn't exist.
    fn update_retry(&self, row: &JournalRow, limit: RetryLimit) -> Result<JournalRow>;

    // =========================================================================
    // Bulk Maintenance
    // =========================================================================

    /// Delete rows in `state` whose `last_retried` is older than `age`.
    ///
    /// Returns the number of deleted rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn reap_stale_rows(&self, state: JournalState, age: Duration) -> Result<usize>;

    /// Return `PROCESSING` rows untouched for longer than `max_age` to
    /// `PENDING`.
    ///
    /// Returns the number of reset rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn reset_stuck_processing_rows(&self, max_age: Duration) -> Result<usize>;

    /// Delete `PENDING` rows carrying one of `operations`.
    ///
    /// Returns the number of deleted rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn delete_pending_rows(&self, operations: &[Operation]) -> Result<usize>;

    /// Delete a row by ID, whatever its state.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the row doesn't exist.
    fn delete_row(&self, row_id: &RowId) -> Result<()>;

    // =========================================================================
    // Maintenance Lock
    // =========================================================================

    /// Take the maintenance lock. Returns `false` if it is already held.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn acquire_maintenance_lock(&self) -> Result<bool>;

    /// Release the maintenance lock. Returns `false` if it was not held.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn release_maintenance_lock(&self) -> Result<bool>;

    /// Record (or clear, with `None`) the running maintenance operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn update_maintenance_operation(&self, operation: Option<&str>) -> Result<()>;

    /// Read the maintenance lock record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn maintenance_lock(&self) -> Result<MaintenanceLock>;
}
