//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary journal rows, keyed by `row_id`.
    pub const JOURNAL: &str = "journal";

    /// Index: rows by state, keyed by `state || last_retried || row_id`.
    ///
    /// Scanning a state prefix yields rows oldest `last_retried` first.
    pub const JOURNAL_BY_STATE: &str = "journal_by_state";

    /// Index: rows by object, keyed by `object_uuid || 0x00 || row_id`.
    pub const JOURNAL_BY_OBJECT: &str = "journal_by_object";

    /// The singleton maintenance lock, under [`super::MAINTENANCE_LOCK_KEY`].
    pub const MAINTENANCE: &str = "maintenance";
}

/// Key of the maintenance lock record.
pub const MAINTENANCE_LOCK_KEY: &[u8] = b"lock";

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::JOURNAL,
        cf::JOURNAL_BY_STATE,
        cf::JOURNAL_BY_OBJECT,
        cf::MAINTENANCE,
    ]
}
