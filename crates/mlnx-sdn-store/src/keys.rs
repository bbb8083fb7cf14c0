//! Key encoding utilities for `RocksDB`.
//!
//! This module provides functions to encode and decode keys for the journal
//! indexes. All keys are designed to support efficient prefix scans.

use chrono::{DateTime, Utc};
use mlnx_sdn_core::RowId;

use crate::types::{JournalRow, JournalState};

/// Length of the `state || last_retried` part of a state index key.
const STATE_PREFIX_LEN: usize = 1 + 8;

/// Encode a row key (just the row ID bytes).
#[must_use]
pub fn row_key(row_id: &RowId) -> Vec<u8> {
    row_id.as_bytes().to_vec()
}

/// Big-endian microseconds since the epoch, clamped at zero so that byte
/// order matches time order.
#[must_use]
pub fn timestamp_bytes(ts: &DateTime<Utc>) -> [u8; 8] {
    u64::try_from(ts.timestamp_micros())
        .unwrap_or(0)
        .to_be_bytes()
}

/// Encode a state index key: `state || last_retried || row_id`.
#[must_use]
pub fn state_row_key(row: &JournalRow) -> Vec<u8> {
    let mut key = Vec::with_capacity(STATE_PREFIX_LEN + 16);
    key.push(row.state.as_u8());
    key.extend_from_slice(&timestamp_bytes(&row.last_retried));
    key.extend_from_slice(row.id.as_bytes());
    key
}

/// Encode a state prefix for scanning all rows in a state.
#[must_use]
pub fn state_prefix(state: JournalState) -> Vec<u8> {
    vec![state.as_u8()]
}

/// Extract the `last_retried` bytes from a state index key.
///
/// Returns `None` if the key is malformed.
#[must_use]
pub fn extract_timestamp_from_state_key(key: &[u8]) -> Option<[u8; 8]> {
    key.get(1..STATE_PREFIX_LEN)?.try_into().ok()
}

/// Extract the row ID from a state index key.
///
/// Returns `None` if the key is malformed.
#[must_use]
pub fn extract_row_id_from_state_key(key: &[u8]) -> Option<RowId> {
    let bytes: [u8; 16] = key.get(STATE_PREFIX_LEN..)?.try_into().ok()?;
    Some(RowId::from_bytes(bytes))
}

/// Encode an object index key: `object_uuid || 0x00 || row_id`.
#[must_use]
pub fn object_row_key(object_uuid: &str, row_id: &RowId) -> Vec<u8> {
    let mut key = object_prefix(object_uuid);
    key.extend_from_slice(row_id.as_bytes());
    key
}

/// Encode an object prefix for scanning all rows of one object.
///
/// The trailing separator keeps `net-1` from matching `net-10`.
#[must_use]
pub fn object_prefix(object_uuid: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(object_uuid.len() + 17);
    key.extend_from_slice(object_uuid.as_bytes());
    key.push(0);
    key
}

/// Extract the row ID from an object index key.
///
/// Returns `None` if the key is malformed.
#[must_use]
pub fn extract_row_id_from_object_key(key: &[u8]) -> Option<RowId> {
    let start = key.len().checked_sub(16)?;
    let bytes: [u8; 16] = key[start..].try_into().ok()?;
    Some(RowId::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FabricType, Operation};
    use chrono::TimeZone;

    fn row_at(micros: i64, state: JournalState) -> JournalRow {
        let ts = Utc.timestamp_micros(micros).unwrap();
        JournalRow {
            id: RowId::generate(),
            object_type: "network".to_string(),
            object_uuid: "net-1".to_string(),
            operation: Operation::Post,
            data: serde_json::Value::Null,
            state,
            created_at: ts,
            last_retried: ts,
            retry_count: 0,
            job_id: None,
            fabric_type: FabricType::Eth,
        }
    }

    #[test]
    fn state_keys_sort_by_time() {
        let older = row_at(1_000, JournalState::Pending);
        let newer = row_at(2_000_000, JournalState::Pending);
        assert!(state_row_key(&older) < state_row_key(&newer));
        assert!(state_row_key(&older).starts_with(&state_prefix(JournalState::Pending)));
    }

    #[test]
    fn state_key_roundtrip() {
        let row = row_at(42, JournalState::Monitoring);
        let key = state_row_key(&row);
        assert_eq!(extract_row_id_from_state_key(&key), Some(row.id));
        assert_eq!(
            extract_timestamp_from_state_key(&key),
            Some(timestamp_bytes(&row.last_retried))
        );
        assert_eq!(extract_row_id_from_state_key(&key[..5]), None);
    }

    #[test]
    fn object_prefix_is_exact() {
        let id = RowId::generate();
        let key = object_row_key("net-10", &id);
        assert!(!key.starts_with(&object_prefix("net-1")));
        assert!(key.starts_with(&object_prefix("net-10")));
        assert_eq!(extract_row_id_from_object_key(&key), Some(id));
    }
}
