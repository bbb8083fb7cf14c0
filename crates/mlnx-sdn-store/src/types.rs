//! Domain types stored in the database.
//!
//! These types represent the persisted state of journal rows and the
//! maintenance lock.

use chrono::{DateTime, Utc};
use mlnx_sdn_core::RowId;
use serde::{Deserialize, Serialize};

/// A journal row: one state-change operation destined for the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRow {
    /// Unique identifier for the row.
    pub id: RowId,
    /// Resource kind tag, e.g. `network` or `port`.
    pub object_type: String,
    /// Identifier of the managed resource.
    pub object_uuid: String,
    /// Operation to replay against the controller.
    pub operation: Operation,
    /// JSON payload sent with the request.
    pub data: serde_json::Value,
    /// Current position in the sync state machine.
    pub state: JournalState,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Bumped on every state transition; the pending queue is ordered by it.
    pub last_retried: DateTime<Utc>,
    /// Number of failed submissions so far.
    pub retry_count: u32,
    /// Controller job correlating an accepted request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Fabric the resource lives on.
    #[serde(default)]
    pub fabric_type: FabricType,
}

impl JournalRow {
    /// Whether the payload mentions `needle` as a key or as a string value,
    /// at any nesting depth.
    #[must_use]
    pub fn data_contains(&self, needle: &str) -> bool {
        fn walk(value: &serde_json::Value, needle: &str) -> bool {
            match value {
                serde_json::Value::String(s) => s == needle,
                serde_json::Value::Array(items) => items.iter().any(|v| walk(v, needle)),
                serde_json::Value::Object(map) => {
                    map.iter().any(|(k, v)| k == needle || walk(v, needle))
                }
                _ => false,
            }
        }
        walk(&self.data, needle)
    }

    /// Whether every id in `ids` is one of the payload's top-level values.
    #[must_use]
    pub fn data_values_include_all(&self, ids: &[&str]) -> bool {
        let Some(map) = self.data.as_object() else {
            return false;
        };
        ids.iter()
            .all(|id| map.values().any(|v| v.as_str() == Some(*id)))
    }
}

/// Parameters for recording a new operation.
#[derive(Debug, Clone)]
pub struct NewJournalRow {
    /// Resource kind tag.
    pub object_type: String,
    /// Identifier of the managed resource.
    pub object_uuid: String,
    /// Operation to replay.
    pub operation: Operation,
    /// JSON payload.
    pub data: serde_json::Value,
    /// Fabric the resource lives on.
    pub fabric_type: FabricType,
}

impl NewJournalRow {
    /// Create a new row description on the default (Ethernet) fabric.
    pub fn new(
        object_type: impl Into<String>,
        object_uuid: impl Into<String>,
        operation: Operation,
        data: serde_json::Value,
    ) -> Self {
        Self {
            object_type: object_type.into(),
            object_uuid: object_uuid.into(),
            operation,
            data,
            fabric_type: FabricType::default(),
        }
    }

    /// Set the fabric type.
    #[must_use]
    pub const fn with_fabric(mut self, fabric_type: FabricType) -> Self {
        self.fabric_type = fabric_type;
        self
    }
}

/// Operations a journal row can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    /// Create a resource.
    Post,
    /// Update a resource.
    Put,
    /// Delete a resource.
    Delete,
    /// Attach a sub-resource, e.g. a router interface.
    Add,
}

impl Operation {
    /// Whether the operation creates a resource (the request path carries no
    /// object id).
    #[must_use]
    pub const fn is_creation(self) -> bool {
        matches!(self, Self::Post | Self::Add)
    }

    /// Upper-case wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Add => "ADD",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sync states for a journal row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum JournalState {
    /// Waiting to be picked up.
    Pending = 1,
    /// Owned by a sync worker.
    Processing = 2,
    /// Accepted by the controller; job status is being polled.
    Monitoring = 3,
    /// Done.
    Completed = 4,
    /// Retries exhausted. Terminal.
    Failed = 5,
}

impl JournalState {
    /// Convert the state to its numeric representation.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Try to convert a numeric value to a `JournalState`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Pending),
            2 => Some(Self::Processing),
            3 => Some(Self::Monitoring),
            4 => Some(Self::Completed),
            5 => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether `self -> next` is an edge of the row state machine.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (
                    Self::Processing,
                    Self::Completed | Self::Failed | Self::Monitoring | Self::Pending
                )
                | (Self::Monitoring, Self::Completed | Self::Pending)
        )
    }
}

impl std::fmt::Display for JournalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Monitoring => "monitoring",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Network fabric a journal row targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FabricType {
    /// Ethernet.
    #[default]
    Eth,
    /// `InfiniBand`.
    Ib,
}

/// Upper bound on submission retries for one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryLimit {
    /// Never fail a row because of retries.
    Unlimited,
    /// Fail a row once it has been retried this many times.
    Max(u32),
}

impl RetryLimit {
    /// Build a limit from a configured count, where any negative value means
    /// unlimited.
    #[must_use]
    pub fn from_config(count: i64) -> Self {
        u32::try_from(count).map_or(Self::Unlimited, Self::Max)
    }

    /// Whether a row with `retry_count` retries has used up its budget.
    #[must_use]
    pub const fn is_exhausted(self, retry_count: u32) -> bool {
        match self {
            Self::Unlimited => false,
            Self::Max(max) => retry_count >= max,
        }
    }
}

/// State of the singleton maintenance lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockState {
    /// Free.
    Pending,
    /// Held by a maintenance run.
    Processing,
}

/// The singleton maintenance lock record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceLock {
    /// Lock state.
    pub state: LockState,
    /// Name of the maintenance operation currently running, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_operation: Option<String>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Default for MaintenanceLock {
    fn default() -> Self {
        Self {
            state: LockState::Pending,
            processing_operation: None,
            updated_at: Utc::now(),
        }
    }
}
