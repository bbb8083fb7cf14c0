//! Dependency checks run before a journal row is sent.
//!
//! A row that fails validation goes back to `PENDING` untouched and is
//! retried on a later pass.

use std::sync::Arc;

use mlnx_sdn_store::{JournalRow, JournalStore, Operation};

use crate::error::Result;

/// Resource kind tags used by the built-in rules.
pub mod object_type {
    /// Networks.
    pub const NETWORK: &str = "network";
    /// Subnets.
    pub const SUBNET: &str = "subnet";
    /// Ports.
    pub const PORT: &str = "port";
    /// Router interfaces.
    pub const ROUTER_INTERFACE: &str = "router_interface";
}

/// Decides whether a row's prerequisites are satisfied.
pub trait DependencyValidator: Send + Sync {
    /// Returns `true` if the row may be sent now.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    fn validate(&self, row: &JournalRow) -> Result<bool>;
}

impl<F> DependencyValidator for F
where
    F: Fn(&JournalRow) -> Result<bool> + Send + Sync,
{
    fn validate(&self, row: &JournalRow) -> Result<bool> {
        self(row)
    }
}

/// Store-backed validator implementing per-object ordering and
/// parent/child rules.
///
/// - A row waits for older `PENDING`/`PROCESSING` rows with the same
///   operation on the same object.
/// - A network or subnet `DELETE` waits for pending port/subnet deletes
///   that reference it.
/// - A port or subnet `POST`/`PUT` waits for its network's pending `POST`.
/// - A router interface `DELETE` waits for a pending `ADD` of the same
///   router/subnet pair.
pub struct JournalDependencyValidator<S: JournalStore> {
    store: Arc<S>,
}

impl<S: JournalStore> JournalDependencyValidator<S> {
    /// Create a validator over `store`.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    fn children_pending_delete(&self, row: &JournalRow, children: &[&str]) -> Result<bool> {
        for child in children {
            if self
                .store
                .exists_pending_delete_with_parent(child, &row.object_uuid)?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn network_pending_create(&self, row: &JournalRow) -> Result<bool> {
        let Some(network_id) = field(row, "network_id") else {
            return Ok(false);
        };
        Ok(self
            .store
            .exists_pending_or_processing(network_id, &[Operation::Post])?)
    }

    fn interface_pending_add(&self, row: &JournalRow) -> Result<bool> {
        let (Some(router_id), Some(subnet_id)) = (field(row, "router_id"), field(row, "subnet_id"))
        else {
            return Ok(false);
        };
        Ok(self.store.exists_pending_or_processing_add(
            object_type::ROUTER_INTERFACE,
            &[router_id, subnet_id],
        )?)
    }
}

impl<S: JournalStore> DependencyValidator for JournalDependencyValidator<S> {
    fn validate(&self, row: &JournalRow) -> Result<bool> {
        if self.store.exists_older_operation(row)? {
            return Ok(false);
        }

        let blocked = match (row.object_type.as_str(), row.operation) {
            (object_type::NETWORK, Operation::Delete) => {
                self.children_pending_delete(row, &[object_type::PORT, object_type::SUBNET])?
            }
            (object_type::SUBNET, Operation::Delete) => {
                self.children_pending_delete(row, &[object_type::PORT])?
            }
            (object_type::PORT | object_type::SUBNET, Operation::Post | Operation::Put) => {
                self.network_pending_create(row)?
            }
            (object_type::ROUTER_INTERFACE, Operation::Delete) => self.interface_pending_add(row)?,
            _ => false,
        };
        Ok(!blocked)
    }
}

/// Read a string field from the payload, either at the top level or under
/// the object type key (`{"port": {"network_id": ..}}`).
fn field<'a>(row: &'a JournalRow, name: &str) -> Option<&'a str> {
    row.data
        .get(name)
        .or_else(|| row.data.get(&row.object_type).and_then(|o| o.get(name)))
        .and_then(serde_json::Value::as_str)
}
