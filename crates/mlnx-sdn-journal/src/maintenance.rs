//! Periodic journal housekeeping.
//!
//! Every interval the worker takes the store-wide maintenance lock and runs
//! the registered operations in order. Only one worker runs maintenance at a
//! time across all processes sharing the store.

use std::sync::Arc;
use std::time::Duration;

use mlnx_sdn_store::{JournalState, JournalStore};

use crate::config::SdnConfig;
use crate::error::{JournalError, Result};

/// A housekeeping task run under the maintenance lock.
pub trait MaintenanceOperation: Send + Sync {
    /// Name recorded in the lock row while the operation runs.
    fn name(&self) -> &str;

    /// Run the operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    fn run(&self, store: &dyn JournalStore) -> Result<()>;
}

/// Deletes `COMPLETED` rows older than the retention period.
#[derive(Debug, Clone, Copy)]
pub struct CompletedRowsCleanup {
    /// `None` keeps completed rows forever.
    pub retention: Option<Duration>,
}

impl MaintenanceOperation for CompletedRowsCleanup {
    fn name(&self) -> &str {
        "delete_completed_rows"
    }

    fn run(&self, store: &dyn JournalStore) -> Result<()> {
        let Some(retention) = self.retention else {
            tracing::debug!("Completed rows are kept forever, skipping cleanup");
            return Ok(());
        };
        let deleted = store.reap_stale_rows(JournalState::Completed, retention)?;
        tracing::info!(deleted, "Deleted completed journal rows");
        Ok(())
    }
}

/// Returns rows stuck in `PROCESSING` to the queue.
#[derive(Debug, Clone, Copy)]
pub struct ProcessingRowsReset {
    /// Age after which a `PROCESSING` row is considered abandoned.
    pub timeout: Duration,
}

impl MaintenanceOperation for ProcessingRowsReset {
    fn name(&self) -> &str {
        "reset_processing_rows"
    }

    fn run(&self, store: &dyn JournalStore) -> Result<()> {
        let reset = store.reset_stuck_processing_rows(self.timeout)?;
        if reset > 0 {
            tracing::warn!(reset, "Reset journal rows stuck in processing");
        }
        Ok(())
    }
}

/// Clears the operation marker and releases the lock when maintenance ends,
/// including by panic.
struct LockGuard<'a> {
    store: &'a dyn JournalStore,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.store.update_maintenance_operation(None) {
            tracing::error!(error = %e, "Failed to clear maintenance operation");
        }
        match self.store.release_maintenance_lock() {
            Ok(true) => tracing::debug!("Maintenance lock released"),
            Ok(false) => tracing::warn!("Maintenance lock was not held at release"),
            Err(e) => tracing::error!(error = %e, "Failed to release maintenance lock"),
        }
    }
}

/// Runs registered maintenance operations on a fixed interval.
pub struct MaintenanceWorker<S: JournalStore> {
    store: Arc<S>,
    interval: Duration,
    operations: Vec<Arc<dyn MaintenanceOperation>>,
}

impl<S: JournalStore + 'static> MaintenanceWorker<S> {
    /// Create a worker with no operations.
    #[must_use]
    pub fn new(store: Arc<S>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            operations: Vec::new(),
        }
    }

    /// Create a worker with the completed-row cleanup and the processing-row
    /// reset configured from `config`.
    #[must_use]
    pub fn with_default_operations(store: Arc<S>, config: &SdnConfig) -> Self {
        let mut worker = Self::new(store, config.maintenance_interval());
        worker.register_operation(Arc::new(CompletedRowsCleanup {
            retention: config.completed_rows_retention(),
        }));
        worker.register_operation(Arc::new(ProcessingRowsReset {
            timeout: config.processing_timeout(),
        }));
        worker
    }

    /// Append an operation; operations run in registration order.
    pub fn register_operation(&mut self, operation: Arc<dyn MaintenanceOperation>) {
        self.operations.push(operation);
    }

    /// Run every operation once if the maintenance lock can be taken.
    ///
    /// Returns `false` if another worker holds the lock. A failing operation
    /// is logged and does not stop the ones after it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock itself cannot be read or written.
    pub fn execute_ops(&self) -> Result<bool> {
        let store: &dyn JournalStore = self.store.as_ref();
        if !store.acquire_maintenance_lock()? {
            tracing::debug!("Maintenance lock held elsewhere, skipping run");
            return Ok(false);
        }
        let _guard = LockGuard { store };

        tracing::info!(operations = self.operations.len(), "Starting journal maintenance");
        for operation in &self.operations {
            let name = operation.name();
            tracing::debug!(operation = name, "Running maintenance operation");
            if let Err(e) = store
                .update_maintenance_operation(Some(name))
                .map_err(JournalError::from)
                .and_then(|()| operation.run(store))
            {
                tracing::error!(operation = name, error = %e, "Maintenance operation failed");
            }
        }
        tracing::info!("Finished journal maintenance");
        Ok(true)
    }

    /// Run maintenance forever on the configured interval.
    pub async fn run(self: Arc<Self>) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Starting journal maintenance loop"
        );
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            let worker = Arc::clone(&self);
            match tokio::task::spawn_blocking(move || worker.execute_ops()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Journal maintenance failed"),
                Err(e) => tracing::error!(error = %e, "Journal maintenance task aborted"),
            }
        }
    }
}
