//! Journal synchronizer for the Mellanox SDN controller.
//!
//! Network state changes are recorded as journal rows and replayed to the
//! controller's REST API in the background, so the caller never waits on the
//! controller and nothing is lost while it is unreachable.
//!
//! # Architecture
//!
//! ```text
//!   record() ──► ┌──────────────────┐ set_sync_event()
//!                │   JournalStore   │◄──────────────┐
//!                │    (RocksDB)     │               │
//!                └──────────────────┘               │
//!                  ▲              ▲                 │
//!                  │              │                 │
//!        ┌─────────┴──────┐ ┌─────┴──────────────┐  │
//!        │ JournalSyncer  │ │ MaintenanceWorker  │  │
//!        │ pending → REST │ │ cleanup / reset    │  │
//!        │ monitor jobs   │ │ (store-wide lock)  │  │
//!        └───────┬────────┘ └────────────────────┘  │
//!                ▼                                  │
//!          ┌───────────┐                            │
//!          │ SdnClient │ ── 501 / 404 / job id ─────┘
//!          └───────────┘
//! ```
//!
//! # Row Lifecycle
//!
//! - `PENDING` → `PROCESSING` when the syncer claims the row
//! - `PROCESSING` → `COMPLETED` (501, or 404 on delete), `MONITORING` (job
//!   id returned), `PENDING` (skipped or retried) or `FAILED` (retries
//!   exhausted)
//! - `MONITORING` → `COMPLETED` or `PENDING`
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use mlnx_sdn_journal::{
//!     JournalDependencyValidator, JournalSyncer, NoopSdnClient, SdnConfig,
//! };
//! use mlnx_sdn_store::{NewJournalRow, Operation, RocksStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/mlnx-sdn")?);
//! let config = SdnConfig::default();
//! let validator = Arc::new(JournalDependencyValidator::new(Arc::clone(&store)));
//! let syncer = JournalSyncer::new(store, Arc::new(NoopSdnClient::new()), validator, &config);
//!
//! syncer.record(NewJournalRow::new(
//!     "network",
//!     "net-1",
//!     Operation::Post,
//!     serde_json::json!({"id": "net-1"}),
//! ))?;
//! syncer.run_once().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod config;
pub mod error;
pub mod maintenance;
pub mod sync;
pub mod validation;

pub use client::{HttpSdnClient, NoopSdnClient, SdnClient, SdnResponse};
pub use config::SdnConfig;
pub use error::{JournalError, Result, SdnError};
pub use maintenance::{
    CompletedRowsCleanup, MaintenanceOperation, MaintenanceWorker, ProcessingRowsReset,
};
pub use sync::JournalSyncer;
pub use validation::{DependencyValidator, JournalDependencyValidator};

// Re-export commonly used types from dependencies for convenience
pub use mlnx_sdn_store::{FabricType, JournalRow, JournalState, NewJournalRow, Operation};
