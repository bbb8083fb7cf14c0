//! Core types and utilities for mlnx-sdn.
//!
//! This crate provides the foundational types shared by the journal synchronizer
//! and the embedded-switch manager:
//!
//! - **Identifiers**: Strongly-typed journal row IDs, PCI slots and MAC addresses
//! - **Error types**: Common error definitions shared across crates
//!
//! # Example
//!
//! ```
//! use mlnx_sdn_core::{MacAddress, PciSlot, RowId};
//!
//! let slot: PciSlot = "0000:03:00.2".parse().unwrap();
//! let mac: MacAddress = "FA:16:3E:00:11:22".parse().unwrap();
//! assert_eq!(mac.to_string(), "fa:16:3e:00:11:22");
//!
//! let row_id = RowId::generate();
//! assert_ne!(row_id, RowId::generate());
//! # let _ = slot;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;

pub use error::{CoreError, Result};
pub use ids::{IdError, MacAddress, PciSlot, RowId};
