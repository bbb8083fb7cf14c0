//! Embedded switch registry for Mellanox SR-IOV `InfiniBand` NICs.
//!
//! Every configured physnet maps to a PF; the PF's virtual functions form an
//! embedded switch. The registry resolves VF PCI slots to VF indexes and
//! drives VF GUIDs (derived from MACs), PKEYs and admin state through
//! injected host capabilities, so it runs the same against real sysfs and
//! iproute2 or against a fake tree in tests.
//!
//! # Architecture
//!
//! ```text
//!   EswitchHandler ──► EswitchManager ──► EmbSwitch (one per PF)
//!                                            │
//!                                            ▼
//!                                        PfDevice ──► GuidStrategy
//!                                            │          (Mlx4Guid / Mlx5Guid)
//!                                            ▼
//!                     DeviceOps { NetDevOps, SysOps, HostPci }
//! ```
//!
//! # Device Generations
//!
//! - ConnectX-3 (`mlx4_core`): GUIDs and PKEYs through the `iov` sysfs
//!   tables; VF admin state follows the port.
//! - ConnectX-4 and later (`mlx5_core`): GUIDs through netlink with a sysfs
//!   fallback; invalidating a GUID disables and rebinds the VF.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use mlnx_sdn_eswitch::{DeviceOps, EswitchManager, Fabric};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ops = DeviceOps::system(std::path::Path::new("/sys"), "ip");
//! let manager = Arc::new(EswitchManager::new(ops));
//! manager.discover(&[Fabric::new("default", "ib0")])?;
//!
//! for (mac, slot) in manager.get_assigned_devices_info(None)? {
//!     println!("{slot} {mac}");
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod device;
pub mod error;
pub mod guid;
pub mod handler;
pub mod ib;
pub mod manager;
pub mod netdev;
pub mod network_cache;
pub mod pci;
pub mod sysops;
pub mod types;

pub use config::{EswitchConfig, Fabric};
pub use device::{DeviceOps, PfDevice};
pub use error::{EswitchError, NetDevError, Result, SysOpsError};
pub use handler::{EswitchHandler, Vnic};
pub use ib::{GuidStrategy, Mlx4Guid, Mlx5Guid};
pub use manager::{EmbSwitch, EswitchManager};
pub use netdev::{IpCommand, NetDevOps};
pub use network_cache::{Network, NetworkCache, NetworkFilter, NetworkSource};
pub use pci::{HostPci, SysfsHost, SysfsPaths};
pub use sysops::{SysOps, SysfsWriter};
pub use types::{AdminState, DeviceType, LinkState};

// Re-export commonly used types from dependencies for convenience
pub use mlnx_sdn_core::{MacAddress, PciSlot};
