//! A PF and the host capabilities used to drive it.

use std::collections::BTreeMap;
use std::sync::Arc;

use mlnx_sdn_core::{MacAddress, PciSlot};

use crate::error::Result;
use crate::ib::{strategy_for, GuidStrategy};
use crate::netdev::{IpCommand, NetDevOps};
use crate::pci::{HostPci, SysfsHost, SysfsPaths};
use crate::sysops::{SysOps, SysfsWriter};
use crate::types::{AdminState, DeviceType, LinkState};

/// The injected host capabilities.
#[derive(Clone)]
pub struct DeviceOps {
    /// Link and VF operations.
    pub netdev: Arc<dyn NetDevOps>,
    /// Sysfs writes.
    pub sys: Arc<dyn SysOps>,
    /// Sysfs and PCI reads.
    pub host: Arc<dyn HostPci>,
}

impl DeviceOps {
    /// Real capabilities: iproute2 for link operations, sysfs at `root`.
    #[must_use]
    pub fn system(root: &std::path::Path, ip_binary: &str) -> Self {
        Self {
            netdev: Arc::new(IpCommand::new(ip_binary)),
            sys: Arc::new(SysfsWriter::new(root)),
            host: Arc::new(SysfsHost::new(root)),
        }
    }

    /// The sysfs path layout.
    #[must_use]
    pub fn paths(&self) -> &SysfsPaths {
        self.host.paths()
    }
}

/// A probed physical function.
#[derive(Clone)]
pub struct PfDevice {
    pub(crate) ops: DeviceOps,
    net_dev: String,
    mlx_dev: String,
    hca_port: u32,
    device_type: DeviceType,
}

impl std::fmt::Debug for PfDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PfDevice")
            .field("net_dev", &self.net_dev)
            .field("mlx_dev", &self.mlx_dev)
            .field("hca_port", &self.hca_port)
            .field("device_type", &self.device_type)
            .finish_non_exhaustive()
    }
}

impl PfDevice {
    /// Resolve the mlx device, HCA port and device type of `net_dev`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mlx device or driver cannot be determined.
    pub fn probe(ops: DeviceOps, net_dev: &str) -> Result<Self> {
        let mlx_dev = ops.host.get_pf_mlx_dev(net_dev)?;
        let device_type = ops.host.get_pf_device_type(net_dev)?;
        let hca_port = ops.host.get_eth_port(net_dev).unwrap_or_else(|| {
            tracing::warn!(pf = net_dev, "No dev_id for PF, assuming HCA port 1");
            1
        });
        tracing::debug!(pf = net_dev, mlx_dev = %mlx_dev, hca_port, ?device_type, "Probed PF");
        Ok(Self {
            ops,
            net_dev: net_dev.to_string(),
            mlx_dev,
            hca_port,
            device_type,
        })
    }

    /// PF netdev name.
    #[must_use]
    pub fn net_dev(&self) -> &str {
        &self.net_dev
    }

    /// InfiniBand device name.
    #[must_use]
    pub fn mlx_dev(&self) -> &str {
        &self.mlx_dev
    }

    /// HCA port number.
    #[must_use]
    pub const fn hca_port(&self) -> u32 {
        self.hca_port
    }

    /// Hardware generation.
    #[must_use]
    pub const fn device_type(&self) -> DeviceType {
        self.device_type
    }

    fn strategy(&self) -> &'static dyn GuidStrategy {
        strategy_for(self.device_type)
    }

    /// VF PCI slot to index map.
    ///
    /// # Errors
    ///
    /// Returns an error if the VFs cannot be enumerated.
    pub fn get_vfs_info(&self) -> Result<BTreeMap<PciSlot, u32>> {
        self.ops.host.get_vfs_info(&self.net_dev)
    }

    /// Whether VF `vf` is assigned to a guest.
    #[must_use]
    pub fn is_assigned_vf(&self, vf: u32) -> bool {
        self.ops.host.is_assigned_vf(&self.net_dev, vf)
    }

    /// MACs of the given VFs, keyed by VF index.
    ///
    /// # Errors
    ///
    /// Returns an error if a GUID cannot be read or parsed.
    pub fn get_vfs_macs(&self, vfs: &[(u32, &PciSlot)]) -> Result<BTreeMap<u32, MacAddress>> {
        self.strategy().get_vfs_macs(self, vfs)
    }

    /// Admin state of VF `vf`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be read.
    pub fn get_vf_state(&self, vf: u32) -> Result<AdminState> {
        self.strategy().get_admin_state(self, vf)
    }

    /// Set the admin state of VF `vf`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be set.
    pub fn set_vf_state(&self, vf: u32, state: AdminState) -> Result<()> {
        self.strategy().set_admin_state(self, vf, state)
    }

    /// Bring the PF link up.
    ///
    /// # Errors
    ///
    /// Returns an error if the link cannot be set.
    pub fn config_port_up(&self) -> Result<()> {
        self.ops.netdev.set_link_state(&self.net_dev, LinkState::Up)?;
        Ok(())
    }

    /// Program (or with `None`, invalidate) the GUID of a VF.
    ///
    /// # Errors
    ///
    /// Returns an error if both the netlink path and the sysfs fallback fail.
    pub fn config_vf_mac_address(&self, vf: u32, slot: &PciSlot, mac: Option<&MacAddress>) -> Result<()> {
        self.strategy().set_vf_mac(self, vf, slot, mac)
    }

    /// Map a VF's PKEY to `vlan`.
    ///
    /// # Errors
    ///
    /// Returns an error if the PKEY table cannot be written.
    pub fn config_vlan_ib(&self, slot: &PciSlot, vlan: u16) -> Result<()> {
        self.strategy().config_vlan(self, slot, vlan)
    }
}
