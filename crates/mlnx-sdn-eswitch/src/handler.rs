//! Port-level operations used by the agent on top of [`EswitchManager`].

use std::collections::BTreeMap;
use std::sync::Arc;

use mlnx_sdn_core::{MacAddress, PciSlot};
use serde::Serialize;

use crate::config::Fabric;
use crate::error::Result;
use crate::manager::EswitchManager;
use crate::types::{AdminState, UNTAGGED_VLAN_ID};

/// An assigned VF as reported to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Vnic {
    /// MAC derived from the VF GUID.
    pub mac: MacAddress,
    /// VF PCI address.
    pub pci_slot: PciSlot,
}

/// Header row of every eswitch table.
pub const TABLE_HEADER: [&str; 2] = ["MAC", "PCI"];

/// Agent-facing wrapper around the switch registry.
#[derive(Clone)]
pub struct EswitchHandler {
    manager: Arc<EswitchManager>,
}

impl EswitchHandler {
    /// Create a handler over `manager`.
    #[must_use]
    pub fn new(manager: Arc<EswitchManager>) -> Self {
        Self { manager }
    }

    /// The registry behind this handler.
    #[must_use]
    pub fn manager(&self) -> &Arc<EswitchManager> {
        &self.manager
    }

    /// Discover and register `fabrics`.
    ///
    /// # Errors
    ///
    /// Returns the discovery error; `InvalidPf` is fatal.
    pub fn add_fabrics(&self, fabrics: &[Fabric]) -> Result<()> {
        self.manager.discover(fabrics)
    }

    /// Assigned VFs on `physnets` (or all), keyed by PCI slot.
    ///
    /// # Errors
    ///
    /// Returns an error if VF MACs cannot be read.
    pub fn get_vnics(&self, physnets: Option<&[String]>) -> Result<BTreeMap<PciSlot, Vnic>> {
        let vnics: BTreeMap<PciSlot, Vnic> = self
            .manager
            .get_assigned_devices_info(physnets)?
            .into_iter()
            .map(|(mac, pci_slot)| (pci_slot.clone(), Vnic { mac, pci_slot }))
            .collect();
        tracing::info!(count = vnics.len(), "Collected assigned vnics");
        Ok(vnics)
    }

    /// Program `mac` on the VF at `slot`.
    ///
    /// # Errors
    ///
    /// Returns an error if the GUID cannot be written.
    pub fn plug_nic(&self, mac: &MacAddress, slot: &PciSlot) -> Result<PciSlot> {
        self.manager.set_device_ib_mac(slot, Some(mac))?;
        tracing::info!(%mac, pci_slot = %slot, "Plugged vnic");
        Ok(slot.clone())
    }

    /// Invalidate the VF carrying `mac` on `physnet`. Returns the VF slot, or
    /// `None` if no VF carries the MAC.
    ///
    /// # Errors
    ///
    /// Returns an error if the VF cannot be found or invalidated.
    pub fn delete_port(&self, physnet: &str, mac: &MacAddress) -> Result<Option<PciSlot>> {
        let slot = self.manager.get_device_from_mac(mac, Some(physnet))?;
        match &slot {
            Some(slot) => self.manager.set_device_ib_mac(slot, None)?,
            None => tracing::warn!(%mac, physnet, "MAC address not found in eswitch"),
        }
        Ok(slot)
    }

    /// Remove per-port configuration other than MAC and admin state by
    /// resetting the PKEY to untagged. Returns whether cleanup succeeded.
    #[must_use]
    pub fn port_release(&self, slot: &PciSlot) -> bool {
        self.set_vlan(Some(slot), UNTAGGED_VLAN_ID)
    }

    /// Enable the VF at `slot`.
    ///
    /// # Errors
    ///
    /// Returns an error if the admin state cannot be set.
    pub fn port_up(&self, slot: &PciSlot) -> Result<()> {
        self.manager.set_device_admin_state(slot, AdminState::Enable)
    }

    /// Disable the VF at `slot`.
    ///
    /// # Errors
    ///
    /// Returns an error if the admin state cannot be set.
    pub fn port_down(&self, slot: &PciSlot) -> Result<()> {
        self.manager.set_device_admin_state(slot, AdminState::Disable)
    }

    /// Map the VF PKEY to `vlan`. Failures are logged; returns whether the
    /// PKEY was configured.
    #[must_use]
    pub fn set_vlan(&self, slot: Option<&PciSlot>, vlan: u16) -> bool {
        let Some(slot) = slot else {
            tracing::debug!("No PCI device provided");
            return false;
        };
        match self.manager.config_vlan_ib(slot, vlan) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(pci_slot = %slot, vlan, error = %e, "Set VLAN operation failed");
                false
            }
        }
    }

    /// Per-physnet tables of assigned VFs, each starting with
    /// [`TABLE_HEADER`].
    ///
    /// # Errors
    ///
    /// Returns an error if VF MACs cannot be read.
    pub fn get_eswitch_tables(&self, physnets: &[String]) -> Result<BTreeMap<String, Vec<[String; 2]>>> {
        let mut tables = BTreeMap::new();
        for physnet in physnets {
            let mut rows: Vec<[String; 2]> = self
                .manager
                .get_assigned_devices_info(Some(std::slice::from_ref(physnet)))?
                .into_iter()
                .map(|(mac, slot)| [mac.to_string(), slot.to_string()])
                .collect();
            rows.sort();
            let mut table = vec![TABLE_HEADER.map(str::to_string)];
            table.extend(rows);
            tables.insert(physnet.clone(), table);
        }
        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceOps;
    use crate::netdev::mock::MockNetDev;
    use crate::pci::fake::FakePf;
    use crate::pci::SysfsHost;
    use crate::sysops::SysfsWriter;
    use crate::types::{DeviceType, MELLANOX_VENDOR_ID};
    use std::path::Path;
    use tempfile::TempDir;

    const VFS: [&str; 2] = ["0000:81:00.1", "0000:81:00.2"];

    fn slot(s: &str) -> PciSlot {
        s.parse().unwrap()
    }

    fn mac(s: &str) -> MacAddress {
        s.parse().unwrap()
    }

    fn handler(root: &Path, netdev: Arc<MockNetDev>) -> EswitchHandler {
        let ops = DeviceOps {
            netdev,
            sys: Arc::new(SysfsWriter::new(root)),
            host: Arc::new(SysfsHost::new(root)),
        };
        EswitchHandler::new(Arc::new(EswitchManager::new(ops)))
    }

    /// One mlx4 PF `ib1` on `ib` with a PKEY table holding 0xffff and 0x8064.
    fn mlx4_setup() -> (TempDir, EswitchHandler, Arc<MockNetDev>) {
        let dir = TempDir::new().unwrap();
        let fake = FakePf::new(dir.path(), "ib1", "mlx4_0");
        fake.create(MELLANOX_VENDOR_ID, DeviceType::Mlx4, &VFS, &[]);
        fake.create_pkeys(1, &["0xffff", "0x8064", "0x0fff"]);
        let netdev = Arc::new(MockNetDev::without_guid_support());
        let h = handler(dir.path(), Arc::clone(&netdev));
        h.add_fabrics(&[Fabric::new("ib", "ib1")]).unwrap();
        (dir, h, netdev)
    }

    fn pkey_idx(dir: &TempDir, vf: &str) -> String {
        let path = dir
            .path()
            .join(format!("class/infiniband/mlx4_0/iov/{vf}/ports/1/pkey_idx/0"));
        std::fs::read_to_string(path).unwrap().trim().to_string()
    }

    #[test]
    fn plug_and_delete_port() {
        let (_dir, h, _) = mlx4_setup();
        let vf = slot(VFS[0]);
        let vnic_mac = mac("fa:16:3e:00:00:01");

        assert_eq!(h.plug_nic(&vnic_mac, &vf).unwrap(), vf);

        let vnics = h.get_vnics(None).unwrap();
        assert_eq!(
            vnics.get(&vf),
            Some(&Vnic {
                mac: vnic_mac,
                pci_slot: vf.clone()
            })
        );

        assert_eq!(h.delete_port("ib", &vnic_mac).unwrap(), Some(vf.clone()));
        assert_eq!(h.manager().get_device_ib_mac(&vf).unwrap(), Some(MacAddress::ZERO));
        assert_eq!(h.delete_port("ib", &vnic_mac).unwrap(), None);
    }

    #[test]
    fn set_vlan_and_release() {
        let (dir, h, _) = mlx4_setup();
        let vf = slot(VFS[1]);

        assert!(h.set_vlan(Some(&vf), 100));
        assert_eq!(pkey_idx(&dir, VFS[1]), "1");

        assert!(h.port_release(&vf));
        assert_eq!(pkey_idx(&dir, VFS[1]), "2");

        assert!(!h.set_vlan(None, 100));
    }

    #[test]
    fn set_vlan_failure_is_reported() {
        let (dir, h, _) = mlx4_setup();
        std::fs::remove_file(
            dir.path()
                .join(format!("class/infiniband/mlx4_0/iov/{}/ports/1/pkey_idx/0", VFS[0])),
        )
        .unwrap();
        assert!(!h.set_vlan(Some(&slot(VFS[0])), 100));
    }

    #[test]
    fn port_up_and_down() {
        let dir = TempDir::new().unwrap();
        FakePf::new(dir.path(), "ib0", "mlx5_0").create(MELLANOX_VENDOR_ID, DeviceType::Mlx5, &VFS, &[]);
        let netdev = Arc::new(MockNetDev::new());
        let h = handler(dir.path(), Arc::clone(&netdev));
        h.add_fabrics(&[Fabric::new("default", "ib0")]).unwrap();

        h.port_up(&slot(VFS[1])).unwrap();
        assert_eq!(netdev.admin_state("ib0", 1), Some(AdminState::Enable));
        h.port_down(&slot(VFS[1])).unwrap();
        assert_eq!(netdev.admin_state("ib0", 1), Some(AdminState::Disable));
    }

    #[test]
    fn eswitch_tables() {
        let (_dir, h, _) = mlx4_setup();
        h.plug_nic(&mac("fa:16:3e:00:00:02"), &slot(VFS[1])).unwrap();

        let tables = h
            .get_eswitch_tables(&["ib".to_string(), "none".to_string()])
            .unwrap();

        let ib = &tables["ib"];
        assert_eq!(ib[0], ["MAC".to_string(), "PCI".to_string()]);
        assert_eq!(ib.len(), 3);
        assert!(ib.contains(&["fa:16:3e:00:00:02".to_string(), VFS[1].to_string()]));
        assert_eq!(tables["none"].len(), 1);
    }
}
