//! The embedded switch registry.
//!
//! Each configured physnet maps to one or more [`EmbSwitch`]es, one per PF.
//! A switch's PCI slot to VF index map is read once at discovery and never
//! changes; VF assignment and MACs are always re-read from the host.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use mlnx_sdn_core::{MacAddress, PciSlot};
use parking_lot::RwLock;

use crate::config::Fabric;
use crate::device::{DeviceOps, PfDevice};
use crate::error::{EswitchError, Result};
use crate::types::{AdminState, MELLANOX_VENDOR_ID};

/// All VFs of one PF.
#[derive(Debug)]
pub struct EmbSwitch {
    pf: PfDevice,
    vf_pci_to_idx: BTreeMap<PciSlot, u32>,
}

impl EmbSwitch {
    /// Probe `pf` and enumerate its VFs.
    ///
    /// # Errors
    ///
    /// Returns an error if the PF cannot be probed or its VFs listed.
    pub fn new(ops: DeviceOps, pf: &str) -> Result<Self> {
        let pf = PfDevice::probe(ops, pf)?;
        let vf_pci_to_idx = pf.get_vfs_info()?;
        Ok(Self { pf, vf_pci_to_idx })
    }

    /// The PF behind this switch.
    #[must_use]
    pub fn pf(&self) -> &PfDevice {
        &self.pf
    }

    /// PF netdev name.
    #[must_use]
    pub fn dev_name(&self) -> &str {
        self.pf.net_dev()
    }

    /// VF PCI slots, in slot order.
    pub fn pci_slots(&self) -> impl Iterator<Item = &PciSlot> {
        self.vf_pci_to_idx.keys()
    }

    /// The VF index of `slot`.
    ///
    /// # Errors
    ///
    /// Returns `EswitchError::DeviceNotFound` if the slot is not a VF of this
    /// switch.
    pub fn vf_index(&self, slot: &PciSlot) -> Result<u32> {
        self.vf_pci_to_idx
            .get(slot)
            .copied()
            .ok_or_else(|| EswitchError::DeviceNotFound(slot.to_string()))
    }

    /// `(mac, slot)` for every VF, or only the assigned ones. MACs are read in
    /// one batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the MACs cannot be read.
    pub fn get_devices_info(&self, assigned_only: bool) -> Result<Vec<(MacAddress, PciSlot)>> {
        let vfs: Vec<(u32, &PciSlot)> = self
            .vf_pci_to_idx
            .iter()
            .filter(|(_, vf)| !assigned_only || self.pf.is_assigned_vf(**vf))
            .map(|(slot, vf)| (*vf, slot))
            .collect();
        if vfs.is_empty() {
            return Ok(Vec::new());
        }

        let by_index: HashMap<u32, &PciSlot> = vfs.iter().copied().collect();
        let macs = self.pf.get_vfs_macs(&vfs)?;
        Ok(macs
            .into_iter()
            .filter_map(|(vf, mac)| by_index.get(&vf).map(|slot| (mac, (*slot).clone())))
            .collect())
    }

    /// Admin state of the VF at `slot`.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot is unknown or the state cannot be read.
    pub fn get_device_admin_state(&self, slot: &PciSlot) -> Result<AdminState> {
        let vf = self.vf_index(slot)?;
        self.pf.get_vf_state(vf)
    }

    /// Set the admin state of the VF at `slot`.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot is unknown or the state cannot be set.
    pub fn set_device_admin_state(&self, slot: &PciSlot, state: AdminState) -> Result<()> {
        let vf = self.vf_index(slot)?;
        self.pf.set_vf_state(vf, state)
    }

    /// MAC of the VF at `slot`, or `None` if the VF is not assigned.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot is unknown or the MAC cannot be read.
    pub fn get_device_ib_mac(&self, slot: &PciSlot) -> Result<Option<MacAddress>> {
        let vf = self.vf_index(slot)?;
        if !self.pf.is_assigned_vf(vf) {
            return Ok(None);
        }
        Ok(self.pf.get_vfs_macs(&[(vf, slot)])?.remove(&vf))
    }

    /// Program the VF GUID from `mac`, or invalidate it with `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot is unknown or the GUID cannot be written.
    pub fn set_device_ib_mac(&self, slot: &PciSlot, mac: Option<&MacAddress>) -> Result<()> {
        let vf = self.vf_index(slot)?;
        self.pf.config_vf_mac_address(vf, slot, mac)
    }

    /// Map the VF PKEY to `vlan`.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot is unknown or the PKEY cannot be written.
    pub fn config_vlan_ib(&self, slot: &PciSlot, vlan: u16) -> Result<()> {
        self.vf_index(slot)?;
        self.pf.config_vlan_ib(slot, vlan)
    }
}

#[derive(Default)]
struct Registry {
    switches: HashMap<String, Vec<Arc<EmbSwitch>>>,
    by_slot: HashMap<PciSlot, Arc<EmbSwitch>>,
}

impl Registry {
    fn is_registered(&self, fabric: &Fabric) -> bool {
        self.switches
            .get(&fabric.physnet)
            .is_some_and(|list| list.iter().any(|s| s.dev_name() == fabric.pf))
    }

    fn register(&mut self, physnet: &str, switch: Arc<EmbSwitch>) {
        for slot in switch.pci_slots() {
            self.by_slot.insert(slot.clone(), Arc::clone(&switch));
        }
        self.switches
            .entry(physnet.to_string())
            .or_default()
            .push(switch);
    }

    /// Switches for `physnets`, or all switches when `None`.
    fn select(&self, physnets: Option<&[String]>) -> Vec<Arc<EmbSwitch>> {
        let mut seen = HashSet::new();
        let lists: Vec<&Vec<Arc<EmbSwitch>>> = match physnets {
            Some(names) => names.iter().filter_map(|n| self.switches.get(n)).collect(),
            None => self.switches.values().collect(),
        };
        lists
            .into_iter()
            .flatten()
            .filter(|s| seen.insert(Arc::as_ptr(s)))
            .cloned()
            .collect()
    }
}

/// Maps physnets and VF PCI slots to embedded switches.
pub struct EswitchManager {
    ops: DeviceOps,
    registry: RwLock<Registry>,
}

impl EswitchManager {
    /// Create an empty registry driving hardware through `ops`.
    #[must_use]
    pub fn new(ops: DeviceOps) -> Self {
        Self {
            ops,
            registry: RwLock::new(Registry::default()),
        }
    }

    /// Register a switch for every fabric not registered yet.
    ///
    /// # Errors
    ///
    /// Returns `EswitchError::InvalidPf` if a PF is not an SR-IOV Mellanox
    /// device; the process must not continue half configured. Other errors
    /// come from probing the PF.
    pub fn discover(&self, fabrics: &[Fabric]) -> Result<()> {
        let mut registry = self.registry.write();
        for fabric in fabrics {
            if registry.is_registered(fabric) {
                tracing::debug!(physnet = %fabric.physnet, pf = %fabric.pf, "Embedded switch already registered");
                continue;
            }

            let host = &self.ops.host;
            if !host.is_sriov_pf(&fabric.pf) || !host.verify_vendor(&fabric.pf, MELLANOX_VENDOR_ID) {
                tracing::error!(
                    physnet = %fabric.physnet,
                    pf = %fabric.pf,
                    "PF must have Mellanox vendor ID, SR-IOV and driver module enabled"
                );
                return Err(EswitchError::InvalidPf {
                    device: fabric.pf.clone(),
                });
            }

            let switch = EmbSwitch::new(self.ops.clone(), &fabric.pf)?;
            switch.pf().config_port_up()?;
            tracing::info!(
                physnet = %fabric.physnet,
                pf = %fabric.pf,
                vfs = switch.vf_pci_to_idx.len(),
                device_type = ?switch.pf().device_type(),
                "Registered embedded switch"
            );
            registry.register(&fabric.physnet, Arc::new(switch));
        }
        Ok(())
    }

    fn switch_for(&self, slot: &PciSlot) -> Option<Arc<EmbSwitch>> {
        self.registry.read().by_slot.get(slot).cloned()
    }

    /// Whether `slot` is a VF of a registered switch.
    #[must_use]
    pub fn device_exists(&self, slot: &PciSlot) -> bool {
        self.registry.read().by_slot.contains_key(slot)
    }

    /// Physnets with at least one registered switch.
    #[must_use]
    pub fn physnets(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.read().switches.keys().cloned().collect();
        names.sort();
        names
    }

    /// `(mac, slot)` of every assigned VF on `physnets`, or on all physnets.
    ///
    /// # Errors
    ///
    /// Returns an error if a switch's MACs cannot be read.
    pub fn get_assigned_devices_info(
        &self,
        physnets: Option<&[String]>,
    ) -> Result<HashSet<(MacAddress, PciSlot)>> {
        let switches = self.registry.read().select(physnets);
        let mut devices = HashSet::new();
        for switch in switches {
            devices.extend(switch.get_devices_info(true)?);
        }
        Ok(devices)
    }

    /// The VF carrying `mac` on `physnet`, or on any physnet.
    ///
    /// # Errors
    ///
    /// Returns an error if a switch's MACs cannot be read.
    pub fn get_device_from_mac(&self, mac: &MacAddress, physnet: Option<&str>) -> Result<Option<PciSlot>> {
        let names: Vec<String> = physnet.into_iter().map(str::to_string).collect();
        let switches = self
            .registry
            .read()
            .select(physnet.map(|_| names.as_slice()));
        for switch in switches {
            if let Some((_, slot)) = switch
                .get_devices_info(false)?
                .into_iter()
                .find(|(m, _)| m == mac)
            {
                return Ok(Some(slot));
            }
        }
        Ok(None)
    }

    /// Admin state of the VF at `slot`; unknown slots report `Disable`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be read.
    pub fn get_device_admin_state(&self, slot: &PciSlot) -> Result<AdminState> {
        match self.switch_for(slot) {
            Some(switch) => switch.get_device_admin_state(slot),
            None => Ok(AdminState::Disable),
        }
    }

    /// Set the admin state of the VF at `slot`; unknown slots are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be set.
    pub fn set_device_admin_state(&self, slot: &PciSlot, state: AdminState) -> Result<()> {
        match self.switch_for(slot) {
            Some(switch) => switch.set_device_admin_state(slot, state),
            None => Ok(()),
        }
    }

    /// Program the VF GUID from `mac`; `None` invalidates it and disables
    /// the VF. Unknown slots are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the GUID cannot be written.
    pub fn set_device_ib_mac(&self, slot: &PciSlot, mac: Option<&MacAddress>) -> Result<()> {
        match self.switch_for(slot) {
            Some(switch) => switch.set_device_ib_mac(slot, mac),
            None => Ok(()),
        }
    }

    /// MAC of an assigned VF. `None` for unknown or unassigned slots.
    ///
    /// # Errors
    ///
    /// Returns an error if the MAC cannot be read.
    pub fn get_device_ib_mac(&self, slot: &PciSlot) -> Result<Option<MacAddress>> {
        match self.switch_for(slot) {
            Some(switch) => switch.get_device_ib_mac(slot),
            None => Ok(None),
        }
    }

    /// Map the VF PKEY to `vlan`. Unknown slots are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the PKEY table cannot be written.
    pub fn config_vlan_ib(&self, slot: &PciSlot, vlan: u16) -> Result<()> {
        match self.switch_for(slot) {
            Some(switch) => switch.config_vlan_ib(slot, vlan),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netdev::mock::MockNetDev;
    use crate::pci::fake::FakePf;
    use crate::pci::SysfsHost;
    use crate::sysops::SysfsWriter;
    use crate::types::{DeviceType, LinkState};
    use std::path::Path;
    use tempfile::TempDir;

    const VFS: [&str; 3] = ["0000:03:00.2", "0000:03:00.3", "0000:03:00.4"];

    fn slot(s: &str) -> PciSlot {
        s.parse().unwrap()
    }

    fn mac(s: &str) -> MacAddress {
        s.parse().unwrap()
    }

    fn manager(root: &Path) -> (EswitchManager, Arc<MockNetDev>) {
        let netdev = Arc::new(MockNetDev::new());
        let ops = DeviceOps {
            netdev: netdev.clone(),
            sys: Arc::new(SysfsWriter::new(root)),
            host: Arc::new(SysfsHost::new(root)),
        };
        (EswitchManager::new(ops), netdev)
    }

    /// One mlx5 PF `ib0` on `default` with VF 2 left on the host.
    fn setup() -> (TempDir, EswitchManager, Arc<MockNetDev>) {
        let dir = TempDir::new().unwrap();
        FakePf::new(dir.path(), "ib0", "mlx5_0").create(MELLANOX_VENDOR_ID, DeviceType::Mlx5, &VFS, &[2]);
        let (mgr, netdev) = manager(dir.path());
        mgr.discover(&[Fabric::new("default", "ib0")]).unwrap();
        (dir, mgr, netdev)
    }

    #[test]
    fn discover_registers_vfs() {
        let (_dir, mgr, netdev) = setup();

        assert_eq!(mgr.physnets(), vec!["default".to_string()]);
        for vf in VFS {
            assert!(mgr.device_exists(&slot(vf)));
        }
        assert!(!mgr.device_exists(&slot("0000:04:00.2")));
        assert_eq!(netdev.link_state("ib0"), Some(LinkState::Up));
    }

    #[test]
    fn repeated_discovery_is_stable() {
        let (_dir, mgr, netdev) = setup();
        let before = mgr.switch_for(&slot(VFS[0])).unwrap().vf_pci_to_idx.clone();

        mgr.discover(&[Fabric::new("default", "ib0")]).unwrap();

        let after = mgr.switch_for(&slot(VFS[0])).unwrap().vf_pci_to_idx.clone();
        assert_eq!(before, after);
        assert_eq!(mgr.registry.read().switches["default"].len(), 1);
        let link_ups = netdev
            .calls()
            .iter()
            .filter(|c| c.starts_with("set_link_state"))
            .count();
        assert_eq!(link_ups, 1);
    }

    #[test]
    fn independent_discoveries_agree() {
        let dir = TempDir::new().unwrap();
        let unsorted = ["0000:03:00.4", "0000:03:00.2", "0000:03:00.3"];
        FakePf::new(dir.path(), "ib0", "mlx5_0").create(MELLANOX_VENDOR_ID, DeviceType::Mlx5, &unsorted, &[]);
        let fabrics = [Fabric::new("default", "ib0")];
        let (first, _) = manager(dir.path());
        let (second, _) = manager(dir.path());

        first.discover(&fabrics).unwrap();
        second.discover(&fabrics).unwrap();

        for vf in unsorted {
            let a = first.switch_for(&slot(vf)).unwrap();
            let b = second.switch_for(&slot(vf)).unwrap();
            assert_eq!(a.vf_pci_to_idx, b.vf_pci_to_idx);
        }
        let switch = first.switch_for(&slot(unsorted[0])).unwrap();
        for (idx, vf) in unsorted.iter().enumerate() {
            assert_eq!(switch.vf_index(&slot(vf)).unwrap(), u32::try_from(idx).unwrap());
        }
    }

    #[test]
    fn wrong_vendor_is_fatal() {
        let dir = TempDir::new().unwrap();
        FakePf::new(dir.path(), "p6p1", "mlx5_0").create("0x8086", DeviceType::Mlx5, &VFS, &[]);
        let (mgr, _) = manager(dir.path());

        let err = mgr.discover(&[Fabric::new("physnet1", "p6p1")]).unwrap_err();

        assert!(matches!(err, EswitchError::InvalidPf { ref device } if device == "p6p1"));
        assert!(err.is_fatal());
        assert!(mgr.physnets().is_empty());
        assert!(!mgr.device_exists(&slot(VFS[0])));
    }

    #[test]
    fn missing_pf_is_fatal() {
        let dir = TempDir::new().unwrap();
        let (mgr, _) = manager(dir.path());
        let err = mgr.discover(&[Fabric::new("physnet1", "ib9")]).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn ib_mac_round_trip() {
        let (_dir, mgr, netdev) = setup();
        let vf = slot(VFS[1]);
        let mac = mac("aa:bb:cc:dd:ee:ff");

        mgr.set_device_ib_mac(&vf, Some(&mac)).unwrap();

        assert_eq!(mgr.get_device_ib_mac(&vf).unwrap(), Some(mac));
        assert_eq!(netdev.admin_state("ib0", 1), Some(AdminState::Enable));
        assert_eq!(mgr.get_device_from_mac(&mac, Some("default")).unwrap(), Some(vf.clone()));
        assert_eq!(mgr.get_device_from_mac(&mac, None).unwrap(), Some(vf));
        assert_eq!(mgr.get_device_from_mac(&mac, Some("other")).unwrap(), None);
    }

    #[test]
    fn unassigned_vf_has_no_mac() {
        let (_dir, mgr, _) = setup();
        let vf = slot(VFS[2]);
        mgr.set_device_ib_mac(&vf, Some(&mac("aa:bb:cc:dd:ee:01"))).unwrap();
        assert_eq!(mgr.get_device_ib_mac(&vf).unwrap(), None);
    }

    #[test]
    fn invalidation_is_idempotent() {
        let (_dir, mgr, netdev) = setup();
        let vf = slot(VFS[0]);
        mgr.set_device_ib_mac(&vf, Some(&mac("aa:bb:cc:dd:ee:ff"))).unwrap();

        for _ in 0..2 {
            mgr.set_device_ib_mac(&vf, None).unwrap();
            assert_eq!(netdev.admin_state("ib0", 0), Some(AdminState::Disable));
            assert_eq!(netdev.guid("ib0", 0).as_deref(), Some("ff:ff:ff:ff:ff:ff:ff:ff"));
            assert_eq!(mgr.get_device_admin_state(&vf).unwrap(), AdminState::Disable);
        }
    }

    #[test]
    fn assigned_devices_info() {
        let (_dir, mgr, _) = setup();
        let first = mac("aa:bb:cc:dd:ee:01");
        let second = mac("aa:bb:cc:dd:ee:02");
        mgr.set_device_ib_mac(&slot(VFS[0]), Some(&first)).unwrap();
        mgr.set_device_ib_mac(&slot(VFS[1]), Some(&second)).unwrap();

        let all = mgr.get_assigned_devices_info(None).unwrap();
        let expected: HashSet<(MacAddress, PciSlot)> =
            [(first, slot(VFS[0])), (second, slot(VFS[1]))].into_iter().collect();
        assert_eq!(all, expected);

        let filtered = mgr
            .get_assigned_devices_info(Some(&["default".to_string()]))
            .unwrap();
        assert_eq!(filtered, expected);
        assert!(mgr
            .get_assigned_devices_info(Some(&["other".to_string()]))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn unknown_slot_policies() {
        let (_dir, mgr, netdev) = setup();
        let unknown = slot("0000:09:00.1");
        let calls = netdev.calls().len();

        assert_eq!(mgr.get_device_admin_state(&unknown).unwrap(), AdminState::Disable);
        mgr.set_device_admin_state(&unknown, AdminState::Enable).unwrap();
        mgr.set_device_ib_mac(&unknown, None).unwrap();
        mgr.config_vlan_ib(&unknown, 10).unwrap();
        assert_eq!(mgr.get_device_ib_mac(&unknown).unwrap(), None);
        assert_eq!(netdev.calls().len(), calls);
    }

    #[test]
    fn switch_rejects_foreign_slot() {
        let (_dir, mgr, _) = setup();
        let switch = mgr.switch_for(&slot(VFS[0])).unwrap();
        let err = switch.vf_index(&slot("0000:09:00.1")).unwrap_err();
        assert!(matches!(err, EswitchError::DeviceNotFound(_)));
    }

    #[test]
    fn admin_state_delegates() {
        let (_dir, mgr, netdev) = setup();
        let vf = slot(VFS[1]);
        mgr.set_device_admin_state(&vf, AdminState::Auto).unwrap();
        assert_eq!(netdev.admin_state("ib0", 1), Some(AdminState::Auto));
        assert_eq!(mgr.get_device_admin_state(&vf).unwrap(), AdminState::Auto);
    }
}
