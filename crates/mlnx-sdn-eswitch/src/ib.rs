//! Per-generation GUID, PKEY and admin-state handling.
//!
//! ConnectX-4 and later ([`Mlx5Guid`]) program VF GUIDs through netlink
//! and fall back to the `sriov` sysfs attributes; invalidation also needs a
//! driver unbind/rebind to take effect. ConnectX-3 ([`Mlx4Guid`]) works
//! through the `iov` sysfs tables and per-VF PKEY indexes.

use std::collections::BTreeMap;

use mlnx_sdn_core::{MacAddress, PciSlot};

use crate::device::PfDevice;
use crate::error::Result;
use crate::guid::{is_invalid_guid, mac_from_guid, mlx4_guid, mlx5_guid};
use crate::types::{AdminState, DeviceType};

/// PKEY index value that detaches a VF from any partition.
const INVALID_PKEY: &str = "none";
/// VF PKEY index holding the data partition.
const DEFAULT_PKEY_IDX: &str = "0";
/// VF PKEY index holding the management partition.
const PARTIAL_PKEY_IDX: &str = "1";
/// The default full-membership PKEY.
const DEFAULT_PKEY: u16 = 0xffff;
/// Low 15 bits of a PKEY; the top bit is the membership flag.
const PKEY_MASK: u16 = 0x7fff;

/// Device-generation specific VF operations.
pub trait GuidStrategy: Send + Sync {
    /// The generation handled.
    fn device_type(&self) -> DeviceType;

    /// The GUID to program for `mac`, or the invalid GUID for `None`.
    fn guid_from_mac(&self, mac: Option<&MacAddress>) -> String;

    /// Program or invalidate the GUID of a VF.
    ///
    /// # Errors
    ///
    /// Returns an error if the GUID cannot be written.
    fn set_vf_mac(&self, pf: &PfDevice, vf: u32, slot: &PciSlot, mac: Option<&MacAddress>) -> Result<()>;

    /// Read the MACs of the given VFs.
    ///
    /// # Errors
    ///
    /// Returns an error if a GUID cannot be read or parsed.
    fn get_vfs_macs(&self, pf: &PfDevice, vfs: &[(u32, &PciSlot)]) -> Result<BTreeMap<u32, MacAddress>>;

    /// Map the VF's PKEY to `vlan`.
    ///
    /// # Errors
    ///
    /// Returns an error if the PKEY table cannot be written.
    fn config_vlan(&self, pf: &PfDevice, slot: &PciSlot, vlan: u16) -> Result<()>;

    /// Read the VF admin state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be read.
    fn get_admin_state(&self, pf: &PfDevice, vf: u32) -> Result<AdminState>;

    /// Set the VF admin state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be set.
    fn set_admin_state(&self, pf: &PfDevice, vf: u32, state: AdminState) -> Result<()>;
}

/// ConnectX-3 handling.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mlx4Guid;

/// ConnectX-4+ handling.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mlx5Guid;

static MLX4: Mlx4Guid = Mlx4Guid;
static MLX5: Mlx5Guid = Mlx5Guid;

/// The strategy for a device generation.
#[must_use]
pub fn strategy_for(device_type: DeviceType) -> &'static dyn GuidStrategy {
    match device_type {
        DeviceType::Mlx4 => &MLX4,
        DeviceType::Mlx5 => &MLX5,
    }
}

impl Mlx4Guid {
    fn config_vf_pkey(pf: &PfDevice, slot: &PciSlot, pkey_idx: &str, value: &str) -> Result<()> {
        let path = pf
            .ops
            .paths()
            .mlx4_pkey_idx(pf.mlx_dev(), slot, pf.hca_port(), pkey_idx);
        pf.ops.sys.sys_write(&path, value)?;
        Ok(())
    }

    fn guid_idx(pf: &PfDevice, slot: &PciSlot) -> Result<String> {
        let path = pf.ops.paths().mlx4_gid_idx(pf.mlx_dev(), slot, pf.hca_port());
        pf.ops.host.read_attr(&path)
    }

    /// Index in the port PKEY table whose partition number matches `pkey`.
    fn find_pkey_idx(pf: &PfDevice, pkey: u16) -> Result<Option<String>> {
        let dir = pf.ops.paths().pkeys(pf.mlx_dev(), pf.hca_port());
        // An unreadable table has no matching entry.
        let Ok(entries) = pf.ops.host.list_dir(&dir) else {
            return Ok(None);
        };
        for idx in entries {
            let raw = pf.ops.host.read_attr(&dir.join(&idx))?;
            let Ok(value) = u16::from_str_radix(raw.trim_start_matches("0x"), 16) else {
                continue;
            };
            if value & PKEY_MASK == pkey & PKEY_MASK {
                return Ok(Some(idx));
            }
        }
        Ok(None)
    }
}

impl GuidStrategy for Mlx4Guid {
    fn device_type(&self) -> DeviceType {
        DeviceType::Mlx4
    }

    fn guid_from_mac(&self, mac: Option<&MacAddress>) -> String {
        mlx4_guid(mac)
    }

    fn set_vf_mac(&self, pf: &PfDevice, vf: u32, slot: &PciSlot, mac: Option<&MacAddress>) -> Result<()> {
        let guid = self.guid_from_mac(mac);
        Self::config_vf_pkey(pf, slot, DEFAULT_PKEY_IDX, INVALID_PKEY)?;

        if let Err(e) = pf.ops.netdev.set_vf_guid(pf.net_dev(), vf, &guid) {
            tracing::info!(pf = pf.net_dev(), vf, error = %e, "Failed to set VF GUID via netlink, using sysfs");
            let guid_idx = Self::guid_idx(pf, slot)?;
            let path = pf
                .ops
                .paths()
                .mlx4_admin_guids(pf.mlx_dev(), pf.hca_port())
                .join(guid_idx);
            pf.ops.sys.sys_write(&path, &guid)?;
        }

        match Self::find_pkey_idx(pf, DEFAULT_PKEY)? {
            Some(idx) => Self::config_vf_pkey(pf, slot, PARTIAL_PKEY_IDX, &idx)?,
            None => tracing::error!(
                mlx_dev = pf.mlx_dev(),
                vf = %slot,
                "Can't find partial management pkey"
            ),
        }
        Ok(())
    }

    fn get_vfs_macs(&self, pf: &PfDevice, vfs: &[(u32, &PciSlot)]) -> Result<BTreeMap<u32, MacAddress>> {
        let guids = pf.ops.paths().mlx4_admin_guids(pf.mlx_dev(), pf.hca_port());
        let mut macs = BTreeMap::new();
        for &(vf, slot) in vfs {
            let guid_idx = Self::guid_idx(pf, slot)?;
            let guid = pf.ops.host.read_attr(&guids.join(guid_idx))?;
            let mac = if is_invalid_guid(&guid) {
                MacAddress::ZERO
            } else {
                mac_from_guid(&guid)?
            };
            macs.insert(vf, mac);
        }
        Ok(macs)
    }

    fn config_vlan(&self, pf: &PfDevice, slot: &PciSlot, vlan: u16) -> Result<()> {
        let pkey = if vlan == 0 { DEFAULT_PKEY } else { vlan };
        match Self::find_pkey_idx(pf, pkey)? {
            Some(idx) => Self::config_vf_pkey(pf, slot, DEFAULT_PKEY_IDX, &idx),
            None => {
                tracing::warn!(mlx_dev = pf.mlx_dev(), vlan, "No PKEY table entry for VLAN");
                Ok(())
            }
        }
    }

    fn get_admin_state(&self, _pf: &PfDevice, _vf: u32) -> Result<AdminState> {
        Ok(AdminState::Auto)
    }

    fn set_admin_state(&self, pf: &PfDevice, vf: u32, state: AdminState) -> Result<()> {
        tracing::warn!(
            pf = pf.net_dev(),
            vf,
            %state,
            "Changing VF admin state for MLX4 device is not supported"
        );
        Ok(())
    }
}

impl Mlx5Guid {
    fn read_guid(pf: &PfDevice, vf: u32) -> Result<String> {
        match pf.ops.netdev.get_vf_guid(pf.net_dev(), vf) {
            Ok(guid) => Ok(guid),
            Err(e) => {
                tracing::debug!(pf = pf.net_dev(), vf, error = %e, "VF GUID not available via netlink, using sysfs");
                pf.ops
                    .host
                    .read_attr(&pf.ops.paths().mlx5_guid_node(pf.mlx_dev(), vf))
            }
        }
    }
}

impl GuidStrategy for Mlx5Guid {
    fn device_type(&self) -> DeviceType {
        DeviceType::Mlx5
    }

    fn guid_from_mac(&self, mac: Option<&MacAddress>) -> String {
        mlx5_guid(mac)
    }

    fn set_vf_mac(&self, pf: &PfDevice, vf: u32, slot: &PciSlot, mac: Option<&MacAddress>) -> Result<()> {
        let guid = self.guid_from_mac(mac);

        if let Err(e) = pf.ops.netdev.set_vf_guid(pf.net_dev(), vf, &guid) {
            tracing::info!(pf = pf.net_dev(), vf, error = %e, "Failed to set VF GUID via netlink, using sysfs");
            let paths = pf.ops.paths();
            for path in [
                paths.mlx5_guid_node(pf.mlx_dev(), vf),
                paths.mlx5_guid_port(pf.mlx_dev(), vf),
            ] {
                pf.ops.sys.sys_write(&path, &guid)?;
            }
        }

        if mac.is_none() {
            pf.ops
                .netdev
                .set_vf_admin_state(pf.net_dev(), vf, AdminState::Disable)?;
            let paths = pf.ops.paths();
            pf.ops
                .sys
                .sys_write(&paths.unbind(DeviceType::Mlx5), slot.as_str())?;
            pf.ops
                .sys
                .sys_write(&paths.bind(DeviceType::Mlx5), slot.as_str())?;
        } else {
            pf.ops
                .netdev
                .set_vf_admin_state(pf.net_dev(), vf, AdminState::Enable)?;
        }
        Ok(())
    }

    fn get_vfs_macs(&self, pf: &PfDevice, vfs: &[(u32, &PciSlot)]) -> Result<BTreeMap<u32, MacAddress>> {
        let mut macs = BTreeMap::new();
        for &(vf, _) in vfs {
            let guid = Self::read_guid(pf, vf)?;
            macs.insert(vf, mac_from_guid(&guid)?);
        }
        Ok(macs)
    }

    fn config_vlan(&self, _pf: &PfDevice, _slot: &PciSlot, _vlan: u16) -> Result<()> {
        Ok(())
    }

    fn get_admin_state(&self, pf: &PfDevice, vf: u32) -> Result<AdminState> {
        Ok(pf.ops.netdev.get_vf_admin_state(pf.net_dev(), vf)?)
    }

    fn set_admin_state(&self, pf: &PfDevice, vf: u32, state: AdminState) -> Result<()> {
        Ok(pf.ops.netdev.set_vf_admin_state(pf.net_dev(), vf, state)?)
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
    use crate::types::MELLANOX_VENDOR_ID;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    const VF: &str = "0000:03:00.2";

    fn ops(root: &Path, netdev: Arc<MockNetDev>) -> DeviceOps {
        DeviceOps {
            netdev,
            sys: Arc::new(SysfsWriter::new(root)),
            host: Arc::new(SysfsHost::new(root)),
        }
    }

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap().trim().to_string()
    }

    fn mac() -> MacAddress {
        "aa:bb:cc:dd:ee:ff".parse().unwrap()
    }

    #[test]
    fn mlx5_falls_back_to_sysfs() {
        let dir = TempDir::new().unwrap();
        FakePf::new(dir.path(), "ib0", "mlx5_0").create(MELLANOX_VENDOR_ID, DeviceType::Mlx5, &[VF], &[]);
        let netdev = Arc::new(MockNetDev::without_guid_support());
        let pf = PfDevice::probe(ops(dir.path(), Arc::clone(&netdev)), "ib0").unwrap();
        let slot: PciSlot = VF.parse().unwrap();

        pf.config_vf_mac_address(0, &slot, Some(&mac())).unwrap();

        let paths = pf.ops.paths();
        assert_eq!(read(&paths.mlx5_guid_node("mlx5_0", 0)), "aa:bb:cc:00:00:dd:ee:ff");
        assert_eq!(read(&paths.mlx5_guid_port("mlx5_0", 0)), "aa:bb:cc:00:00:dd:ee:ff");
        assert_eq!(netdev.admin_state("ib0", 0), Some(AdminState::Enable));

        let macs = pf.get_vfs_macs(&[(0, &slot)]).unwrap();
        assert_eq!(macs.get(&0), Some(&mac()));
    }

    #[test]
    fn mlx5_invalidation_rebinds_vf() {
        let dir = TempDir::new().unwrap();
        FakePf::new(dir.path(), "ib0", "mlx5_0").create(MELLANOX_VENDOR_ID, DeviceType::Mlx5, &[VF], &[]);
        let netdev = Arc::new(MockNetDev::new());
        let pf = PfDevice::probe(ops(dir.path(), Arc::clone(&netdev)), "ib0").unwrap();
        let slot: PciSlot = VF.parse().unwrap();

        pf.config_vf_mac_address(0, &slot, None).unwrap();

        assert_eq!(netdev.guid("ib0", 0).as_deref(), Some("ff:ff:ff:ff:ff:ff:ff:ff"));
        assert_eq!(netdev.admin_state("ib0", 0), Some(AdminState::Disable));
        let paths = pf.ops.paths();
        assert_eq!(read(&paths.unbind(DeviceType::Mlx5)), VF);
        assert_eq!(read(&paths.bind(DeviceType::Mlx5)), VF);
    }

    #[test]
    fn mlx4_sets_guid_and_pkeys() {
        let dir = TempDir::new().unwrap();
        let fake = FakePf::new(dir.path(), "ib1", "mlx4_0");
        fake.create(MELLANOX_VENDOR_ID, DeviceType::Mlx4, &[VF], &[]);
        fake.create_pkeys(1, &["0x8001", "0xffff", "0x0064"]);
        let netdev = Arc::new(MockNetDev::without_guid_support());
        let pf = PfDevice::probe(ops(dir.path(), netdev), "ib1").unwrap();
        let slot: PciSlot = VF.parse().unwrap();

        pf.config_vf_mac_address(0, &slot, Some(&mac())).unwrap();

        let paths = pf.ops.paths();
        assert_eq!(
            read(&paths.mlx4_admin_guids("mlx4_0", 1).join("1")),
            "aabbcc0000ddeeff"
        );
        assert_eq!(read(&paths.mlx4_pkey_idx("mlx4_0", &slot, 1, "0")), "none");
        assert_eq!(read(&paths.mlx4_pkey_idx("mlx4_0", &slot, 1, "1")), "1");
        assert_eq!(pf.get_vfs_macs(&[(0, &slot)]).unwrap().get(&0), Some(&mac()));

        pf.config_vlan_ib(&slot, 100).unwrap();
        assert_eq!(read(&paths.mlx4_pkey_idx("mlx4_0", &slot, 1, "0")), "2");
        pf.config_vlan_ib(&slot, 0).unwrap();
        assert_eq!(read(&paths.mlx4_pkey_idx("mlx4_0", &slot, 1, "0")), "1");

        pf.config_vf_mac_address(0, &slot, None).unwrap();
        assert_eq!(
            pf.get_vfs_macs(&[(0, &slot)]).unwrap().get(&0),
            Some(&MacAddress::ZERO)
        );
    }

    #[test]
    fn mlx4_without_pkey_table_keeps_guid() {
        let dir = TempDir::new().unwrap();
        FakePf::new(dir.path(), "ib1", "mlx4_0").create(MELLANOX_VENDOR_ID, DeviceType::Mlx4, &[VF], &[]);
        let netdev = Arc::new(MockNetDev::without_guid_support());
        let pf = PfDevice::probe(ops(dir.path(), netdev), "ib1").unwrap();
        let slot: PciSlot = VF.parse().unwrap();

        pf.config_vf_mac_address(0, &slot, Some(&mac())).unwrap();

        let paths = pf.ops.paths();
        assert_eq!(
            read(&paths.mlx4_admin_guids("mlx4_0", 1).join("1")),
            "aabbcc0000ddeeff"
        );
        assert_eq!(read(&paths.mlx4_pkey_idx("mlx4_0", &slot, 1, "1")), "none");
        pf.config_vlan_ib(&slot, 100).unwrap();
        assert_eq!(read(&paths.mlx4_pkey_idx("mlx4_0", &slot, 1, "0")), "none");
    }

    #[test]
    fn mlx4_admin_state_follows_port() {
        let dir = TempDir::new().unwrap();
        FakePf::new(dir.path(), "ib1", "mlx4_0").create(MELLANOX_VENDOR_ID, DeviceType::Mlx4, &[VF], &[]);
        let netdev = Arc::new(MockNetDev::new());
        let pf = PfDevice::probe(ops(dir.path(), Arc::clone(&netdev)), "ib1").unwrap();

        pf.set_vf_state(0, AdminState::Enable).unwrap();
        assert_eq!(netdev.admin_state("ib1", 0), None);
        assert_eq!(pf.get_vf_state(0).unwrap(), AdminState::Auto);
    }

    #[test]
    fn strategies_by_device_type() {
        assert_eq!(strategy_for(DeviceType::Mlx4).device_type(), DeviceType::Mlx4);
        assert_eq!(strategy_for(DeviceType::Mlx5).device_type(), DeviceType::Mlx5);
        assert_eq!(
            strategy_for(DeviceType::Mlx4).guid_from_mac(None),
            crate::guid::MLX4_INVALID_GUID
        );
    }
}
