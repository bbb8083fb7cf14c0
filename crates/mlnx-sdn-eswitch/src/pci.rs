//! Host PCI and sysfs inspection.
//!
//! All paths are built by [`SysfsPaths`] from a configurable root so the
//! registry can be driven against a fake sysfs tree.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use mlnx_sdn_core::PciSlot;

use crate::error::{EswitchError, Result};
use crate::types::DeviceType;

/// Layout of the sysfs attributes used by the registry.
#[derive(Debug, Clone)]
pub struct SysfsPaths {
    root: PathBuf,
}

impl SysfsPaths {
    /// Paths under `root` (normally `/sys`).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The sysfs root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `class/net/<ifname>`
    #[must_use]
    pub fn net_dev(&self, ifname: &str) -> PathBuf {
        self.root.join("class/net").join(ifname)
    }

    /// `class/net/<ifname>/device`
    #[must_use]
    pub fn net_pci_dev(&self, ifname: &str) -> PathBuf {
        self.net_dev(ifname).join("device")
    }

    /// `class/infiniband/<mlx_dev>`
    #[must_use]
    pub fn ib_dev(&self, mlx_dev: &str) -> PathBuf {
        self.root.join("class/infiniband").join(mlx_dev)
    }

    /// ConnectX-3 admin GUID table for a port.
    #[must_use]
    pub fn mlx4_admin_guids(&self, mlx_dev: &str, port: u32) -> PathBuf {
        self.ib_dev(mlx_dev)
            .join(format!("iov/ports/{port}/admin_guids"))
    }

    /// ConnectX-3 GID index assigned to a VF.
    #[must_use]
    pub fn mlx4_gid_idx(&self, mlx_dev: &str, vf: &PciSlot, port: u32) -> PathBuf {
        self.ib_dev(mlx_dev)
            .join(format!("iov/{vf}/ports/{port}/gid_idx/0"))
    }

    /// ConnectX-3 VF PKEY index slot.
    #[must_use]
    pub fn mlx4_pkey_idx(&self, mlx_dev: &str, vf: &PciSlot, port: u32, idx: &str) -> PathBuf {
        self.ib_dev(mlx_dev)
            .join(format!("iov/{vf}/ports/{port}/pkey_idx/{idx}"))
    }

    /// Port PKEY table.
    #[must_use]
    pub fn pkeys(&self, mlx_dev: &str, port: u32) -> PathBuf {
        self.ib_dev(mlx_dev).join(format!("ports/{port}/pkeys"))
    }

    /// ConnectX-4+ VF node GUID attribute.
    #[must_use]
    pub fn mlx5_guid_node(&self, mlx_dev: &str, vf: u32) -> PathBuf {
        self.ib_dev(mlx_dev)
            .join(format!("device/sriov/{vf}/node"))
    }

    /// ConnectX-4+ VF port GUID attribute.
    #[must_use]
    pub fn mlx5_guid_port(&self, mlx_dev: &str, vf: u32) -> PathBuf {
        self.ib_dev(mlx_dev)
            .join(format!("device/sriov/{vf}/port"))
    }

    /// Driver unbind attribute.
    #[must_use]
    pub fn unbind(&self, device_type: DeviceType) -> PathBuf {
        self.driver_dir(device_type).join("unbind")
    }

    /// Driver bind attribute.
    #[must_use]
    pub fn bind(&self, device_type: DeviceType) -> PathBuf {
        self.driver_dir(device_type).join("bind")
    }

    fn driver_dir(&self, device_type: DeviceType) -> PathBuf {
        self.root.join("bus/pci/drivers").join(device_type.driver())
    }
}

/// Read access to host PCI state.
pub trait HostPci: Send + Sync {
    /// Path layout used by this host.
    fn paths(&self) -> &SysfsPaths;

    /// Whether `pf` exists and has SR-IOV VFs.
    fn is_sriov_pf(&self, pf: &str) -> bool;

    /// Whether the PCI vendor of `pf` is `vendor`.
    fn verify_vendor(&self, pf: &str, vendor: &str) -> bool;

    /// Map of VF PCI slot to VF index.
    ///
    /// # Errors
    ///
    /// Returns an error if the PF device directory cannot be read.
    fn get_vfs_info(&self, pf: &str) -> Result<BTreeMap<PciSlot, u32>>;

    /// The InfiniBand (mlx) device backing `pf`.
    ///
    /// # Errors
    ///
    /// Returns an error if no mlx device is found.
    fn get_pf_mlx_dev(&self, pf: &str) -> Result<String>;

    /// HCA port number of `pf` (`dev_id + 1`).
    fn get_eth_port(&self, pf: &str) -> Option<u32>;

    /// Device generation from the bound driver.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedDriver` for non-Mellanox drivers.
    fn get_pf_device_type(&self, pf: &str) -> Result<DeviceType>;

    /// Whether VF `vf` of `pf` is assigned to a guest, i.e. has no host
    /// netdev.
    fn is_assigned_vf(&self, pf: &str, vf: u32) -> bool;

    /// First line of an attribute file, trimmed.
    ///
    /// # Errors
    ///
    /// Returns `HostRead` if the file cannot be read.
    fn read_attr(&self, path: &Path) -> Result<String>;

    /// Sorted entry names of a directory.
    ///
    /// # Errors
    ///
    /// Returns `HostRead` if the directory cannot be listed.
    fn list_dir(&self, path: &Path) -> Result<Vec<String>>;
}

/// [`HostPci`] reading a sysfs tree.
#[derive(Debug, Clone)]
pub struct SysfsHost {
    paths: SysfsPaths,
}

impl SysfsHost {
    /// Inspect the sysfs tree at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            paths: SysfsPaths::new(root),
        }
    }

    fn virtfns(&self, pf: &str) -> Vec<(u32, PathBuf)> {
        let dev = self.paths.net_pci_dev(pf);
        self.list_dir(&dev)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|name| {
                let vf = name.strip_prefix("virtfn")?.parse().ok()?;
                Some((vf, dev.join(name)))
            })
            .collect()
    }
}

impl HostPci for SysfsHost {
    fn paths(&self) -> &SysfsPaths {
        &self.paths
    }

    fn is_sriov_pf(&self, pf: &str) -> bool {
        !self.virtfns(pf).is_empty()
    }

    fn verify_vendor(&self, pf: &str, vendor: &str) -> bool {
        self.read_attr(&self.paths.net_pci_dev(pf).join("vendor"))
            .is_ok_and(|found| found == vendor)
    }

    fn get_vfs_info(&self, pf: &str) -> Result<BTreeMap<PciSlot, u32>> {
        let mut vfs = BTreeMap::new();
        for (vf, link) in self.virtfns(pf) {
            let target = std::fs::read_link(&link).map_err(|e| EswitchError::host_read(&link, e))?;
            let Some(name) = target.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            vfs.insert(name.parse::<PciSlot>()?, vf);
        }
        tracing::info!(pf, vfs = vfs.len(), "Read VFs info");
        Ok(vfs)
    }

    fn get_pf_mlx_dev(&self, pf: &str) -> Result<String> {
        let dir = self.paths.net_pci_dev(pf).join("infiniband");
        self.list_dir(&dir)?
            .pop()
            .ok_or_else(|| EswitchError::host_read(&dir, "no mlx device"))
    }

    fn get_eth_port(&self, pf: &str) -> Option<u32> {
        let raw = self.read_attr(&self.paths.net_dev(pf).join("dev_id")).ok()?;
        let dev_id = match raw.strip_prefix("0x") {
            Some(digits) => u32::from_str_radix(digits, 16).ok()?,
            None => raw.parse().ok()?,
        };
        dev_id.checked_add(1)
    }

    fn get_pf_device_type(&self, pf: &str) -> Result<DeviceType> {
        let link = self.paths.net_pci_dev(pf).join("driver");
        let target = std::fs::read_link(&link).map_err(|e| EswitchError::host_read(&link, e))?;
        let driver = target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        DeviceType::from_driver(driver).ok_or_else(|| EswitchError::UnsupportedDriver(driver.to_string()))
    }

    fn is_assigned_vf(&self, pf: &str, vf: u32) -> bool {
        if !self.is_sriov_pf(pf) {
            return false;
        }
        !self
            .paths
            .net_pci_dev(pf)
            .join(format!("virtfn{vf}/net"))
            .exists()
    }

    fn read_attr(&self, path: &Path) -> Result<String> {
        let content = std::fs::read_to_string(path).map_err(|e| EswitchError::host_read(path, e))?;
        Ok(content.lines().next().unwrap_or_default().trim().to_string())
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(path).map_err(|e| EswitchError::host_read(path, e))?;
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        Ok(names)
    }
}

/// Builders for fake sysfs trees.
#[cfg(any(test, feature = "test-utils"))]
pub mod fake {
    use std::fs;
    use std::path::{Path, PathBuf};

    use crate::types::DeviceType;

    /// Writes a minimal sysfs layout for one PF and its VFs.
    pub struct FakePf<'a> {
        root: &'a Path,
        /// PF netdev name.
        pub name: String,
        /// mlx device name.
        pub mlx_dev: String,
        /// `dev_id` contents.
        pub dev_id: String,
    }

    impl<'a> FakePf<'a> {
        /// Describe a PF under `root`.
        #[must_use]
        pub fn new(root: &'a Path, name: &str, mlx_dev: &str) -> Self {
            Self {
                root,
                name: name.to_string(),
                mlx_dev: mlx_dev.to_string(),
                dev_id: "0x0".to_string(),
            }
        }

        fn dev(&self) -> PathBuf {
            self.root.join("class/net").join(&self.name).join("device")
        }

        fn write(path: &Path, value: &str) {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, value).unwrap();
        }

        /// Create the PF with `vendor` and `device_type`'s driver, and one
        /// VF per slot. VFs in `unassigned` keep a host netdev.
        ///
        /// # Panics
        ///
        /// Panics if the tree cannot be written.
        pub fn create(&self, vendor: &str, device_type: DeviceType, vfs: &[&str], unassigned: &[u32]) {
            let dev = self.dev();
            fs::create_dir_all(dev.join("infiniband").join(&self.mlx_dev)).unwrap();
            Self::write(&dev.join("vendor"), &format!("{vendor}\n"));
            Self::write(
                &self.root.join("class/net").join(&self.name).join("dev_id"),
                &format!("{}\n", self.dev_id),
            );

            let drivers = self.root.join("bus/pci/drivers").join(device_type.driver());
            fs::create_dir_all(&drivers).unwrap();
            Self::write(&drivers.join("bind"), "");
            Self::write(&drivers.join("unbind"), "");
            std::os::unix::fs::symlink(&drivers, dev.join("driver")).unwrap();

            for (vf, slot) in vfs.iter().enumerate() {
                let pci = self.root.join("bus/pci/devices").join(slot);
                fs::create_dir_all(&pci).unwrap();
                let vf = u32::try_from(vf).unwrap();
                if unassigned.contains(&vf) {
                    fs::create_dir_all(pci.join("net")).unwrap();
                }
                std::os::unix::fs::symlink(&pci, dev.join(format!("virtfn{vf}"))).unwrap();
                self.create_vf_attrs(device_type, vf, slot);
            }
        }

        fn create_vf_attrs(&self, device_type: DeviceType, vf: u32, slot: &str) {
            let ib = self.root.join("class/infiniband").join(&self.mlx_dev);
            match device_type {
                DeviceType::Mlx5 => {
                    let sriov = ib.join(format!("device/sriov/{vf}"));
                    Self::write(&sriov.join("node"), "00:00:00:00:00:00:00:00\n");
                    Self::write(&sriov.join("port"), "00:00:00:00:00:00:00:00\n");
                }
                DeviceType::Mlx4 => {
                    let port = 1;
                    let guid_idx = vf + 1;
                    Self::write(
                        &ib.join(format!("iov/ports/{port}/admin_guids/{guid_idx}")),
                        "0000000000000000\n",
                    );
                    let vf_dir = ib.join(format!("iov/{slot}/ports/{port}"));
                    Self::write(&vf_dir.join("gid_idx/0"), &format!("{guid_idx}\n"));
                    Self::write(&vf_dir.join("pkey_idx/0"), "0\n");
                    Self::write(&vf_dir.join("pkey_idx/1"), "none\n");
                }
            }
        }

        /// Write the port PKEY table, one entry per index.
        ///
        /// # Panics
        ///
        /// Panics if the table cannot be written.
        pub fn create_pkeys(&self, port: u32, pkeys: &[&str]) {
            let dir = self
                .root
                .join("class/infiniband")
                .join(&self.mlx_dev)
                .join(format!("ports/{port}/pkeys"));
            for (idx, pkey) in pkeys.iter().enumerate() {
                Self::write(&dir.join(idx.to_string()), &format!("{pkey}\n"));
            }
        }
    }
}
