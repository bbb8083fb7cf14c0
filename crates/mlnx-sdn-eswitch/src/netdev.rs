//! Network device operations on PFs and their VFs.
//!
//! [`NetDevOps`] is the seam between the registry and the kernel. The real
//! implementation drives iproute2; tests use [`mock::MockNetDev`].

use std::process::{Command, Stdio};

use crate::error::NetDevError;
use crate::types::{AdminState, LinkState};

/// Result of a device operation.
pub type NetDevResult<T> = std::result::Result<T, NetDevError>;

/// Link-level operations on network devices.
pub trait NetDevOps: Send + Sync {
    /// Set the administrative state of VF `vf` on `pf`.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceNotFound` or `Netlink` on failure.
    fn set_vf_admin_state(&self, pf: &str, vf: u32, state: AdminState) -> NetDevResult<()>;

    /// Read the administrative state of VF `vf` on `pf`.
    ///
    /// # Errors
    ///
    /// Returns `AttrNotFound` if the kernel does not report it.
    fn get_vf_admin_state(&self, pf: &str, vf: u32) -> NetDevResult<AdminState>;

    /// Set the link state of a device.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceNotFound` or `Netlink` on failure.
    fn set_link_state(&self, ifname: &str, state: LinkState) -> NetDevResult<()>;

    /// Set both the node and port GUID of VF `vf` on `pf`.
    ///
    /// `guid` is in `xx:xx:xx:xx:xx:xx:xx:xx` form.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceNotFound` or `Netlink` on failure.
    fn set_vf_guid(&self, pf: &str, vf: u32, guid: &str) -> NetDevResult<()>;

    /// Read the node GUID of VF `vf` on `pf`.
    ///
    /// # Errors
    ///
    /// Returns `AttrNotFound` if the kernel does not report it.
    fn get_vf_guid(&self, pf: &str, vf: u32) -> NetDevResult<String>;
}

/// [`NetDevOps`] backed by the `ip` command.
#[derive(Debug, Clone)]
pub struct IpCommand {
    binary: String,
}

impl Default for IpCommand {
    fn default() -> Self {
        Self::new("ip")
    }
}

impl IpCommand {
    /// Use the `ip` binary at `binary`.
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, ifname: &str, args: &[&str]) -> NetDevResult<String> {
        tracing::debug!(binary = %self.binary, ?args, "Running ip command");
        let output = Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| NetDevError::Netlink(format!("failed to spawn {}: {e}", self.binary)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("Cannot find device") || stderr.contains("does not exist") {
                return Err(NetDevError::InterfaceNotFound(ifname.to_string()));
            }
            return Err(NetDevError::Netlink(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn vf_attr(&self, pf: &str, vf: u32, key: &str) -> NetDevResult<String> {
        let dump = self.run(pf, &["link", "show", "dev", pf])?;
        vf_line(&dump, vf)
            .and_then(|line| attr_value(line, key))
            .map(str::to_string)
            .ok_or_else(|| NetDevError::AttrNotFound(format!("{key} for {pf} vf {vf}")))
    }
}

impl NetDevOps for IpCommand {
    fn set_vf_admin_state(&self, pf: &str, vf: u32, state: AdminState) -> NetDevResult<()> {
        let vf = vf.to_string();
        self.run(pf, &["link", "set", "dev", pf, "vf", &vf, "state", state.as_str()])
            .map(|_| ())
    }

    fn get_vf_admin_state(&self, pf: &str, vf: u32) -> NetDevResult<AdminState> {
        let value = self.vf_attr(pf, vf, "link-state")?;
        AdminState::parse(&value).ok_or(NetDevError::UnexpectedAttrValue(value))
    }

    fn set_link_state(&self, ifname: &str, state: LinkState) -> NetDevResult<()> {
        self.run(ifname, &["link", "set", "dev", ifname, state.as_str()])
            .map(|_| ())
    }

    fn set_vf_guid(&self, pf: &str, vf: u32, guid: &str) -> NetDevResult<()> {
        let vf = vf.to_string();
        self.run(pf, &["link", "set", "dev", pf, "vf", &vf, "port_guid", guid])?;
        self.run(pf, &["link", "set", "dev", pf, "vf", &vf, "node_guid", guid])?;
        Ok(())
    }

    fn get_vf_guid(&self, pf: &str, vf: u32) -> NetDevResult<String> {
        self.vf_attr(pf, vf, "NODE_GUID")
    }
}

/// Find the `vf <n> ...` line of an `ip link show` dump.
fn vf_line(dump: &str, vf: u32) -> Option<&str> {
    let wanted = vf.to_string();
    dump.lines().map(str::trim).find(|line| {
        let mut tokens = line.split_whitespace();
        tokens.next() == Some("vf") && tokens.next() == Some(wanted.as_str())
    })
}

/// The token following `key` on a line of comma/space separated attributes.
fn attr_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let mut tokens = line
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty());
    tokens.by_ref().find(|t| *t == key)?;
    tokens.next()
}

/// In-memory device operations for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::{AdminState, LinkState, NetDevError, NetDevOps, NetDevResult};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct State {
        guids: HashMap<(String, u32), String>,
        admin: HashMap<(String, u32), AdminState>,
        links: HashMap<String, LinkState>,
        calls: Vec<String>,
    }

    /// Records every call and keeps VF state in memory.
    #[derive(Default)]
    pub struct MockNetDev {
        state: Mutex<State>,
        guid_ops_fail: bool,
    }

    impl MockNetDev {
        /// Create a mock where every operation succeeds.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Create a mock whose GUID operations fail, forcing sysfs fallbacks.
        #[must_use]
        pub fn without_guid_support() -> Self {
            Self {
                guid_ops_fail: true,
                ..Self::default()
            }
        }

        /// Calls made so far, formatted as `op:args`.
        #[must_use]
        pub fn calls(&self) -> Vec<String> {
            self.state.lock().calls.clone()
        }

        /// Last admin state set on a VF.
        #[must_use]
        pub fn admin_state(&self, pf: &str, vf: u32) -> Option<AdminState> {
            self.state.lock().admin.get(&(pf.to_string(), vf)).copied()
        }

        /// Last link state set on a device.
        #[must_use]
        pub fn link_state(&self, ifname: &str) -> Option<LinkState> {
            self.state.lock().links.get(ifname).copied()
        }

        /// Last GUID set on a VF.
        #[must_use]
        pub fn guid(&self, pf: &str, vf: u32) -> Option<String> {
            self.state.lock().guids.get(&(pf.to_string(), vf)).cloned()
        }
    }

    impl NetDevOps for MockNetDev {
        fn set_vf_admin_state(&self, pf: &str, vf: u32, state: AdminState) -> NetDevResult<()> {
            let mut s = self.state.lock();
            s.calls.push(format!("set_vf_admin_state:{pf}:{vf}:{state}"));
            s.admin.insert((pf.to_string(), vf), state);
            Ok(())
        }

        fn get_vf_admin_state(&self, pf: &str, vf: u32) -> NetDevResult<AdminState> {
            Ok(self
                .state
                .lock()
                .admin
                .get(&(pf.to_string(), vf))
                .copied()
                .unwrap_or(AdminState::Auto))
        }

        fn set_link_state(&self, ifname: &str, state: LinkState) -> NetDevResult<()> {
            let mut s = self.state.lock();
            s.calls
                .push(format!("set_link_state:{ifname}:{}", state.as_str()));
            s.links.insert(ifname.to_string(), state);
            Ok(())
        }

        fn set_vf_guid(&self, pf: &str, vf: u32, guid: &str) -> NetDevResult<()> {
            let mut s = self.state.lock();
            s.calls.push(format!("set_vf_guid:{pf}:{vf}:{guid}"));
            if self.guid_ops_fail {
                return Err(NetDevError::Netlink("operation not supported".into()));
            }
            s.guids.insert((pf.to_string(), vf), guid.to_string());
            Ok(())
        }

        fn get_vf_guid(&self, pf: &str, vf: u32) -> NetDevResult<String> {
            if self.guid_ops_fail {
                return Err(NetDevError::AttrNotFound("IFLA_VF_IB_NODE_GUID".into()));
            }
            self.state
                .lock()
                .guids
                .get(&(pf.to_string(), vf))
                .cloned()
                .ok_or_else(|| NetDevError::AttrNotFound("IFLA_VF_IB_NODE_GUID".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = "\
4: ib0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 4092 qdisc mq state UP mode DEFAULT group default qlen 256
    link/infiniband 80:00:02:08:fe:80:00:00:00:00:00:00:24:8a:07:03:00:a4:3b:1e brd 00:ff:ff:ff:ff:12:40:1b:ff:ff:00:00:00:00:00:00:ff:ff:ff:ff
    vf 0     link/infiniband 80:00:02:08:fe:80:00:00:00:00:00:00:24:8a:07:03:00:a4:3b:1e brd 00:ff:ff:ff:ff:12:40:1b:ff:ff:00:00:00:00:00:00:ff:ff:ff:ff, spoof checking off, NODE_GUID 11:22:33:00:00:44:55:66, PORT_GUID 11:22:33:00:00:44:55:66, link-state disable, trust off, query_rss off
    vf 1     link/infiniband 80:00:02:08:fe:80:00:00:00:00:00:00:24:8a:07:03:00:a4:3b:1e brd 00:ff:ff:ff:ff:12:40:1b:ff:ff:00:00:00:00:00:00:ff:ff:ff:ff, spoof checking off, link-state auto, trust off, query_rss off
";

    #[test]
    fn parses_vf_attributes() {
        let vf0 = vf_line(DUMP, 0).unwrap();
        assert_eq!(attr_value(vf0, "NODE_GUID"), Some("11:22:33:00:00:44:55:66"));
        assert_eq!(attr_value(vf0, "link-state"), Some("disable"));

        let vf1 = vf_line(DUMP, 1).unwrap();
        assert_eq!(attr_value(vf1, "NODE_GUID"), None);
        assert_eq!(attr_value(vf1, "link-state"), Some("auto"));

        assert!(vf_line(DUMP, 2).is_none());
    }

    #[test]
    fn missing_binary_is_netlink_error() {
        let ip = IpCommand::new("/nonexistent/ip");
        let err = ip.set_link_state("ib0", LinkState::Up).unwrap_err();
        assert!(matches!(err, NetDevError::Netlink(_)));
    }

    #[test]
    fn mock_records_calls() {
        let netdev = mock::MockNetDev::new();
        netdev.set_link_state("ib0", LinkState::Up).unwrap();
        netdev
            .set_vf_guid("ib0", 3, "aa:bb:cc:00:00:dd:ee:ff")
            .unwrap();
        assert_eq!(netdev.link_state("ib0"), Some(LinkState::Up));
        assert_eq!(
            netdev.get_vf_guid("ib0", 3).unwrap(),
            "aa:bb:cc:00:00:dd:ee:ff"
        );
        assert_eq!(netdev.calls().len(), 2);

        let failing = mock::MockNetDev::without_guid_support();
        assert!(failing.set_vf_guid("ib0", 3, "x").is_err());
        assert!(matches!(
            failing.get_vf_guid("ib0", 3),
            Err(NetDevError::AttrNotFound(_))
        ));
    }
}
