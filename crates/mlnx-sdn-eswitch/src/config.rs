//! Embedded switch daemon configuration.
//!
//! Fabrics are given as a comma separated `physnet:pf` list, e.g.
//! `ESWITCH_FABRICS="default:ib0,storage:ib1"`.

use std::path::PathBuf;
use std::time::Duration;

use mlnx_sdn_core::CoreError;
use serde::Deserialize;

/// A physical network served by one PF.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct Fabric {
    /// Physical network name.
    pub physnet: String,
    /// PF netdev name.
    pub pf: String,
}

impl Fabric {
    /// Create a fabric entry.
    #[must_use]
    pub fn new(physnet: impl Into<String>, pf: impl Into<String>) -> Self {
        Self {
            physnet: physnet.into(),
            pf: pf.into(),
        }
    }
}

impl std::str::FromStr for Fabric {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once(':') {
            Some((physnet, pf)) if !physnet.trim().is_empty() && !pf.trim().is_empty() => {
                Ok(Self::new(physnet.trim(), pf.trim()))
            }
            _ => Err(CoreError::config(format!(
                "invalid fabric mapping {s:?}, expected physnet:interface"
            ))),
        }
    }
}

/// Configuration for the eswitch daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct EswitchConfig {
    /// Physnet to PF mappings to manage.
    #[serde(default)]
    pub fabrics: Vec<Fabric>,

    /// Root of the sysfs tree.
    #[serde(default = "EswitchConfig::default_sysfs_root")]
    pub sysfs_root: PathBuf,

    /// iproute2 binary used for link operations.
    #[serde(default = "EswitchConfig::default_ip_binary")]
    pub ip_binary: String,

    /// Interval between VF polls, in milliseconds.
    #[serde(default = "EswitchConfig::default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// A full table sync runs every `max_polling_count` polls.
    #[serde(default = "EswitchConfig::default_max_polling_count")]
    pub max_polling_count: u32,
}

impl EswitchConfig {
    fn default_sysfs_root() -> PathBuf {
        PathBuf::from("/sys")
    }

    fn default_ip_binary() -> String {
        "ip".to_string()
    }

    const fn default_timeout_ms() -> u64 {
        5000
    }

    const fn default_max_polling_count() -> u32 {
        5
    }

    /// Load configuration from `ESWITCH_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` if `ESWITCH_FABRICS` is malformed.
    pub fn from_env() -> Result<Self, CoreError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ESWITCH_FABRICS") {
            config.fabrics = parse_fabrics(&val)?;
        }
        if let Ok(val) = std::env::var("ESWITCH_SYSFS_ROOT") {
            config.sysfs_root = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("ESWITCH_IP_BINARY") {
            config.ip_binary = val;
        }
        if let Ok(val) = std::env::var("ESWITCH_DEFAULT_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                config.default_timeout_ms = n;
            }
        }
        if let Ok(val) = std::env::var("ESWITCH_MAX_POLLING_COUNT") {
            if let Ok(n) = val.parse() {
                config.max_polling_count = n;
            }
        }

        Ok(config)
    }

    /// Check that there is something to manage.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` if no fabrics are configured or a
    /// physnet is mapped twice.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.fabrics.is_empty() {
            return Err(CoreError::config("at least one fabric mapping is required"));
        }
        let mut seen = std::collections::HashSet::new();
        for fabric in &self.fabrics {
            if !seen.insert(fabric.physnet.as_str()) {
                return Err(CoreError::config(format!(
                    "physnet {} is mapped more than once",
                    fabric.physnet
                )));
            }
        }
        Ok(())
    }

    /// Interval between VF polls.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Interval between full table syncs.
    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        self.poll_interval() * self.max_polling_count.max(1)
    }

    /// Configured physnet names.
    #[must_use]
    pub fn physnets(&self) -> Vec<String> {
        self.fabrics.iter().map(|f| f.physnet.clone()).collect()
    }
}

impl Default for EswitchConfig {
    fn default() -> Self {
        Self {
            fabrics: Vec::new(),
            sysfs_root: Self::default_sysfs_root(),
            ip_binary: Self::default_ip_binary(),
            default_timeout_ms: Self::default_timeout_ms(),
            max_polling_count: Self::default_max_polling_count(),
        }
    }
}

/// Parse a `physnet:pf,physnet:pf` list; empty entries are ignored.
///
/// # Errors
///
/// Returns `CoreError::InvalidConfig` for an entry without both parts.
pub fn parse_fabrics(value: &str) -> Result<Vec<Fabric>, CoreError> {
    value
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(str::parse)
        .collect()
}
