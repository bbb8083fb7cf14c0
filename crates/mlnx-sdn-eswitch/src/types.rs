//! Types for the eswitch crate.

use serde::{Deserialize, Serialize};

/// PCI vendor ID of Mellanox devices.
pub const MELLANOX_VENDOR_ID: &str = "0x15b3";

/// VLAN used to release a port back to the untagged PKEY.
pub const UNTAGGED_VLAN_ID: u16 = 4095;

/// Administrative state of a VF as understood by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminState {
    /// Link forced up.
    Enable,
    /// Link forced down.
    Disable,
    /// Link follows the physical port.
    Auto,
}

impl AdminState {
    /// The `ip link` keyword for this state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Auto => "auto",
        }
    }

    /// Parse an `ip link` keyword.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "enable" => Some(Self::Enable),
            "disable" => Some(Self::Disable),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

impl std::fmt::Display for AdminState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Link state of a network device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// Interface up.
    Up,
    /// Interface down.
    Down,
}

impl LinkState {
    /// The `ip link` keyword for this state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

/// Hardware generation of a PF, selected by its kernel driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    /// ConnectX-3 family (`mlx4_core`).
    Mlx4,
    /// ConnectX-4 and later (`mlx5_core`).
    Mlx5,
}

impl DeviceType {
    /// Map a kernel driver name to a device type.
    #[must_use]
    pub fn from_driver(driver: &str) -> Option<Self> {
        match driver {
            "mlx4_core" => Some(Self::Mlx4),
            "mlx5_core" => Some(Self::Mlx5),
            _ => None,
        }
    }

    /// The kernel driver bound to devices of this type.
    #[must_use]
    pub const fn driver(self) -> &'static str {
        match self {
            Self::Mlx4 => "mlx4_core",
            Self::Mlx5 => "mlx5_core",
        }
    }
}
