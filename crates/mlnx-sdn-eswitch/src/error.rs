//! Error types for the eswitch crate.

use mlnx_sdn_core::{CoreError, IdError};
use thiserror::Error;

/// Errors raised by netlink-style device operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetDevError {
    /// The network interface does not exist.
    #[error("Network interface {0} not found")]
    InterfaceNotFound(String),

    /// The command failed.
    #[error("Failed to execute netlink command: {0}")]
    Netlink(String),

    /// A required attribute is missing from the device dump.
    #[error("Required netlink attribute was not found: {0}")]
    AttrNotFound(String),

    /// An attribute had a value we cannot interpret.
    #[error("Unexpected netlink attribute value: {0}")]
    UnexpectedAttrValue(String),
}

/// Errors raised by sysfs writes.
#[derive(Error, Debug)]
pub enum SysOpsError {
    /// The path is outside the system filesystem root.
    #[error("Invalid system path provided: {0}")]
    InvalidPath(String),

    /// Opening or writing the file failed.
    #[error("Failed to perform system operation: {0}")]
    System(#[from] std::io::Error),
}

/// Errors that can occur during embedded switch operations.
#[derive(Error, Debug)]
pub enum EswitchError {
    /// The PF is not an SR-IOV capable Mellanox device.
    #[error("PF {device} must have Mellanox vendor ID, SR-IOV and driver module enabled")]
    InvalidPf {
        /// PF network device name.
        device: String,
    },

    /// No VF index is known for the PCI slot.
    #[error("Cannot find vf index for pci slot {0}")]
    DeviceNotFound(String),

    /// The PF's driver is neither `mlx4_core` nor `mlx5_core`.
    #[error("Driver type {0} is not supported")]
    UnsupportedDriver(String),

    /// A GUID string could not be parsed.
    #[error("Invalid GUID format: {0}")]
    InvalidGuidFormat(String),

    /// A host attribute could not be read.
    #[error("Cannot read {path}: {reason}")]
    HostRead {
        /// Path that was read.
        path: String,
        /// What went wrong.
        reason: String,
    },

    /// Device operation error.
    #[error(transparent)]
    NetDev(#[from] NetDevError),

    /// Sysfs write error.
    #[error(transparent)]
    SysOps(#[from] SysOpsError),

    /// Network lookup through the cache source failed.
    #[error("Network {0} not found")]
    NetworkNotFound(String),

    /// Invalid identifier or configuration.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<IdError> for EswitchError {
    fn from(e: IdError) -> Self {
        Self::Core(CoreError::from(e))
    }
}

impl EswitchError {
    /// Whether the error means the process must not keep running.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidPf { .. } | Self::Core(_))
    }

    pub(crate) fn host_read(path: &std::path::Path, reason: impl std::fmt::Display) -> Self {
        Self::HostRead {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

/// A specialized Result type for eswitch operations.
pub type Result<T> = std::result::Result<T, EswitchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(EswitchError::InvalidPf {
            device: "p6p1".into()
        }
        .is_fatal());
        assert!(!EswitchError::DeviceNotFound("0000:03:00.1".into()).is_fatal());
        assert!(!EswitchError::from(NetDevError::Netlink("EPERM".into())).is_fatal());
    }

    #[test]
    fn messages_name_the_device() {
        let err = EswitchError::InvalidPf {
            device: "p6p1".into(),
        };
        assert!(err.to_string().contains("p6p1"));
        let err = EswitchError::from(NetDevError::InterfaceNotFound("ib0".into()));
        assert_eq!(err.to_string(), "Network interface ib0 not found");
    }
}
