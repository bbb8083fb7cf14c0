//! Conversions between Ethernet MACs and InfiniBand VF GUIDs.
//!
//! A VF GUID embeds the MAC with two zero bytes in the middle:
//! `aa:bb:cc:dd:ee:ff` becomes `aa:bb:cc:00:00:dd:ee:ff`. ConnectX-3 writes
//! GUIDs as sixteen bare hex digits, later generations in colon form.

use mlnx_sdn_core::MacAddress;

use crate::error::{EswitchError, Result};

/// GUID that invalidates a ConnectX-3 VF.
pub const MLX4_INVALID_GUID: &str = "ffffffffffffffff";

/// GUID that invalidates a ConnectX-4+ VF.
pub const MLX5_INVALID_GUID: &str = "ff:ff:ff:ff:ff:ff:ff:ff";

fn embed(mac: &MacAddress) -> [u8; 8] {
    let [a, b, c, d, e, f] = *mac.as_bytes();
    [a, b, c, 0, 0, d, e, f]
}

/// ConnectX-3 GUID for `mac`; `None` yields the invalid GUID.
#[must_use]
pub fn mlx4_guid(mac: Option<&MacAddress>) -> String {
    mac.map_or_else(|| MLX4_INVALID_GUID.to_string(), |mac| hex::encode(embed(mac)))
}

/// ConnectX-4+ GUID for `mac`; `None` yields the invalid GUID.
#[must_use]
pub fn mlx5_guid(mac: Option<&MacAddress>) -> String {
    mac.map_or_else(
        || MLX5_INVALID_GUID.to_string(),
        |mac| {
            embed(mac)
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<Vec<_>>()
                .join(":")
        },
    )
}

/// Parse a GUID in either sixteen-digit or colon form.
///
/// # Errors
///
/// Returns `EswitchError::InvalidGuidFormat` for anything else.
pub fn parse_guid(guid: &str) -> Result<[u8; 8]> {
    let invalid = || EswitchError::InvalidGuidFormat(guid.to_string());
    let trimmed = guid.trim();
    let digits = if trimmed.contains(':') {
        let parts: Vec<&str> = trimmed.split(':').collect();
        if parts.len() != 8 || parts.iter().any(|p| p.len() != 2) {
            return Err(invalid());
        }
        parts.concat()
    } else {
        trimmed.to_string()
    };
    if digits.len() != 16 {
        return Err(invalid());
    }
    let bytes = hex::decode(&digits).map_err(|_| invalid())?;
    bytes.try_into().map_err(|_| invalid())
}

/// Whether `guid` is the all-ones invalidation GUID, in either form.
#[must_use]
pub fn is_invalid_guid(guid: &str) -> bool {
    parse_guid(guid).is_ok_and(|bytes| bytes == [0xff; 8])
}

/// Recover the MAC embedded in a GUID.
///
/// # Errors
///
/// Returns `EswitchError::InvalidGuidFormat` if `guid` does not parse.
pub fn mac_from_guid(guid: &str) -> Result<MacAddress> {
    let [a, b, c, _, _, d, e, f] = parse_guid(guid)?;
    Ok(MacAddress::from_bytes([a, b, c, d, e, f]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac() -> MacAddress {
        "aa:bb:cc:dd:ee:ff".parse().unwrap()
    }

    #[test]
    fn guid_from_mac() {
        assert_eq!(mlx4_guid(Some(&mac())), "aabbcc0000ddeeff");
        assert_eq!(mlx5_guid(Some(&mac())), "aa:bb:cc:00:00:dd:ee:ff");
        assert_eq!(mlx4_guid(None), MLX4_INVALID_GUID);
        assert_eq!(mlx5_guid(None), MLX5_INVALID_GUID);
    }

    #[test]
    fn mac_from_either_form() {
        assert_eq!(mac_from_guid("aabbcc0000ddeeff").unwrap(), mac());
        assert_eq!(mac_from_guid("aa:bb:cc:00:00:dd:ee:ff").unwrap(), mac());
        assert_eq!(mac_from_guid("AA:BB:CC:00:00:DD:EE:FF\n").unwrap(), mac());
    }

    #[test]
    fn rejects_malformed_guids() {
        for guid in ["", "aabbcc", "aa:bb:cc:00:00:dd:ee", "zzbbcc0000ddeeff", "aab:bcc:00:00:dd:ee:ff:0"] {
            assert!(
                matches!(mac_from_guid(guid), Err(EswitchError::InvalidGuidFormat(_))),
                "{guid} parsed"
            );
        }
    }

    #[test]
    fn invalid_guid_detection() {
        assert!(is_invalid_guid(MLX4_INVALID_GUID));
        assert!(is_invalid_guid(MLX5_INVALID_GUID));
        assert!(!is_invalid_guid("aabbcc0000ddeeff"));
        assert!(!is_invalid_guid("garbage"));
    }
}
