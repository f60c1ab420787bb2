// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{HalError, HalResult};

/// Stable identity of a device on the network
pub trait DeviceIdentity {
    /// Hardware address, also the VM random seed source
    fn mac_address(&self) -> [u8; 6];

    /// Human readable device name
    fn device_name(&self) -> &str;
}

/// Parse `aa:bb:cc:dd:ee:ff` (or `-` separated) into bytes
pub fn parse_mac(text: &str) -> HalResult<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = text.trim().split(|c| c == ':' || c == '-');
    for byte in mac.iter_mut() {
        let part = parts
            .next()
            .ok_or_else(|| HalError::InvalidMac(text.to_string()))?;
        if part.len() != 2 {
            return Err(HalError::InvalidMac(text.to_string()));
        }
        *byte = u8::from_str_radix(part, 16).map_err(|_| HalError::InvalidMac(text.to_string()))?;
    }
    if parts.next().is_some() {
        return Err(HalError::InvalidMac(text.to_string()));
    }
    Ok(mac)
}

/// Format bytes as `aa:bb:cc:dd:ee:ff`
pub fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mac() {
        assert_eq!(
            parse_mac("02:1A:bb:00:ff:09").unwrap(),
            [0x02, 0x1A, 0xBB, 0x00, 0xFF, 0x09]
        );
        assert_eq!(parse_mac("02-00-00-00-00-01").unwrap()[5], 1);
        assert!(parse_mac("02:00:00:00:00").is_err());
        assert!(parse_mac("02:00:00:00:00:00:00").is_err());
        assert!(parse_mac("02:00:00:00:00:zz").is_err());
        assert!(parse_mac("002:00:00:00:00:01").is_err());
    }

    #[test]
    fn test_format_round_trip() {
        let mac = [0x02, 0xAA, 0xBB, 0xCC, 0xDD, 0x0E];
        assert_eq!(format_mac(&mac), "02:aa:bb:cc:dd:0e");
        assert_eq!(parse_mac(&format_mac(&mac)).unwrap(), mac);
    }
}
