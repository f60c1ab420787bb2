// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::{Duration, Instant};

use tracing::info;

use crate::identity::{format_mac, DeviceIdentity};
use crate::time::TimeProvider;

/// Host platform backed by the std monotonic clock
#[derive(Debug, Clone)]
pub struct StdPlatform {
    boot: Instant,
    mac: [u8; 6],
    name: String,
}

impl StdPlatform {
    /// Initialize the host platform
    ///
    /// # Arguments
    /// * `name` - Device name reported to peers and logs
    /// * `mac` - Hardware address used as device identity
    pub fn init(name: impl Into<String>, mac: [u8; 6]) -> Self {
        let name = name.into();
        info!("[DEVICE] Host platform '{}' ({})", name, format_mac(&mac));
        Self {
            boot: Instant::now(),
            mac,
            name,
        }
    }
}

impl TimeProvider for StdPlatform {
    fn get_time_us(&self) -> u64 {
        self.boot.elapsed().as_micros() as u64
    }

    fn delay_us(&self, us: u64) {
        std::thread::sleep(Duration::from_micros(us));
    }
}

impl DeviceIdentity for StdPlatform {
    fn mac_address(&self) -> [u8; 6] {
        self.mac
    }

    fn device_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_monotonic() {
        let platform = StdPlatform::init("bench", [2, 0, 0, 0, 0, 1]);
        let a = platform.get_time_us();
        platform.delay_us(200);
        let b = platform.get_time_us();
        assert!(b >= a + 200);
        assert_eq!(platform.mac_address()[5], 1);
        assert_eq!(platform.device_name(), "bench");
    }
}
