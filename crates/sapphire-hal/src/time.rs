// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/// Time management trait for platform abstraction
pub trait TimeProvider {
    /// Get current time in microseconds since boot
    ///
    /// # Returns
    /// Monotonic timestamp in microseconds
    fn get_time_us(&self) -> u64;

    /// Block for the specified number of microseconds
    ///
    /// # Arguments
    /// * `us` - Microseconds to delay
    fn delay_us(&self, us: u64);

    /// Current time in milliseconds since boot
    fn get_time_ms(&self) -> u64 {
        self.get_time_us() / 1000
    }

    /// Block for the specified number of milliseconds
    ///
    /// # Arguments
    /// * `ms` - Milliseconds to delay
    fn delay_ms(&self, ms: u64) {
        self.delay_us(ms.saturating_mul(1000));
    }
}
