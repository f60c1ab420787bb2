// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/// Platform implementations
///
/// Each platform module implements the traits defined at the crate root.
///
/// Available platforms:
/// - Host (std): monotonic `Instant` clock, thread sleep
/// - Manual: shared clock advanced by hand, for tests and simulations
pub mod host;
pub mod manual;

pub use host::StdPlatform;
pub use manual::ManualClock;
