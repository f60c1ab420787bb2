// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Sapphire HAL
//!
//! Platform abstraction for Sapphire devices.
//!
//! This crate provides:
//! - **Traits**: [`TimeProvider`] (monotonic clock, delays) and [`DeviceIdentity`]
//!   (MAC address, device name)
//! - **Platforms**: [`StdPlatform`] for hosts and [`ManualClock`] for deterministic tests
//!
//! Pin maps, peripheral drivers and bootloaders of the individual MCU families live with
//! their board support packages, not here.

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod error;
/// Device identity trait and MAC helpers.
pub mod identity;
/// Concrete platform implementations.
pub mod platforms;
/// Timekeeping abstractions (monotonic timers, delays).
pub mod time;

pub use error::{HalError, HalResult};
pub use identity::{format_mac, parse_mac, DeviceIdentity};
pub use platforms::{ManualClock, StdPlatform};
pub use time::TimeProvider;

