// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Sapphire - firmware core for LED pixel controllers
//!
//! Sapphire runs small bytecode programs that animate LED pixels, on controllers with a few
//! tens of kilobytes of RAM, and keeps the animations of a group of devices in lockstep.
//!
//! ## Feature Flags
//! - **`udp`** (default): UDP datagram transport for frame sync
//! - **`file-logging`**: JSON log files with retention (host only)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Foundation: sapphire-config, sapphire-observability,   │
//! │              sapphire-hal                               │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  sapphire-memory                                        │
//! │  (relocatable handle heap, compacting GC)               │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  sapphire-vm                                            │
//! │  (program images, interpreter, runner, scheduler)       │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  sapphire-sync                                          │
//! │  (leader/follower frame sync over datagrams)            │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  Device: one cooperative loop over all of the above     │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use sapphire::prelude::*;
//!
//! let identity = StdPlatform::init("porch", [0x02, 0, 0, 0, 0, 0x11]);
//! let clock = ManualClock::new();
//! let mut device = Device::new(DeviceSettings::default(), clock.clone(), &identity).unwrap();
//!
//! let mut code = CodeBuilder::new();
//! code.label("init").op(Opcode::Ret);
//! code.label("loop").load(0).push(1).op(Opcode::Add).store(0).op(Opcode::Ret);
//! let image = ImageBuilder::new("counter")
//!     .data(&[0])
//!     .publish("frames", 0)
//!     .build(&code, "init", "loop")
//!     .unwrap();
//!
//! device.load_image(0, &image).unwrap();
//! device.start(0).unwrap();
//! for _ in 0..10 {
//!     let delay = device.step();
//!     clock.advance_ms(delay);
//! }
//! assert!(device.published(0, "frames").unwrap() >= 9);
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use sapphire_config as config;
pub use sapphire_hal as hal;
pub use sapphire_memory as memory;
pub use sapphire_observability as observability;
pub use sapphire_sync as sync;
pub use sapphire_vm as vm;

pub mod device;

pub use device::{sync_settings, Device, DeviceError, DeviceResult, DeviceSettings};

#[cfg(feature = "udp")]
pub use device::udp_sync;

/// Prelude - commonly used types and traits
pub mod prelude {
    pub use crate::device::{Device, DeviceError, DeviceResult, DeviceSettings};
    pub use crate::config::{load_config, validate_config, SapphireConfig};
    pub use crate::hal::{DeviceIdentity, ManualClock, StdPlatform, TimeProvider};
    pub use crate::memory::{Allocator, AllocatorSettings, Handle, MemStats, MemType};
    pub use crate::sync::{SyncSettings, SyncState, VmSync};
    pub use crate::vm::{CodeBuilder, ImageBuilder, Opcode, VmStatus};
}
