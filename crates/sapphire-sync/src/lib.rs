// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Sapphire Frame Sync
//!
//! Keeps the deterministic state of VM instance 0 identical across the devices of a sync
//! group, so their pixel output animates in lockstep.
//!
//! ## Features
//! - **Wire codec**: fixed little-endian header plus typed payloads with bounded tables
//! - **Transports**: [`DatagramTransport`] over UDP (feature `udp`) or an in-memory
//!   [`LoopbackNetwork`]
//! - **Election seam**: [`LeaderElection`], with [`StaticElection`] for configured roles
//! - **Engine**: [`VmSync`] leader broadcasts and follower `IDLE -> SYNCING -> SYNC`
//!   state machine with checkpoint-window divergence detection
//!
//! ## Usage
//!
//! ```rust
//! use std::net::SocketAddr;
//! use sapphire_memory::{Allocator, AllocatorSettings};
//! use sapphire_sync::{LoopbackNetwork, StaticElection, SyncSettings, SyncState, VmSync};
//! use sapphire_vm::{RunnerSettings, VmRunner};
//!
//! let net = LoopbackNetwork::new();
//! let addr: SocketAddr = "10.0.0.2:32042".parse().unwrap();
//! let leader: SocketAddr = "10.0.0.1:32042".parse().unwrap();
//! let mut sync = VmSync::new(
//!     SyncSettings::default(),
//!     Box::new(net.endpoint(addr)),
//!     Box::new(StaticElection::follower(leader)),
//! )
//! .unwrap();
//!
//! let mut mem = Allocator::new(AllocatorSettings::default()).unwrap();
//! let mut runner = VmRunner::new(RunnerSettings::default(), [0; 6]).unwrap();
//! let next_wake = sync.poll(0, &mut runner, &mut mem);
//! assert!(next_wake.is_some());
//! assert_eq!(sync.state(), SyncState::Idle);
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod election;
pub mod engine;
pub mod error;
pub mod message;
pub mod transport;

pub use election::{ElectionHandle, LeaderElection, StaticElection};
pub use engine::{SyncSettings, SyncState, SyncStats, VmSync, SYNC_VM};
pub use error::{SyncError, SyncResult};
pub use message::{
    flags, MessageType, SyncFrame, SyncHeader, SyncMessage, SyncPayload, SYNC_HEADER_LEN,
    SYNC_MAX_CHECKPOINTS, SYNC_MAX_MESSAGE_LEN, SYNC_MAX_THREADS, VM_SYNC_MAX_DATA_LEN,
};
pub use transport::{DatagramTransport, LoopbackNetwork, LoopbackTransport};

#[cfg(feature = "udp")]
pub use transport::UdpTransport;
