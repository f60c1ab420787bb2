// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Sapphire VM Runner
//!
//! Bytecode program execution for pixel controllers.
//!
//! ## Features
//! - **Instance slots**: up to `max_vms` independent programs, each stored in one
//!   relocatable heap block
//! - **Chunked loader**: images arrive in network-sized pieces and are validated on the
//!   terminating empty chunk
//! - **Cooperative threads**: `SPAWN`/`DELAY`/`YIELD` with per-thread wake ticks
//! - **Scheduler**: event-driven wake times with timing pressure accounting
//! - **Checkpoints**: rolling data segment hashes for frame sync divergence detection
//!
//! ## Lifecycle
//!
//! ```text
//! NOT_RUNNING --load--> READY --start--> OK --HALT--> HALT
//!      ^                                  |  \--fault--> ERROR(code < 0)
//!      +------------- reset --------------+
//!                                    OK <-> WAIT_SYNC (frame sync handshake)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use sapphire_memory::{Allocator, AllocatorSettings};
//! use sapphire_vm::{CodeBuilder, ImageBuilder, Opcode, RunMode, RunnerSettings, VmRunner, VmStatus};
//!
//! let mut mem = Allocator::new(AllocatorSettings::default()).unwrap();
//! let mut runner = VmRunner::new(RunnerSettings::default(), [0, 1, 2, 3, 4, 5]).unwrap();
//!
//! let mut code = CodeBuilder::new();
//! code.label("init").op(Opcode::Ret);
//! code.label("loop").load(0).push(1).op(Opcode::Add).store(0).op(Opcode::Ret);
//! let image = ImageBuilder::new("counter").data(&[0]).build(&code, "init", "loop").unwrap();
//!
//! runner.load(&mut mem, 0, 0, image.len(), &image).unwrap();
//! runner.load(&mut mem, 0, image.len(), image.len(), &[]).unwrap();
//! runner.start(&mut mem, 0).unwrap();
//! assert_eq!(runner.run(&mut mem, 0, RunMode::Loop), VmStatus::Ok);
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod checkpoint;
pub mod error;
pub mod hash;
pub mod image;
pub mod interpreter;
pub mod opcode;
pub mod runner;
pub mod scheduler;
pub mod state;
pub mod status;

pub use checkpoint::CheckpointRing;
pub use error::{RunnerError, RunnerResult, VmError, VmResult};
pub use hash::{hash32, hash64, rng_seed_from_mac};
pub use image::{CodeBuilder, ImageBuilder, ImageLayout, PublishedVar};
pub use opcode::Opcode;
pub use runner::{RunnerSettings, VmRunner};
pub use scheduler::{SchedulerPass, SchedulerSettings, VmScheduler};
pub use state::{SyncSnapshot, ThreadEntry, VmState, THREAD_FREE};
pub use status::{RunMode, VmStatus};
