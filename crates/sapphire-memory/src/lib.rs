// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Sapphire Relocatable Heap
//!
//! Handle-indirected dynamic memory carved out of one fixed byte arena.
//!
//! This crate provides:
//! - **Allocator**: `alloc`/`free`/`realloc` over opaque [`Handle`]s
//! - **Scoped access**: [`Allocator::get`] and [`Allocator::get_mut`] return slices that
//!   borrow the allocator, so no data reference can outlive a compaction
//! - **Compacting collector**: [`Allocator::collect`] slides live blocks toward the arena
//!   start and rewrites the handle table
//! - **Runtime stats**: [`MemStats`] with the conservation invariant
//!   `free_space + used_space + dirty_space == heap_size`
//!
//! ## Arena layout
//!
//! ```text
//! ┌──────────────┬───────────────────────────┬────────┐
//! │ Header (8 B) │ Data (size + padding)     │ Canary │
//! └──────────────┴───────────────────────────┴────────┘
//!   size:u32 (bit 31 = dirty), handle:i16, type:u8, padding_len:u8
//! ```
//!
//! Every block footprint is a multiple of 4 bytes.
//!
//! ## Usage
//!
//! ```rust
//! use sapphire_memory::{Allocator, AllocatorSettings, MemType};
//!
//! let mut mem = Allocator::new(AllocatorSettings::default()).unwrap();
//! let handle = mem.alloc(64, MemType::SCRATCH).unwrap();
//! mem.get_mut(handle)[0] = 0xAA;
//! assert_eq!(mem.get(handle)[0], 0xAA);
//! mem.free(handle);
//! mem.collect();
//! ```
//!
//! ## Cooperative discipline
//!
//! On the device every subsystem shares one core and yields cooperatively. The collector
//! relocates blocks, so it only runs from the top-level housekeeping pass. Borrowing rules
//! enforce the rest: `collect()` needs `&mut Allocator`, which cannot coexist with a slice
//! returned by `get()`.

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

mod allocator;
mod block;
pub mod error;
mod gc;
mod handle;
pub mod stats;

pub use allocator::{Allocator, AllocatorSettings, BlockIter};
pub use block::{BlockInfo, BLOCK_ALIGN, CANARY_VALUE, HEADER_LEN};
pub use error::{MemoryError, MemoryResult};
pub use handle::{Handle, MemType, HANDLE_SWIZZLE, MAX_HANDLES_LIMIT};
pub use stats::MemStats;
