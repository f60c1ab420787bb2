// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # sapphire-observability
//!
//! Logging setup shared by every Sapphire binary.
//!
//! Provides consistent log output across the workspace with per-crate debug flag support
//! (`--debug-sapphire-sync`, `SAPPHIRE_DEBUG=sapphire-memory`).
//!
//! ## Features
//! - `file-logging`: JSON log files in a timestamped run folder with retention (host only)

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod config;
pub mod init;

pub use cli::*;
pub use config::*;
pub use init::*;

/// Sapphire crate names accepted by the debug flags
pub const KNOWN_CRATES: &[&str] = &[
    "sapphire",
    "sapphire-config",
    "sapphire-hal",
    "sapphire-memory",
    "sapphire-vm",
    "sapphire-sync",
];
