// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration type definitions
//!
//! Each struct maps to one section of `sapphire_configuration.toml`. Missing keys fall back
//! to the defaults below.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SapphireConfig {
    pub system: SystemConfig,
    pub memory: MemoryConfig,
    pub vm: VmConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

/// Device identity and global log level
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SystemConfig {
    pub device_name: String,
    /// `aa:bb:cc:dd:ee:ff`; also seeds the VM random generator
    pub mac_address: String,
    pub log_level: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            device_name: "sapphire".to_string(),
            mac_address: "02:00:00:00:00:01".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Relocatable heap
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub heap_size: usize,
    pub max_handles: usize,
    /// Dirty bytes that trigger a compaction pass
    pub defrag_threshold: usize,
    /// Device passes between full canary scans (0 disables)
    pub canary_check_interval: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            heap_size: 32768,
            max_handles: 128,
            defrag_threshold: 512,
            canary_check_interval: 100,
        }
    }
}

/// VM runner and scheduler
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct VmConfig {
    pub max_vms: usize,
    /// Bytes of heap all loaded images may occupy together
    pub image_budget: usize,
    pub max_threads: usize,
    pub max_cycles: u32,
    pub loop_interval_ms: u64,
    /// Loop frames between checkpoint hashes
    pub checkpoint_interval: u32,
    /// Checkpoint hashes kept for divergence detection
    pub checkpoint_window: usize,
    pub yield_quantum_ms: u64,
    pub idle_delay_ms: u64,
    /// Program image loaded into slot 0 at startup (empty for none)
    pub image_path: PathBuf,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_vms: 4,
            image_budget: 16384,
            max_threads: 8,
            max_cycles: 20000,
            loop_interval_ms: 20,
            checkpoint_interval: 4,
            checkpoint_window: 8,
            yield_quantum_ms: 2,
            idle_delay_ms: 100,
            image_path: PathBuf::new(),
        }
    }
}

/// Static sync role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncRole {
    Leader,
    #[default]
    Follower,
}

impl std::str::FromStr for SyncRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "leader" => Ok(SyncRole::Leader),
            "follower" => Ok(SyncRole::Follower),
            other => Err(format!("unknown sync role '{}'", other)),
        }
    }
}

/// Frame sync over UDP
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,
    pub group: String,
    pub port: u16,
    pub bind_address: String,
    pub broadcast_address: String,
    pub role: SyncRole,
    /// Leader `host:port`, required for followers
    pub leader_address: String,
    pub sync_interval_ms: u64,
    pub sequencer_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub max_rtt_ms: u64,
    pub max_drift_ms: u64,
    pub leader_timeout_ms: u64,
    pub chunk_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            group: "default".to_string(),
            port: 32042,
            bind_address: "0.0.0.0".to_string(),
            broadcast_address: "255.255.255.255".to_string(),
            role: SyncRole::Follower,
            leader_address: String::new(),
            sync_interval_ms: 1000,
            sequencer_interval_ms: 250,
            request_timeout_ms: 2000,
            max_rtt_ms: 500,
            max_drift_ms: 200,
            leader_timeout_ms: 5000,
            chunk_size: 512,
        }
    }
}

/// Log output
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `text` or `json`
    pub format: String,
    /// Write JSON logs to `log_dir` (requires the `file-logging` feature)
    pub file_logging: bool,
    pub log_dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "text".to_string(),
            file_logging: false,
            log_dir: PathBuf::from("logs"),
        }
    }
}
