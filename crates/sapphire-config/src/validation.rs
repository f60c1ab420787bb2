// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration validation
//!
//! Checks that values are within the ranges the device can actually run with and that
//! dependent settings agree with each other. Every problem is collected before returning.

use std::net::{IpAddr, SocketAddr};

use crate::{ConfigError, ConfigResult, SapphireConfig, SyncRole};

/// Largest sync data chunk carried by one datagram
const MAX_SYNC_CHUNK: usize = 512;

/// Handle values are swizzled by 0x1000 and must stay positive in an `i16`
const MAX_HANDLES: usize = (i16::MAX as usize) - 0x1000;

/// Validation errors that can occur during config validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    MissingRequired { field: String },
    InvalidValue { field: String, reason: String },
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRequired { field } => {
                write!(f, "Missing required configuration: {}", field)
            }
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid configuration value for {}: {}", field, reason)
            }
        }
    }
}

fn invalid(errors: &mut Vec<ConfigValidationError>, field: &str, reason: impl Into<String>) {
    errors.push(ConfigValidationError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    });
}

/// Validate the complete configuration
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` listing every problem found
pub fn validate_config(config: &SapphireConfig) -> ConfigResult<()> {
    let mut errors = Vec::new();

    validate_system(config, &mut errors);
    validate_memory(config, &mut errors);
    validate_vm(config, &mut errors);
    if config.sync.enabled {
        validate_sync(config, &mut errors);
    }
    validate_logging(config, &mut errors);

    if !errors.is_empty() {
        let error_messages = errors
            .iter()
            .map(|e| format!("  - {}", e))
            .collect::<Vec<_>>()
            .join("\n");

        return Err(ConfigError::ValidationError(format!(
            "Configuration validation failed:\n{}",
            error_messages
        )));
    }

    Ok(())
}

fn validate_system(config: &SapphireConfig, errors: &mut Vec<ConfigValidationError>) {
    if config.system.device_name.is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: "system.device_name".to_string(),
        });
    }

    let mac = &config.system.mac_address;
    let octets: Vec<&str> = mac.split(|c| c == ':' || c == '-').collect();
    let well_formed = octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && u8::from_str_radix(o, 16).is_ok());
    if !well_formed {
        invalid(
            errors,
            "system.mac_address",
            format!("'{}' is not of the form aa:bb:cc:dd:ee:ff", mac),
        );
    }

    let level = config.system.log_level.to_lowercase();
    if !["trace", "debug", "info", "warn", "warning", "error"].contains(&level.as_str()) {
        invalid(
            errors,
            "system.log_level",
            "must be one of trace, debug, info, warn, error",
        );
    }
}

fn validate_memory(config: &SapphireConfig, errors: &mut Vec<ConfigValidationError>) {
    let memory = &config.memory;
    if memory.heap_size < 64 || memory.heap_size % 4 != 0 {
        invalid(errors, "memory.heap_size", "must be a multiple of 4, at least 64");
    }
    if memory.heap_size > i32::MAX as usize {
        invalid(errors, "memory.heap_size", "must fit the 31-bit block size field");
    }
    if memory.max_handles == 0 || memory.max_handles > MAX_HANDLES {
        invalid(
            errors,
            "memory.max_handles",
            format!("must be between 1 and {}", MAX_HANDLES),
        );
    }
    if memory.defrag_threshold > memory.heap_size {
        invalid(errors, "memory.defrag_threshold", "must not exceed heap_size");
    }
}

fn validate_vm(config: &SapphireConfig, errors: &mut Vec<ConfigValidationError>) {
    let vm = &config.vm;
    if vm.max_vms == 0 {
        invalid(errors, "vm.max_vms", "must be at least 1");
    }
    if vm.image_budget == 0 || vm.image_budget > config.memory.heap_size {
        invalid(errors, "vm.image_budget", "must be > 0 and fit in memory.heap_size");
    }
    if vm.max_threads == 0 {
        invalid(errors, "vm.max_threads", "must be at least 1");
    }
    if vm.max_cycles == 0 {
        invalid(errors, "vm.max_cycles", "must be positive");
    }
    if vm.loop_interval_ms == 0 {
        invalid(errors, "vm.loop_interval_ms", "must be positive");
    }
    if vm.checkpoint_interval == 0 {
        invalid(errors, "vm.checkpoint_interval", "must be positive");
    }
    if vm.checkpoint_window == 0 {
        invalid(errors, "vm.checkpoint_window", "must be at least 1");
    }
    if vm.yield_quantum_ms == 0 {
        invalid(errors, "vm.yield_quantum_ms", "must be positive");
    }
}

fn validate_sync(config: &SapphireConfig, errors: &mut Vec<ConfigValidationError>) {
    let sync = &config.sync;
    if sync.group.is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: "sync.group".to_string(),
        });
    }
    if sync.port == 0 {
        invalid(errors, "sync.port", "must not be 0");
    }
    if sync.bind_address.parse::<IpAddr>().is_err() {
        invalid(errors, "sync.bind_address", "must be an IP address");
    }
    if sync.broadcast_address.parse::<IpAddr>().is_err() {
        invalid(errors, "sync.broadcast_address", "must be an IP address");
    }
    if sync.role == SyncRole::Follower {
        if sync.leader_address.is_empty() {
            errors.push(ConfigValidationError::MissingRequired {
                field: "sync.leader_address".to_string(),
            });
        } else if sync.leader_address.parse::<SocketAddr>().is_err() {
            invalid(errors, "sync.leader_address", "must be host:port");
        }
    }
    if sync.sync_interval_ms == 0 || sync.sequencer_interval_ms == 0 {
        invalid(errors, "sync.sync_interval_ms", "broadcast intervals must be positive");
    }
    if sync.request_timeout_ms == 0 {
        invalid(errors, "sync.request_timeout_ms", "must be positive");
    }
    if sync.leader_timeout_ms <= sync.sync_interval_ms {
        invalid(
            errors,
            "sync.leader_timeout_ms",
            "must exceed sync.sync_interval_ms",
        );
    }
    if sync.chunk_size == 0 || sync.chunk_size > MAX_SYNC_CHUNK {
        invalid(
            errors,
            "sync.chunk_size",
            format!("must be between 1 and {}", MAX_SYNC_CHUNK),
        );
    }
}

fn validate_logging(config: &SapphireConfig, errors: &mut Vec<ConfigValidationError>) {
    if config.logging.format != "text" && config.logging.format != "json" {
        invalid(errors, "logging.format", "must be 'text' or 'json'");
    }
    if config.logging.file_logging && config.logging.log_dir.as_os_str().is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: "logging.log_dir".to_string(),
        });
    }
}
