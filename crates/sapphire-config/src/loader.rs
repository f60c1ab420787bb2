// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! This module implements the 3-tier configuration loading system:
//! 1. TOML file (base defaults)
//! 2. Environment variables (runtime overrides)
//! 3. CLI arguments (explicit user overrides)
//!
//! Environment variables and CLI keys share one vocabulary: the CLI key `sync_group`
//! is the environment variable `SAPPHIRE_SYNC_GROUP`.

use crate::{ConfigError, ConfigResult, SapphireConfig};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const CONFIG_FILE_NAME: &str = "sapphire_configuration.toml";

/// Keys accepted as `SAPPHIRE_<KEY>` environment variables and `key=value` CLI overrides
pub const OVERRIDE_KEYS: &[&str] = &[
    "device_name",
    "mac_address",
    "log_level",
    "heap_size",
    "max_handles",
    "defrag_threshold",
    "canary_check_interval",
    "max_vms",
    "image_budget",
    "max_cycles",
    "loop_interval_ms",
    "image_path",
    "sync_enabled",
    "sync_group",
    "sync_port",
    "sync_role",
    "sync_leader",
    "sync_broadcast",
    "log_format",
    "file_logging",
    "log_dir",
];

/// Find the Sapphire configuration file
///
/// Search order:
/// 1. `SAPPHIRE_CONFIG_PATH` environment variable
/// 2. Current working directory: `./sapphire_configuration.toml`
/// 3. Parent directory: `../sapphire_configuration.toml`
/// 4. Workspace root (searches up to 5 levels)
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if no config file is found in any location
pub fn find_config_file() -> ConfigResult<PathBuf> {
    if let Ok(env_path) = env::var("SAPPHIRE_CONFIG_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::FileNotFound(format!(
            "Config file specified by SAPPHIRE_CONFIG_PATH not found: {}",
            path.display()
        )));
    }

    let mut search_paths = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        search_paths.push(cwd.join(CONFIG_FILE_NAME));

        // Parent, then up to 5 levels for the workspace root
        let mut current = cwd.clone();
        for _ in 0..5 {
            if let Some(parent) = current.parent() {
                let candidate = parent.join(CONFIG_FILE_NAME);
                if !search_paths.contains(&candidate) {
                    search_paths.push(candidate);
                }
                current = parent.to_path_buf();
            }
        }
    }

    if let Some(path) = search_paths.iter().find(|p| p.exists()) {
        return Ok(path.clone());
    }

    let search_list = search_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ConfigError::FileNotFound(format!(
        "Sapphire configuration file '{}' not found in any of these locations:\n{}\n\nSet SAPPHIRE_CONFIG_PATH environment variable to specify custom location.",
        CONFIG_FILE_NAME, search_list
    )))
}

/// Load configuration from TOML file
///
/// # Arguments
///
/// * `config_path` - Optional path to config file. If `None`, will search for config file.
/// * `cli_args` - Optional CLI argument overrides
///
/// # Returns
///
/// Complete `SapphireConfig` with all overrides applied. Validation is left to the caller
/// so tools can inspect an invalid file.
///
/// # Errors
///
/// Returns error if the config file is not found, contains invalid TOML, or an override
/// value cannot be parsed
pub fn load_config(
    config_path: Option<&Path>,
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<SapphireConfig> {
    let config_file = match config_path {
        Some(path) => path.to_path_buf(),
        None => find_config_file()?,
    };

    let content = fs::read_to_string(&config_file)?;
    let mut config: SapphireConfig = toml::from_str(&content)?;

    apply_environment_overrides(&mut config)?;
    if let Some(cli) = cli_args {
        apply_cli_overrides(&mut config, cli)?;
    }

    Ok(config)
}

/// Apply `SAPPHIRE_<KEY>` environment variable overrides, see [`OVERRIDE_KEYS`]
pub fn apply_environment_overrides(config: &mut SapphireConfig) -> ConfigResult<()> {
    for key in OVERRIDE_KEYS {
        let var = format!("SAPPHIRE_{}", key.to_uppercase());
        if let Ok(value) = env::var(&var) {
            apply_override(config, key, &value)?;
        }
    }
    Ok(())
}

/// Apply CLI argument overrides to configuration
///
/// # Arguments
///
/// * `config` - Configuration to modify
/// * `cli_args` - Overrides keyed by [`OVERRIDE_KEYS`] names (e.g. `{"sync_group": "stage"}`)
///
/// # Errors
///
/// Unknown keys and unparseable values are rejected with `ConfigError::InvalidValue`
pub fn apply_cli_overrides(
    config: &mut SapphireConfig,
    cli_args: &HashMap<String, String>,
) -> ConfigResult<()> {
    // Sorted so the first reported error does not depend on hash order
    let mut keys: Vec<&String> = cli_args.keys().collect();
    keys.sort();
    for key in keys {
        if !OVERRIDE_KEYS.contains(&key.as_str()) {
            return Err(ConfigError::InvalidValue(format!(
                "unknown override key '{}'",
                key
            )));
        }
        apply_override(config, key, &cli_args[key])?;
    }
    Ok(())
}

fn parse<T: FromStr>(key: &str, value: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(format!("{} = '{}'", key, value)))
}

fn parse_bool(key: &str, value: &str) -> ConfigResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue(format!("{} = '{}'", key, value))),
    }
}

fn apply_override(config: &mut SapphireConfig, key: &str, value: &str) -> ConfigResult<()> {
    match key {
        "device_name" => config.system.device_name = value.to_string(),
        "mac_address" => config.system.mac_address = value.to_string(),
        "log_level" => config.system.log_level = value.to_string(),
        "heap_size" => config.memory.heap_size = parse(key, value)?,
        "max_handles" => config.memory.max_handles = parse(key, value)?,
        "defrag_threshold" => config.memory.defrag_threshold = parse(key, value)?,
        "canary_check_interval" => config.memory.canary_check_interval = parse(key, value)?,
        "max_vms" => config.vm.max_vms = parse(key, value)?,
        "image_budget" => config.vm.image_budget = parse(key, value)?,
        "max_cycles" => config.vm.max_cycles = parse(key, value)?,
        "loop_interval_ms" => config.vm.loop_interval_ms = parse(key, value)?,
        "image_path" => config.vm.image_path = PathBuf::from(value),
        "sync_enabled" => config.sync.enabled = parse_bool(key, value)?,
        "sync_group" => config.sync.group = value.to_string(),
        "sync_port" => config.sync.port = parse(key, value)?,
        "sync_role" => {
            config.sync.role = value.parse().map_err(ConfigError::InvalidValue)?;
        }
        "sync_leader" => config.sync.leader_address = value.to_string(),
        "sync_broadcast" => config.sync.broadcast_address = value.to_string(),
        "log_format" => config.logging.format = value.to_string(),
        "file_logging" => config.logging.file_logging = parse_bool(key, value)?,
        "log_dir" => config.logging.log_dir = PathBuf::from(value),
        _ => {
            return Err(ConfigError::InvalidValue(format!(
                "unknown override key '{}'",
                key
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SyncRole;
    use std::fs::File;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_find_config_file_env_var() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("custom_config.toml");
        File::create(&config_path).unwrap();

        env::set_var("SAPPHIRE_CONFIG_PATH", config_path.to_str().unwrap());
        let result = find_config_file();
        env::remove_var("SAPPHIRE_CONFIG_PATH");

        assert_eq!(result.unwrap(), config_path);
    }

    #[test]
    fn test_find_config_file_env_var_missing() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        env::set_var("SAPPHIRE_CONFIG_PATH", "/nonexistent/sapphire.toml");
        let result = find_config_file();
        env::remove_var("SAPPHIRE_CONFIG_PATH");

        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_minimal_config() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[memory]").unwrap();
        writeln!(file, "heap_size = 8192").unwrap();
        writeln!(file, "[sync]").unwrap();
        writeln!(file, "group = \"stage-left\"").unwrap();

        let config = load_config(Some(&config_path), None).unwrap();

        assert_eq!(config.memory.heap_size, 8192);
        assert_eq!(config.sync.group, "stage-left");
        assert_eq!(config.vm.max_vms, 4);
    }

    #[test]
    fn test_invalid_toml_reported() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&config_path, "[memory\nheap_size = ").unwrap();

        let result = load_config(Some(&config_path), None);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_environment_overrides() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let mut config = SapphireConfig::default();

        env::set_var("SAPPHIRE_SYNC_GROUP", "stage-right");
        env::set_var("SAPPHIRE_HEAP_SIZE", "16384");
        env::set_var("SAPPHIRE_SYNC_ENABLED", "yes");

        let result = apply_environment_overrides(&mut config);

        env::remove_var("SAPPHIRE_SYNC_GROUP");
        env::remove_var("SAPPHIRE_HEAP_SIZE");
        env::remove_var("SAPPHIRE_SYNC_ENABLED");

        result.unwrap();
        assert_eq!(config.sync.group, "stage-right");
        assert_eq!(config.memory.heap_size, 16384);
        assert!(config.sync.enabled);
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = SapphireConfig::default();
        let mut cli_args = HashMap::new();
        cli_args.insert("sync_role".to_string(), "leader".to_string());
        cli_args.insert("sync_port".to_string(), "40000".to_string());

        apply_cli_overrides(&mut config, &cli_args).unwrap();

        assert_eq!(config.sync.role, SyncRole::Leader);
        assert_eq!(config.sync.port, 40000);
    }

    #[test]
    fn test_cli_rejects_bad_values() {
        let mut config = SapphireConfig::default();

        let mut cli_args = HashMap::new();
        cli_args.insert("sync_port".to_string(), "not-a-port".to_string());
        assert!(matches!(
            apply_cli_overrides(&mut config, &cli_args),
            Err(ConfigError::InvalidValue(_))
        ));

        let mut cli_args = HashMap::new();
        cli_args.insert("warp_drive".to_string(), "on".to_string());
        assert!(apply_cli_overrides(&mut config, &cli_args).is_err());
    }

    #[test]
    fn test_override_precedence() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        // CLI overrides take precedence over environment variables
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[system]").unwrap();
        writeln!(file, "device_name = \"file-name\"").unwrap();
        writeln!(file, "log_level = \"warn\"").unwrap();

        env::set_var("SAPPHIRE_DEVICE_NAME", "env-name");
        env::set_var("SAPPHIRE_LOG_LEVEL", "debug");

        let mut cli_args = HashMap::new();
        cli_args.insert("device_name".to_string(), "cli-name".to_string());

        let config = load_config(Some(&config_path), Some(&cli_args));

        env::remove_var("SAPPHIRE_DEVICE_NAME");
        env::remove_var("SAPPHIRE_LOG_LEVEL");

        // CLI wins for name, env wins for level (no CLI override)
        let config = config.unwrap();
        assert_eq!(config.system.device_name, "cli-name");
        assert_eq!(config.system.log_level, "debug");
    }
}
