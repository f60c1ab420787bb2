// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! CLI argument parsing for per-crate debug flags
//!
//! Supports flags like `--debug-sapphire-sync` and `--debug-all`.

use std::collections::BTreeSet;
use std::env;

use crate::KNOWN_CRATES;

/// Crates with debug logging enabled
///
/// # Example
/// ```rust
/// use sapphire_observability::CrateDebugFlags;
///
/// let flags = CrateDebugFlags::from_args(vec!["--debug-sapphire-sync".to_string()]);
/// assert!(flags.is_enabled("sapphire-sync"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrateDebugFlags {
    pub enabled_crates: BTreeSet<String>,
}

impl CrateDebugFlags {
    /// Parse debug flags from command-line arguments
    ///
    /// Looks for arguments matching `--debug-{crate-name}`, plus `--debug-all`.
    /// Unknown crate names are ignored.
    pub fn from_args<I>(args: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut flags = CrateDebugFlags::default();
        for arg in args {
            if arg == "--debug-all" {
                flags.enable_all();
            } else if let Some(crate_name) = arg.strip_prefix("--debug-") {
                flags.enable(crate_name);
            }
        }
        flags
    }

    /// Merge a `SAPPHIRE_DEBUG` value: `all` or comma-separated crate names
    pub fn merge_env_value(&mut self, value: &str) {
        if value.trim() == "all" {
            self.enable_all();
            return;
        }
        for crate_name in value.split(',') {
            self.enable(crate_name.trim());
        }
    }

    fn enable(&mut self, crate_name: &str) {
        if KNOWN_CRATES.contains(&crate_name) {
            self.enabled_crates.insert(crate_name.to_string());
        }
    }

    fn enable_all(&mut self) {
        for crate_name in KNOWN_CRATES {
            self.enabled_crates.insert(crate_name.to_string());
        }
    }

    /// Check if debug is enabled for a specific crate
    pub fn is_enabled(&self, crate_name: &str) -> bool {
        self.enabled_crates.contains(crate_name)
    }

    /// Check if debug is enabled for any crate
    pub fn any_enabled(&self) -> bool {
        !self.enabled_crates.is_empty()
    }

    /// Get log level for a crate
    pub fn log_level(&self, crate_name: &str) -> tracing::Level {
        if self.is_enabled(crate_name) {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Build an `EnvFilter` directive string on top of `base_level`
    ///
    /// Tracing targets use the module path, so `sapphire-sync` becomes `sapphire_sync=debug`.
    pub fn to_filter_string(&self, base_level: &str) -> String {
        let mut filters: Vec<String> = self
            .enabled_crates
            .iter()
            .map(|name| format!("{}=debug", name.replace('-', "_")))
            .collect();
        filters.push(base_level.to_string());
        filters.join(",")
    }
}

/// Split `--debug-*` flags out of an argument list
///
/// Returns the flags (merged with `SAPPHIRE_DEBUG`) and the remaining arguments, so a
/// command-line parser never sees the per-crate flags.
pub fn split_debug_args<I>(args: I) -> (CrateDebugFlags, Vec<String>)
where
    I: IntoIterator<Item = String>,
{
    let (debug_args, rest): (Vec<String>, Vec<String>) =
        args.into_iter().partition(|arg| arg.starts_with("--debug-"));
    let mut flags = CrateDebugFlags::from_args(debug_args);
    if let Ok(value) = env::var("SAPPHIRE_DEBUG") {
        flags.merge_env_value(&value);
    }
    (flags, rest)
}

/// Parse debug flags from the process arguments and the `SAPPHIRE_DEBUG` environment variable
pub fn parse_debug_flags() -> CrateDebugFlags {
    split_debug_args(env::args()).0
}

/// Generate help text for debug flags
pub fn debug_flags_help() -> String {
    format!(
        r#"Debug Flags:
  --debug-all                    Enable debug logging for all crates
  --debug-{{crate-name}}          Enable debug logging for specific crate

Available crates:
  {}

Environment Variable:
  SAPPHIRE_DEBUG={{crate-name}}[,{{crate-name}}]  Enable debug for crates (comma-separated)
  SAPPHIRE_DEBUG=all                               Enable debug for all crates
"#,
        KNOWN_CRATES.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_crate_flag() {
        let flags = CrateDebugFlags::from_args(vec!["--debug-sapphire-sync".to_string()]);
        assert!(flags.is_enabled("sapphire-sync"));
        assert!(!flags.is_enabled("sapphire-memory"));
    }

    #[test]
    fn test_unknown_crates_ignored() {
        let flags = CrateDebugFlags::from_args(vec![
            "--debug-sapphire-gui".to_string(),
            "--verbose".to_string(),
        ]);
        assert!(!flags.any_enabled());
    }

    #[test]
    fn test_debug_all() {
        let flags = CrateDebugFlags::from_args(vec!["--debug-all".to_string()]);
        for crate_name in KNOWN_CRATES {
            assert!(flags.is_enabled(crate_name), "{} should be enabled", crate_name);
        }
    }

    #[test]
    fn test_env_value() {
        let mut flags = CrateDebugFlags::default();
        flags.merge_env_value("sapphire-vm, sapphire-memory");
        assert!(flags.is_enabled("sapphire-vm"));
        assert!(flags.is_enabled("sapphire-memory"));
        assert_eq!(flags.log_level("sapphire-sync"), tracing::Level::INFO);
    }

    #[test]
    fn test_split_keeps_other_args() {
        let args = ["sapphire-node", "--debug-sapphire-vm", "--config", "x.toml"]
            .iter()
            .map(|s| s.to_string());
        let (flags, rest) = split_debug_args(args);
        assert!(flags.is_enabled("sapphire-vm"));
        assert_eq!(rest, vec!["sapphire-node", "--config", "x.toml"]);
    }

    #[test]
    fn test_filter_string_uses_targets() {
        let flags = CrateDebugFlags::from_args(vec!["--debug-sapphire-memory".to_string()]);
        assert_eq!(flags.to_filter_string("warn"), "sapphire_memory=debug,warn");
        assert_eq!(CrateDebugFlags::default().to_filter_string("info"), "info");
    }
}
