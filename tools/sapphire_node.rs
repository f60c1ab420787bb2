// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Host node: runs the Sapphire device loop with a program image and UDP frame sync.
//!
//! Per-crate debug flags (`--debug-sapphire-sync`, `--debug-all`) are accepted in addition
//! to the options below.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use sapphire::config::{load_config, validate_config, SapphireConfig, SyncRole};
use sapphire::hal::{parse_mac, StdPlatform};
use sapphire::observability::{
    debug_flags_help, init_logging, split_debug_args, LogFormat, ObservabilityConfig,
};
use sapphire::{Device, DeviceSettings};

/// Sapphire node - bytecode pixel animation with frame sync
#[derive(Parser, Debug)]
#[command(name = "sapphire-node", version, author, long_about = None, after_help = debug_flags_help())]
struct Args {
    /// Path to sapphire_configuration.toml (searched for when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Program image loaded into VM slot 0 (overrides vm.image_path)
    #[arg(short, long)]
    image: Option<PathBuf>,

    /// Enable frame sync with this role
    #[arg(long)]
    role: Option<SyncRole>,

    /// Leader address for followers, host:port
    #[arg(long)]
    leader: Option<String>,

    /// Sync group name
    #[arg(long)]
    group: Option<String>,

    /// Configuration overrides, key=value (e.g. heap_size=16384)
    #[arg(value_name = "KEY=VALUE")]
    overrides: Vec<String>,
}

impl Args {
    fn cli_overrides(&self) -> Result<HashMap<String, String>> {
        let mut map = HashMap::new();
        for pair in &self.overrides {
            let Some((key, value)) = pair.split_once('=') else {
                bail!("override '{}' is not key=value", pair);
            };
            map.insert(key.trim().to_string(), value.trim().to_string());
        }
        if let Some(role) = self.role {
            map.insert("sync_enabled".to_string(), "true".to_string());
            let role = match role {
                SyncRole::Leader => "leader",
                SyncRole::Follower => "follower",
            };
            map.insert("sync_role".to_string(), role.to_string());
        }
        if let Some(leader) = &self.leader {
            map.insert("sync_leader".to_string(), leader.clone());
        }
        if let Some(group) = &self.group {
            map.insert("sync_group".to_string(), group.clone());
        }
        if let Some(image) = &self.image {
            map.insert("image_path".to_string(), image.display().to_string());
        }
        Ok(map)
    }
}

fn observability_config(config: &SapphireConfig) -> Result<ObservabilityConfig> {
    let format: LogFormat = config
        .logging
        .format
        .parse()
        .map_err(anyhow::Error::msg)?;
    Ok(ObservabilityConfig {
        level: config.system.log_level.clone(),
        format,
        file_logging: config.logging.file_logging,
        log_dir: config.logging.log_dir.clone(),
        ..ObservabilityConfig::default()
    })
}

fn main() -> Result<()> {
    let (debug_flags, args) = split_debug_args(std::env::args());
    let args = Args::parse_from(args);

    let config = load_config(args.config.as_deref(), Some(&args.cli_overrides()?))
        .context("Failed to load configuration")?;
    validate_config(&config)?;

    let _log_guard = init_logging(&observability_config(&config)?, &debug_flags)?;

    let mac = parse_mac(&config.system.mac_address)?;
    let platform = StdPlatform::init(config.system.device_name.clone(), mac);
    let mut device = Device::new(DeviceSettings::from_config(&config), platform.clone(), &platform)?;

    let image_path = &config.vm.image_path;
    if image_path.as_os_str().is_empty() {
        warn!("[DEVICE] No program image configured; VM slot 0 stays idle");
    } else {
        let image = std::fs::read(image_path)
            .with_context(|| format!("Failed to read image {}", image_path.display()))?;
        device.load_image(0, &image)?;
        let status = device.start(0)?;
        info!(
            "[DEVICE] Loaded {} ({} bytes), status {}",
            image_path.display(),
            image.len(),
            status
        );
    }

    if config.sync.enabled {
        #[cfg(feature = "udp")]
        device.attach_sync(sapphire::udp_sync(&config).context("Failed to start frame sync")?);
        #[cfg(not(feature = "udp"))]
        bail!("frame sync enabled but this build has no UDP transport");
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    info!("[DEVICE] Running (Press Ctrl+C to stop)...");
    device.run(&running);

    let stats = device.mem_stats();
    info!(
        "[DEVICE] Shutdown complete: peak heap {} of {} bytes, timing pressure {}",
        stats.peak_usage,
        stats.heap_size,
        device.timing_pressure()
    );
    Ok(())
}
