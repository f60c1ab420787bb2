// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Cooperative device loop
//!
//! One [`Device::step`] is one pass of the controller's main loop:
//! 1. Scheduler service (threads, loop frames, fault and halt transitions)
//! 2. Frame sync poll, when a sync engine is attached
//! 3. Housekeeping: periodic canary scan, compaction when enough space is dirty
//!
//! The pass returns how long the caller may sleep before the next one is due.

use std::sync::atomic::{AtomicBool, Ordering};

use sapphire_config::SapphireConfig;
use sapphire_hal::{format_mac, DeviceIdentity, HalError, TimeProvider};
use sapphire_memory::{Allocator, AllocatorSettings, MemStats, MemoryError};
use sapphire_sync::{SyncError, SyncSettings, SyncState, SyncStats, VmSync};
use sapphire_vm::{
    hash32, RunnerError, RunnerSettings, SchedulerSettings, VmRunner, VmScheduler, VmStatus,
};
use tracing::{debug, info, warn};

/// Image bytes handed to the loader per call by [`Device::load_image`]
const LOAD_CHUNK: usize = 512;

/// Device errors
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Hal(#[from] HalError),

    #[error("invalid socket address '{0}'")]
    InvalidAddress(String),
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Settings for every subsystem the device owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSettings {
    pub allocator: AllocatorSettings,
    pub runner: RunnerSettings,
    pub scheduler: SchedulerSettings,
    /// Passes between full canary scans (0 disables)
    pub canary_check_interval: u32,
    /// Longest single sleep in [`Device::run`], bounding shutdown latency
    pub max_sleep_ms: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            allocator: AllocatorSettings::default(),
            runner: RunnerSettings::default(),
            scheduler: SchedulerSettings::default(),
            canary_check_interval: 100,
            max_sleep_ms: 50,
        }
    }
}

impl DeviceSettings {
    pub fn from_config(config: &SapphireConfig) -> Self {
        let (memory, vm) = (&config.memory, &config.vm);
        Self {
            allocator: AllocatorSettings {
                heap_size: memory.heap_size,
                max_handles: memory.max_handles,
                defrag_threshold: memory.defrag_threshold,
            },
            runner: RunnerSettings {
                max_vms: vm.max_vms,
                image_budget: vm.image_budget,
                max_threads: vm.max_threads,
                max_cycles: vm.max_cycles,
                loop_interval_ms: vm.loop_interval_ms,
                checkpoint_interval: vm.checkpoint_interval,
                checkpoint_window: vm.checkpoint_window,
            },
            scheduler: SchedulerSettings {
                yield_quantum_ms: vm.yield_quantum_ms,
                idle_delay_ms: vm.idle_delay_ms,
            },
            canary_check_interval: memory.canary_check_interval,
            ..Self::default()
        }
    }
}

/// Frame sync engine settings from the `[sync]` section
pub fn sync_settings(config: &SapphireConfig) -> SyncSettings {
    let sync = &config.sync;
    SyncSettings {
        group: sync.group.clone(),
        sync_interval_ms: sync.sync_interval_ms,
        sequencer_interval_ms: sync.sequencer_interval_ms,
        request_timeout_ms: sync.request_timeout_ms,
        max_rtt_ms: sync.max_rtt_ms,
        max_drift_ms: sync.max_drift_ms,
        leader_timeout_ms: sync.leader_timeout_ms,
        chunk_size: sync.chunk_size,
    }
}

/// Build a UDP frame sync engine with a static role from the `[sync]` section
#[cfg(feature = "udp")]
pub fn udp_sync(config: &SapphireConfig) -> DeviceResult<VmSync> {
    use std::net::{IpAddr, SocketAddr};

    use sapphire_config::SyncRole;
    use sapphire_sync::{StaticElection, UdpTransport};

    let sync = &config.sync;
    let ip = |text: &str| -> DeviceResult<IpAddr> {
        text.parse()
            .map_err(|_| DeviceError::InvalidAddress(text.to_string()))
    };
    let bind = SocketAddr::new(ip(&sync.bind_address)?, sync.port);
    let broadcast = SocketAddr::new(ip(&sync.broadcast_address)?, sync.port);

    let election = match sync.role {
        SyncRole::Leader => StaticElection::leader(),
        SyncRole::Follower => {
            let leader: SocketAddr = sync
                .leader_address
                .parse()
                .map_err(|_| DeviceError::InvalidAddress(sync.leader_address.clone()))?;
            StaticElection::follower(leader)
        }
    };

    let transport = UdpTransport::bind(bind, broadcast)?;
    Ok(VmSync::new(
        sync_settings(config),
        Box::new(transport),
        Box::new(election),
    )?)
}

/// A pixel controller: heap, VM scheduler, optional frame sync and a clock
pub struct Device<T: TimeProvider> {
    name: String,
    clock: T,
    mem: Allocator,
    scheduler: VmScheduler,
    sync: Option<VmSync>,
    settings: DeviceSettings,
    passes: u64,
}

impl<T: TimeProvider> Device<T> {
    /// Create the heap and runner; the RNG of every program is seeded from `identity`
    pub fn new(
        settings: DeviceSettings,
        clock: T,
        identity: &dyn DeviceIdentity,
    ) -> DeviceResult<Self> {
        let mem = Allocator::new(settings.allocator)?;
        let runner = VmRunner::new(settings.runner, identity.mac_address())?;
        info!(
            "[DEVICE] '{}' ({}): {} byte heap, {} VM slots",
            identity.device_name(),
            format_mac(&identity.mac_address()),
            settings.allocator.heap_size,
            settings.runner.max_vms
        );
        Ok(Self {
            name: identity.device_name().to_string(),
            clock,
            mem,
            scheduler: VmScheduler::new(runner, settings.scheduler),
            sync: None,
            settings,
            passes: 0,
        })
    }

    /// Attach a frame sync engine for VM slot 0
    pub fn attach_sync(&mut self, sync: VmSync) {
        info!(
            "[DEVICE] Frame sync attached ({})",
            if sync.is_leader() { "leader" } else { "follower" }
        );
        self.sync = Some(sync);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn clock(&self) -> &T {
        &self.clock
    }

    pub fn runner(&self) -> &VmRunner {
        self.scheduler.runner()
    }

    pub fn allocator(&self) -> &Allocator {
        &self.mem
    }

    pub fn sync(&self) -> Option<&VmSync> {
        self.sync.as_ref()
    }

    /// Passes completed since creation
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Scheduler passes that ended behind schedule
    pub fn timing_pressure(&self) -> u64 {
        self.scheduler.timing_pressure()
    }

    // region Command layer

    /// Chunked program loader, see [`VmRunner::load`]
    pub fn load(
        &mut self,
        vm: usize,
        offset: usize,
        total_size: usize,
        data: &[u8],
    ) -> DeviceResult<()> {
        let runner = self.scheduler.runner_mut();
        runner.load(&mut self.mem, vm, offset, total_size, data)?;
        Ok(())
    }

    /// Load a complete image in loader-sized chunks, leaving the slot `Ready`
    pub fn load_image(&mut self, vm: usize, image: &[u8]) -> DeviceResult<()> {
        let total = image.len();
        for (index, chunk) in image.chunks(LOAD_CHUNK).enumerate() {
            self.load(vm, index * LOAD_CHUNK, total, chunk)?;
        }
        self.load(vm, total, total, &[])
    }

    pub fn start(&mut self, vm: usize) -> DeviceResult<VmStatus> {
        let runner = self.scheduler.runner_mut();
        Ok(runner.start(&mut self.mem, vm)?)
    }

    pub fn reset(&mut self, vm: usize) {
        let runner = self.scheduler.runner_mut();
        runner.reset(&mut self.mem, vm);
    }

    pub fn status(&self, vm: usize) -> VmStatus {
        self.scheduler.runner().status(vm)
    }

    pub fn mem_stats(&self) -> MemStats {
        self.mem.stats()
    }

    /// Current value of a published variable, by name
    pub fn published(&self, vm: usize, name: &str) -> Option<i32> {
        self.scheduler.runner().published(&self.mem, vm, hash32(name))
    }

    pub fn sync_state(&self) -> Option<SyncState> {
        self.sync.as_ref().map(VmSync::state)
    }

    pub fn sync_stats(&self) -> Option<SyncStats> {
        self.sync.as_ref().map(VmSync::stats)
    }

    /// Broadcast faster while a sequencer steps programs (leader only)
    pub fn set_sequencer_step(&mut self, step: Option<u16>) {
        if let Some(sync) = self.sync.as_mut() {
            sync.set_sequencer_step(step);
        }
    }

    // endregion

    /// One cooperative pass; returns milliseconds until the next pass is due
    pub fn step(&mut self) -> u64 {
        let now = self.clock.get_time_ms();
        let pass = self.scheduler.service(&mut self.mem, now);
        for (vm, err) in &pass.faulted {
            warn!("[DEVICE] VM {} stopped with status {}", vm, err.code());
        }
        for vm in &pass.halted {
            debug!("[DEVICE] VM {} halted", vm);
        }

        let mut delay = pass.delay_ms;
        if let Some(sync) = self.sync.as_mut() {
            if let Some(wake) = sync.poll(now, self.scheduler.runner_mut(), &mut self.mem) {
                delay = delay.min(wake.saturating_sub(now));
            }
        }

        self.passes += 1;
        self.housekeeping();
        delay
    }

    fn housekeeping(&mut self) {
        let interval = u64::from(self.settings.canary_check_interval);
        if interval > 0 && self.passes % interval == 0 {
            self.mem.check_canaries();
        }
        if let Some(reclaimed) = self.mem.collect_if_needed() {
            debug!("[DEVICE] Compaction reclaimed {} bytes", reclaimed);
        }
    }

    /// Run passes until `running` clears, then shut frame sync down
    pub fn run(&mut self, running: &AtomicBool) {
        info!("[DEVICE] '{}' running", self.name);
        while running.load(Ordering::Relaxed) {
            let mut remaining = self.step();
            while remaining > 0 && running.load(Ordering::Relaxed) {
                let chunk = remaining.min(self.settings.max_sleep_ms.max(1));
                self.clock.delay_ms(chunk);
                remaining -= chunk;
            }
        }
        self.shutdown();
    }

    /// Abort frame sync and release its buffers
    pub fn shutdown(&mut self) {
        if let Some(sync) = self.sync.as_mut() {
            sync.shutdown(self.scheduler.runner_mut(), &mut self.mem);
        }
        let stats = self.mem.stats();
        info!(
            "[DEVICE] '{}' stopped after {} passes ({} bytes live, {} GC runs)",
            self.name, self.passes, stats.used_space, stats.gc_runs
        );
    }
}
