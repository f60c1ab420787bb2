// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! VM Runner - instance slots, chunked loader and entry point dispatch
//!
//! Each slot owns one program image stored in an allocator block of type
//! [`MemType::VM_IMAGE`]. Code and data are reached through the allocator on every call;
//! nothing holds a pointer into the arena between calls, so the collector may move the
//! image at any housekeeping pass.

use byteorder::{ByteOrder, LittleEndian};
use sapphire_memory::{Allocator, Handle, MemType};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointRing;
use crate::error::{RunnerError, RunnerResult, VmError, VmResult};
use crate::hash::{hash64, rng_seed_from_mac};
use crate::image::{ImageLayout, PublishedVar};
use crate::interpreter::{execute, ExecOutcome};
use crate::state::{SyncSnapshot, ThreadEntry, VmState};
use crate::status::{RunMode, VmStatus};

/// Runner sizing and timing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerSettings {
    /// Number of VM slots
    pub max_vms: usize,
    /// Aggregate image bytes across all slots
    pub image_budget: usize,
    /// Thread table entries per instance
    pub max_threads: usize,
    /// Instruction budget per entry point call
    pub max_cycles: u32,
    /// VM ticks between loop frames
    pub loop_interval_ms: u64,
    /// Loop frames between checkpoint hashes
    pub checkpoint_interval: u32,
    /// Checkpoint hashes retained per instance
    pub checkpoint_window: usize,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            max_vms: 4,
            image_budget: 16 * 1024,
            max_threads: 8,
            max_cycles: 20_000,
            loop_interval_ms: 20,
            checkpoint_interval: 4,
            checkpoint_window: 8,
        }
    }
}

impl RunnerSettings {
    pub fn validate(&self) -> RunnerResult<()> {
        let mut errors = Vec::new();
        if self.max_vms == 0 {
            errors.push("max_vms must be at least 1".to_string());
        }
        if self.max_threads == 0 || self.max_threads > u8::MAX as usize {
            errors.push(format!("max_threads must be in 1..=255, got {}", self.max_threads));
        }
        if self.max_cycles == 0 {
            errors.push("max_cycles must be positive".to_string());
        }
        if self.loop_interval_ms == 0 {
            errors.push("loop_interval_ms must be positive".to_string());
        }
        if self.checkpoint_interval == 0 {
            errors.push("checkpoint_interval must be positive".to_string());
        }
        if self.checkpoint_window == 0 {
            errors.push("checkpoint_window must be positive".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(RunnerError::InvalidSettings(errors.join("; ")))
        }
    }
}

/// In-progress chunked load
#[derive(Debug, Clone, Copy)]
struct LoadProgress {
    total_size: usize,
    received: usize,
}

#[derive(Debug)]
struct VmSlot {
    status: VmStatus,
    handle: Option<Handle>,
    image_size: usize,
    load: Option<LoadProgress>,
    state: Option<VmState>,
    published: Vec<PublishedVar>,
    checkpoints: CheckpointRing,
}

impl VmSlot {
    fn new(window: usize) -> Self {
        Self {
            status: VmStatus::NotRunning,
            handle: None,
            image_size: 0,
            load: None,
            state: None,
            published: Vec::new(),
            checkpoints: CheckpointRing::new(window),
        }
    }
}

/// Owner of every VM instance slot
pub struct VmRunner {
    settings: RunnerSettings,
    slots: Vec<VmSlot>,
    mac: [u8; 6],
}

impl VmRunner {
    /// `mac` is the device hardware address used to seed each program's RNG
    pub fn new(settings: RunnerSettings, mac: [u8; 6]) -> RunnerResult<Self> {
        settings.validate()?;
        let slots = (0..settings.max_vms)
            .map(|_| VmSlot::new(settings.checkpoint_window))
            .collect();
        Ok(Self {
            settings,
            slots,
            mac,
        })
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    pub fn max_vms(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, vm: usize) -> RunnerResult<&VmSlot> {
        self.slots.get(vm).ok_or(RunnerError::InvalidSlot(vm))
    }

    fn slot_mut(&mut self, vm: usize) -> RunnerResult<&mut VmSlot> {
        self.slots.get_mut(vm).ok_or(RunnerError::InvalidSlot(vm))
    }

    // region Command layer

    /// Chunked program loader.
    ///
    /// `offset == 0` resets the slot and starts a new image of `total_size` bytes; every
    /// other chunk must start where the previous one ended; an empty `data` ends the
    /// transfer and validates the image, leaving the slot `Ready`.
    pub fn load(
        &mut self,
        mem: &mut Allocator,
        vm: usize,
        offset: usize,
        total_size: usize,
        data: &[u8],
    ) -> RunnerResult<()> {
        self.slot(vm)?;

        if data.is_empty() {
            return self.finish_load(mem, vm);
        }

        if offset == 0 {
            self.reset(mem, vm);

            let used: usize = self.slots.iter().map(|s| s.image_size).sum();
            let available = self.settings.image_budget.saturating_sub(used);
            if total_size > available {
                warn!(
                    "[VM-RUNNER] VM {} image of {} bytes rejected, {} of {} budget available",
                    vm, total_size, available, self.settings.image_budget
                );
                return Err(RunnerError::BudgetExceeded {
                    requested: total_size,
                    available,
                    budget: self.settings.image_budget,
                });
            }

            let handle = mem.alloc(total_size, MemType::VM_IMAGE)?;
            let slot = self.slot_mut(vm)?;
            slot.handle = Some(handle);
            slot.image_size = total_size;
            slot.load = Some(LoadProgress {
                total_size,
                received: 0,
            });
            debug!("[VM-RUNNER] VM {} load started: {} bytes", vm, total_size);
        }

        let slot = self.slot_mut(vm)?;
        let (Some(progress), Some(handle)) = (slot.load.as_mut(), slot.handle) else {
            return Err(RunnerError::NotLoading(vm));
        };

        let end = offset.saturating_add(data.len());
        if end > progress.total_size {
            return Err(RunnerError::ChunkOutOfBounds {
                offset,
                end,
                total: progress.total_size,
            });
        }
        if offset != progress.received {
            return Err(RunnerError::ChunkOutOfOrder {
                expected: progress.received,
                offset,
            });
        }
        mem.try_get_mut(handle)?[offset..end].copy_from_slice(data);
        progress.received = end;
        Ok(())
    }

    fn finish_load(&mut self, mem: &mut Allocator, vm: usize) -> RunnerResult<()> {
        let slot = self.slot_mut(vm)?;
        let (Some(progress), Some(handle)) = (slot.load.take(), slot.handle) else {
            return Err(RunnerError::NotLoading(vm));
        };

        if progress.received != progress.total_size {
            self.reset(mem, vm);
            return Err(RunnerError::Incomplete {
                received: progress.received,
                total: progress.total_size,
            });
        }

        let layout = match mem.try_get(handle).map_err(RunnerError::from).and_then(ImageLayout::parse) {
            Ok(layout) => layout,
            Err(err) => {
                warn!("[VM-RUNNER] VM {} image rejected: {}", vm, err);
                self.reset(mem, vm);
                return Err(err);
            }
        };

        let seed = rng_seed_from_mac(&self.mac);
        let settings = self.settings;
        let slot = self.slot_mut(vm)?;
        slot.state = Some(VmState::new(
            &layout,
            settings.max_threads,
            settings.max_cycles,
            seed,
        ));
        slot.published = layout.published.clone();
        slot.checkpoints = CheckpointRing::new(settings.checkpoint_window);
        slot.status = VmStatus::Ready;

        info!(
            "[VM-RUNNER] VM {} loaded: program {:#010x}, file {:#018x}, {} bytes code, {} bytes data",
            vm, layout.program_name_hash, layout.file_hash, layout.code_len, layout.data_len
        );
        Ok(())
    }

    /// `Ready -> Ok`, then run the init entry
    pub fn start(&mut self, mem: &mut Allocator, vm: usize) -> RunnerResult<VmStatus> {
        let slot = self.slot_mut(vm)?;
        if slot.status != VmStatus::Ready {
            return Err(RunnerError::WrongStatus {
                vm,
                status: slot.status.name(),
                expected: "ready",
            });
        }
        slot.status = VmStatus::Ok;
        info!("[VM-RUNNER] VM {} started", vm);
        Ok(self.run(mem, vm, RunMode::Init))
    }

    /// Run one entry point.
    ///
    /// Only an `Ok` instance executes. `Ready`, `WaitSync` and `NotRunning` instances are
    /// left untouched and report `Ok`; `Halt` and `Error` report themselves. A fault tears
    /// the instance down and returns its error status.
    pub fn run(&mut self, mem: &mut Allocator, vm: usize, mode: RunMode) -> VmStatus {
        let settings = self.settings;
        let Some(slot) = self.slots.get_mut(vm) else {
            return VmStatus::NotRunning;
        };
        match slot.status {
            VmStatus::Ok => {}
            VmStatus::Halt | VmStatus::Error(_) => return slot.status,
            VmStatus::Ready | VmStatus::WaitSync | VmStatus::NotRunning => return VmStatus::Ok,
        }

        match execute_mode(slot, mem, mode, &settings) {
            Ok(ExecOutcome::Halted) => {
                info!("[VM-RUNNER] VM {} halted", vm);
                slot.status = VmStatus::Halt;
            }
            Ok(_) => {}
            Err(err) => {
                error!("[VM-RUNNER] VM {} fault in {:?}: {}", vm, mode, err);
                teardown(slot, mem);
                slot.status = VmStatus::Error(err);
            }
        }
        slot.status
    }

    /// Free the slot's image and return it to `NotRunning`
    pub fn reset(&mut self, mem: &mut Allocator, vm: usize) {
        let window = self.settings.checkpoint_window;
        let Some(slot) = self.slots.get_mut(vm) else {
            return;
        };
        if slot.handle.is_some() || slot.status != VmStatus::NotRunning {
            debug!("[VM-RUNNER] VM {} reset (was {})", vm, slot.status);
        }
        teardown(slot, mem);
        *slot = VmSlot::new(window);
    }

    pub fn status(&self, vm: usize) -> VmStatus {
        self.slots
            .get(vm)
            .map(|s| s.status)
            .unwrap_or(VmStatus::NotRunning)
    }

    pub fn state(&self, vm: usize) -> Option<&VmState> {
        self.slots.get(vm).and_then(|s| s.state.as_ref())
    }

    /// Current value of a published variable
    pub fn published(&self, mem: &Allocator, vm: usize, name_hash: u32) -> Option<i32> {
        let slot = self.slots.get(vm)?;
        let var = slot.published.iter().find(|v| v.name_hash == name_hash)?;
        let data = self.data_segment(mem, vm)?;
        let at = var.word_addr as usize * 4;
        data.get(at..at + 4).map(LittleEndian::read_i32)
    }

    /// Every published variable with its current value
    pub fn published_vars(&self, mem: &Allocator, vm: usize) -> Vec<(u32, i32)> {
        let Some(slot) = self.slots.get(vm) else {
            return Vec::new();
        };
        slot.published
            .iter()
            .filter_map(|v| {
                self.published(mem, vm, v.name_hash)
                    .map(|value| (v.name_hash, value))
            })
            .collect()
    }

    // endregion

    // region Scheduler accessors

    /// Advance VM time of a running instance
    pub fn advance_tick(&mut self, vm: usize, elapsed_ms: u64) {
        if let Some(slot) = self.slots.get_mut(vm) {
            if slot.status == VmStatus::Ok {
                if let Some(state) = slot.state.as_mut() {
                    state.tick += elapsed_ms;
                }
            }
        }
    }

    /// Catch up after falling behind: the next loop frame is one interval from now
    pub(crate) fn rebase_loop(&mut self, vm: usize) {
        let interval = self.settings.loop_interval_ms;
        if let Some(state) = self.slots.get_mut(vm).and_then(|s| s.state.as_mut()) {
            state.loop_tick = state.tick + interval;
        }
    }

    // endregion

    // region Sync accessors

    /// Program name hash and file hash of a loaded instance
    pub fn program_identity(&self, vm: usize) -> Option<(u32, u64)> {
        self.state(vm)
            .map(|s| (s.program_name_hash, s.file_hash))
    }

    pub fn sync_snapshot(&self, vm: usize) -> Option<SyncSnapshot> {
        let slot = self.slots.get(vm)?;
        if !slot.status.is_running() {
            return None;
        }
        slot.state.as_ref().map(SyncSnapshot::from_state)
    }

    /// Live data segment, borrowed from the allocator
    pub fn data_segment<'m>(&self, mem: &'m Allocator, vm: usize) -> Option<&'m [u8]> {
        let slot = self.slots.get(vm)?;
        let state = slot.state.as_ref()?;
        let image = mem.try_get(slot.handle?).ok()?;
        image.get(state.data_start..state.data_start + state.data_len)
    }

    pub fn data_hash(&self, mem: &Allocator, vm: usize) -> Option<u64> {
        self.data_segment(mem, vm).map(hash64)
    }

    /// `Ok -> WaitSync`; the data segment may then be overwritten by [`VmRunner::apply_sync`]
    pub fn begin_wait_sync(&mut self, vm: usize) -> bool {
        match self.slots.get_mut(vm) {
            Some(slot) if slot.status == VmStatus::Ok => {
                slot.status = VmStatus::WaitSync;
                debug!("[VM-RUNNER] VM {} waiting for sync", vm);
                true
            }
            _ => false,
        }
    }

    /// `WaitSync -> Ok`
    pub fn end_wait_sync(&mut self, vm: usize) -> bool {
        match self.slots.get_mut(vm) {
            Some(slot) if slot.status == VmStatus::WaitSync => {
                slot.status = VmStatus::Ok;
                true
            }
            _ => false,
        }
    }

    /// Overwrite deterministic state with a leader snapshot.
    ///
    /// Requires `WaitSync`. When `data` is given, the reassembled segment is copied from
    /// that allocator block into the image. The instance stays in `WaitSync`.
    pub fn apply_sync(
        &mut self,
        mem: &mut Allocator,
        vm: usize,
        snapshot: &SyncSnapshot,
        data: Option<Handle>,
    ) -> RunnerResult<()> {
        let slot = self.slot_mut(vm)?;
        if slot.status != VmStatus::WaitSync {
            return Err(RunnerError::WrongStatus {
                vm,
                status: slot.status.name(),
                expected: "wait_sync",
            });
        }
        let (Some(state), Some(handle)) = (slot.state.as_mut(), slot.handle) else {
            return Err(RunnerError::NotLoading(vm));
        };
        if state.program_name_hash != snapshot.program_name_hash
            || state.file_hash != snapshot.file_hash
        {
            return Err(RunnerError::ProgramMismatch {
                expected_name: state.program_name_hash,
                expected_file: state.file_hash,
                name: snapshot.program_name_hash,
                file: snapshot.file_hash,
            });
        }
        if snapshot.data_len as usize != state.data_len {
            return Err(VmError::SyncOverflow.into());
        }

        if let Some(buffer) = data {
            if mem.try_size(buffer)? < state.data_len {
                return Err(VmError::SyncOverflow.into());
            }
            mem.copy_between(buffer, 0, handle, state.data_start, state.data_len)?;
        }

        state.tick = snapshot.tick;
        state.loop_tick = snapshot.loop_tick;
        state.rng_seed = snapshot.rng_seed;
        state.frame_number = snapshot.frame_number;
        for (i, entry) in state.threads.iter_mut().enumerate() {
            *entry = snapshot.threads.get(i).copied().unwrap_or(ThreadEntry::FREE);
        }
        debug!(
            "[VM-RUNNER] VM {} synced: tick {}, frame {}",
            vm, state.tick, state.frame_number
        );
        Ok(())
    }

    pub fn checkpoints(&self, vm: usize) -> Option<&CheckpointRing> {
        self.slots.get(vm).map(|s| &s.checkpoints)
    }

    /// Replace the checkpoint window (oldest first)
    pub fn seed_checkpoints(&mut self, vm: usize, hashes: &[u64]) {
        if let Some(slot) = self.slots.get_mut(vm) {
            slot.checkpoints.seed(hashes);
        }
    }

    // endregion
}

/// Free the image and drop everything the program published
fn teardown(slot: &mut VmSlot, mem: &mut Allocator) {
    if let Some(handle) = slot.handle.take() {
        if let Err(err) = mem.try_free(handle) {
            error!("[VM-RUNNER] Failed to free image handle {}: {}", handle, err);
        }
    }
    slot.image_size = 0;
    slot.load = None;
    slot.state = None;
    slot.published.clear();
    slot.checkpoints.clear();
}

fn execute_mode(
    slot: &mut VmSlot,
    mem: &mut Allocator,
    mode: RunMode,
    settings: &RunnerSettings,
) -> VmResult<ExecOutcome> {
    let handle = slot.handle.ok_or(VmError::MemoryFault)?;
    let state = slot.state.as_mut().ok_or(VmError::MemoryFault)?;
    let image = mem.try_get_mut(handle).map_err(|_| VmError::MemoryFault)?;
    if image.len() < state.data_start + state.data_len {
        return Err(VmError::MemoryFault);
    }
    let (head, tail) = image.split_at_mut(state.data_start);
    let code = &head[state.code_start..state.code_start + state.code_len];
    let data = &mut tail[..state.data_len];

    match mode {
        RunMode::Init => {
            let entry = state.init_start;
            execute(code, data, state, entry, None)
        }
        RunMode::Func(addr) => execute(code, data, state, addr, None),
        RunMode::Loop => {
            let entry = state.loop_start;
            let outcome = execute(code, data, state, entry, None)?;
            if outcome == ExecOutcome::Returned {
                state.loop_tick += settings.loop_interval_ms;
                state.frame_number = state.frame_number.wrapping_add(1);
                if state.frame_number % settings.checkpoint_interval == 0 {
                    slot.checkpoints.push(hash64(data));
                }
            }
            Ok(outcome)
        }
        RunMode::Thread(index) => {
            let Some(thread) = state.threads.get(index).copied().filter(ThreadEntry::is_active)
            else {
                return Ok(ExecOutcome::Returned);
            };
            let outcome = execute(code, data, state, thread.pc_offset, Some(index))?;
            let entry = &mut state.threads[index];
            if entry.func_addr == thread.func_addr {
                match outcome {
                    ExecOutcome::Suspended { pc, wake_tick } => {
                        entry.pc_offset = pc;
                        entry.tick = wake_tick;
                    }
                    ExecOutcome::Returned => *entry = ThreadEntry::FREE,
                    ExecOutcome::Halted => {}
                }
            }
            Ok(outcome)
        }
    }
}
