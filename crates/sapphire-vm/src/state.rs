// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Deterministic per-instance VM state

use serde::{Deserialize, Serialize};

use crate::image::ImageLayout;

/// `func_addr` of an unused thread slot
pub const THREAD_FREE: u16 = 0xFFFF;

/// One cooperative thread: entry function, resume pc and wake tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadEntry {
    pub func_addr: u16,
    pub pc_offset: u16,
    pub tick: u64,
}

impl ThreadEntry {
    pub const FREE: ThreadEntry = ThreadEntry {
        func_addr: THREAD_FREE,
        pc_offset: 0,
        tick: 0,
    };

    pub fn is_active(&self) -> bool {
        self.func_addr != THREAD_FREE
    }
}

impl Default for ThreadEntry {
    fn default() -> Self {
        Self::FREE
    }
}

/// State that must be identical on every node of a sync group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmState {
    /// Milliseconds of VM time since start
    pub tick: u64,
    /// Tick at which the next loop frame is due
    pub loop_tick: u64,
    pub rng_seed: u64,
    pub frame_number: u32,
    pub threads: Vec<ThreadEntry>,

    pub program_name_hash: u32,
    pub file_hash: u64,
    pub code_start: usize,
    pub code_len: usize,
    pub data_start: usize,
    pub data_len: usize,
    pub init_start: u16,
    pub loop_start: u16,
    pub max_cycles: u32,
}

impl VmState {
    pub fn new(layout: &ImageLayout, max_threads: usize, max_cycles: u32, rng_seed: u64) -> Self {
        Self {
            tick: 0,
            loop_tick: 0,
            rng_seed,
            frame_number: 0,
            threads: vec![ThreadEntry::FREE; max_threads],
            program_name_hash: layout.program_name_hash,
            file_hash: layout.file_hash,
            code_start: layout.code_start,
            code_len: layout.code_len,
            data_start: layout.data_start,
            data_len: layout.data_len,
            init_start: layout.init_start,
            loop_start: layout.loop_start,
            max_cycles,
        }
    }

    /// Earliest tick at which the loop or any thread wants to run
    pub fn next_wake(&self) -> u64 {
        self.threads
            .iter()
            .filter(|t| t.is_active())
            .map(|t| t.tick)
            .fold(self.loop_tick, u64::min)
    }

    pub fn active_threads(&self) -> usize {
        self.threads.iter().filter(|t| t.is_active()).count()
    }
}

/// Snapshot of the synchronized fields, exchanged by the frame sync protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub program_name_hash: u32,
    pub file_hash: u64,
    pub tick: u64,
    pub loop_tick: u64,
    pub rng_seed: u64,
    pub frame_number: u32,
    pub data_len: u32,
    pub threads: Vec<ThreadEntry>,
}

impl SyncSnapshot {
    pub fn from_state(state: &VmState) -> Self {
        Self {
            program_name_hash: state.program_name_hash,
            file_hash: state.file_hash,
            tick: state.tick,
            loop_tick: state.loop_tick,
            rng_seed: state.rng_seed,
            frame_number: state.frame_number,
            data_len: state.data_len as u32,
            threads: state.threads.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> ImageLayout {
        ImageLayout {
            program_name_hash: 1,
            file_hash: 2,
            code_start: 32,
            code_len: 8,
            data_start: 40,
            data_len: 8,
            init_start: 0,
            loop_start: 4,
            published: Vec::new(),
        }
    }

    #[test]
    fn test_next_wake_prefers_earliest_thread() {
        let mut state = VmState::new(&layout(), 4, 1000, 7);
        state.loop_tick = 100;
        assert_eq!(state.next_wake(), 100);

        state.threads[2] = ThreadEntry {
            func_addr: 4,
            pc_offset: 6,
            tick: 40,
        };
        assert_eq!(state.next_wake(), 40);
        assert_eq!(state.active_threads(), 1);
    }
}
