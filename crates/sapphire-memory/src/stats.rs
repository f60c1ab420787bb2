// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Heap runtime statistics

use serde::{Deserialize, Serialize};

/// Aggregate heap counters.
///
/// Outside an in-flight operation, `free_space + used_space + dirty_space == heap_size`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemStats {
    pub heap_size: usize,
    /// Bytes between the free pointer and the end of the arena
    pub free_space: usize,
    /// Footprint of live blocks (headers, padding and canaries included)
    pub used_space: usize,
    /// Footprint of freed blocks awaiting compaction
    pub dirty_space: usize,
    /// Bytes requested by callers for live blocks
    pub data_space: usize,
    /// High-water mark of `used_space`
    pub peak_usage: usize,
    pub handles_used: usize,
    pub alloc_attempts: u32,
    pub alloc_failures: u32,
    pub gc_runs: u32,
    pub bytes_reclaimed: u64,
}

impl MemStats {
    pub(crate) fn new(heap_size: usize) -> Self {
        Self {
            heap_size,
            free_space: heap_size,
            ..Default::default()
        }
    }

    /// Conservation check used by tests and housekeeping diagnostics
    pub fn is_conserved(&self) -> bool {
        self.free_space + self.used_space + self.dirty_space == self.heap_size
    }

    /// Share of the heap that is live, 0.0-1.0
    pub fn utilization(&self) -> f32 {
        if self.heap_size == 0 {
            return 0.0;
        }
        self.used_space as f32 / self.heap_size as f32
    }
}
