// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Compacting collector
//!
//! Two cursors walk the arena from its base: `dirty` is the next write position, `clean`
//! scans for the next live block. Each live block found past `dirty` is slid down with one
//! `copy_within` and its handle table entry is rewritten. The pass never yields; a
//! half-compacted arena is never observable because `collect()` holds `&mut Allocator`.

use tracing::{debug, warn};

use crate::allocator::Allocator;
use crate::block::{BlockHeader, BLOCK_ALIGN, HEADER_LEN};
use crate::error::{halt, MemoryError, MemoryResult};

impl Allocator {
    /// Compact the arena unconditionally. Halts if the arena is corrupted.
    ///
    /// Returns the number of bytes moved back into free space.
    pub fn collect(&mut self) -> usize {
        match self.try_collect() {
            Ok(reclaimed) => reclaimed,
            Err(err) => halt(err),
        }
    }

    /// Compact only when dirty space exceeds the configured defrag threshold.
    pub fn collect_if_needed(&mut self) -> Option<usize> {
        if self.stats.dirty_space > self.settings.defrag_threshold {
            Some(self.collect())
        } else {
            None
        }
    }

    /// Compact the arena, reporting corruption instead of halting.
    ///
    /// Every live block is validated before anything moves, so an error leaves the arena as
    /// it was.
    pub fn try_collect(&mut self) -> MemoryResult<usize> {
        self.try_check_canaries()?;
        self.check_walkable()?;

        if self.stats.dirty_space == 0 {
            return Ok(0);
        }

        let end = self.free_ptr;
        let mut dirty = 0usize;

        // Leading run of live blocks is already in place
        while dirty < end {
            let header = BlockHeader::read(&self.arena, dirty);
            if header.dirty {
                break;
            }
            dirty += header.footprint();
        }

        let mut clean = dirty;
        let mut moved = 0usize;
        while clean < end {
            let header = BlockHeader::read(&self.arena, clean);
            let footprint = header.footprint();
            if header.dirty {
                clean += footprint;
                continue;
            }

            if clean != dirty {
                self.arena.copy_within(clean..clean + footprint, dirty);
                self.handles[header.handle as usize] = Some(dirty as u32);
                moved += 1;
            }
            dirty += footprint;
            clean += footprint;
        }

        let reclaimed = end - dirty;
        self.arena[dirty..end].fill(0);
        self.free_ptr = dirty;

        if reclaimed != self.stats.dirty_space {
            warn!(
                "[GC] Reclaimed {} bytes but {} were marked dirty",
                reclaimed, self.stats.dirty_space
            );
        }
        self.stats.free_space = self.stats.heap_size - self.stats.used_space;
        self.stats.dirty_space = 0;
        self.stats.gc_runs = self.stats.gc_runs.wrapping_add(1);
        self.stats.bytes_reclaimed += reclaimed as u64;

        debug!(
            "[GC] Compacted arena: {} blocks moved, {} bytes reclaimed",
            moved, reclaimed
        );

        self.check_canaries();
        Ok(reclaimed)
    }

    /// Ensure the block chain from the arena base lands exactly on the free pointer.
    fn check_walkable(&self) -> MemoryResult<()> {
        let mut offset = 0usize;
        while offset < self.free_ptr {
            if offset + HEADER_LEN > self.free_ptr {
                return Err(MemoryError::Misaligned { handle: -1, offset });
            }
            let header = BlockHeader::read(&self.arena, offset);
            let footprint = header.footprint();
            if footprint % BLOCK_ALIGN != 0 || offset + footprint > self.free_ptr {
                return Err(MemoryError::Misaligned {
                    handle: header.handle,
                    offset,
                });
            }
            let owner = self.handles.get(header.handle as usize).copied().flatten();
            if !header.dirty && owner != Some(offset as u32) {
                return Err(MemoryError::HeaderMismatch {
                    handle: header.handle,
                    offset,
                    found: header.handle,
                });
            }
            offset += footprint;
        }
        Ok(())
    }
}
