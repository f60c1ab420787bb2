// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Handle-indexed block allocator over a fixed arena

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::block::{
    footprint_for, BlockHeader, BlockInfo, BLOCK_ALIGN, CANARY_LEN, CANARY_VALUE, HEADER_LEN,
};
use crate::error::{halt, MemoryError, MemoryResult};
use crate::handle::{Handle, MemType, MAX_HANDLES_LIMIT};
use crate::stats::MemStats;

/// Largest data region a header can describe (bit 31 of the size field is the dirty flag)
const MAX_BLOCK_SIZE: usize = 0x7FFF_FFFF;

/// Allocator sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorSettings {
    /// Arena size in bytes (multiple of 4)
    pub heap_size: usize,
    /// Number of handle table slots
    pub max_handles: usize,
    /// Dirty bytes tolerated before `collect_if_needed` compacts
    pub defrag_threshold: usize,
}

impl Default for AllocatorSettings {
    fn default() -> Self {
        Self {
            heap_size: 32 * 1024,
            max_handles: 128,
            defrag_threshold: 512,
        }
    }
}

impl AllocatorSettings {
    pub fn validate(&self) -> MemoryResult<()> {
        if self.heap_size % BLOCK_ALIGN != 0 {
            return Err(MemoryError::InvalidSettings(format!(
                "heap_size {} is not a multiple of {}",
                self.heap_size, BLOCK_ALIGN
            )));
        }
        if self.heap_size < 4 * (HEADER_LEN + CANARY_LEN + BLOCK_ALIGN) {
            return Err(MemoryError::InvalidSettings(format!(
                "heap_size {} is too small",
                self.heap_size
            )));
        }
        if self.heap_size > MAX_BLOCK_SIZE {
            return Err(MemoryError::InvalidSettings(format!(
                "heap_size {} exceeds {}",
                self.heap_size, MAX_BLOCK_SIZE
            )));
        }
        if self.max_handles == 0 || self.max_handles > MAX_HANDLES_LIMIT {
            return Err(MemoryError::InvalidSettings(format!(
                "max_handles must be in 1..={}, got {}",
                MAX_HANDLES_LIMIT, self.max_handles
            )));
        }
        Ok(())
    }
}

/// Relocatable heap.
///
/// Owns the arena and the handle table. Blocks are bump-allocated from the free pointer or
/// placed into a suitable dirty block; freed blocks stay in place until [`Allocator::collect`]
/// slides the survivors down.
///
/// Data is reached through [`Allocator::get`] / [`Allocator::get_mut`], which borrow the
/// allocator. A slice therefore cannot be held across `collect()`, `alloc()` or `free()`.
pub struct Allocator {
    pub(crate) arena: Box<[u8]>,
    /// Arena offset of each live block header, indexed by unswizzled handle
    pub(crate) handles: Vec<Option<u32>>,
    /// First byte past the last block
    pub(crate) free_ptr: usize,
    pub(crate) settings: AllocatorSettings,
    pub(crate) stats: MemStats,
}

impl Allocator {
    /// Create an allocator with a zeroed arena of `settings.heap_size` bytes
    pub fn new(settings: AllocatorSettings) -> MemoryResult<Self> {
        settings.validate()?;
        let arena = vec![0u8; settings.heap_size].into_boxed_slice();
        Ok(Self::build(arena, settings))
    }

    /// Adopt a caller-provided arena (e.g. a statically reserved region).
    ///
    /// `settings.heap_size` is replaced by the arena length rounded down to 4 bytes.
    pub fn with_arena(arena: Box<[u8]>, mut settings: AllocatorSettings) -> MemoryResult<Self> {
        settings.heap_size = arena.len() - arena.len() % BLOCK_ALIGN;
        settings.validate()?;
        Ok(Self::build(arena, settings))
    }

    fn build(arena: Box<[u8]>, settings: AllocatorSettings) -> Self {
        let mut allocator = Self {
            arena,
            handles: Vec::new(),
            free_ptr: 0,
            settings,
            stats: MemStats::default(),
        };
        allocator.reset();
        allocator
    }

    /// Forget every block: free pointer back to the arena start, stats and handles cleared.
    pub fn reset(&mut self) {
        self.free_ptr = 0;
        self.handles = vec![None; self.settings.max_handles];
        self.stats = MemStats::new(self.settings.heap_size);
        self.arena.fill(0);
        debug!(
            "[MEM] Heap initialized: {} bytes, {} handles",
            self.settings.heap_size, self.settings.max_handles
        );
    }

    pub fn settings(&self) -> &AllocatorSettings {
        &self.settings
    }

    pub fn stats(&self) -> MemStats {
        self.stats
    }

    // region Allocation

    /// Allocate `size` bytes tagged with `mem_type`.
    ///
    /// The data region is zeroed. Exhaustion is reported as `OutOfSpace` or `NoHandles`
    /// and leaves the heap untouched.
    pub fn alloc(&mut self, size: usize, mem_type: MemType) -> MemoryResult<Handle> {
        self.stats.alloc_attempts = self.stats.alloc_attempts.wrapping_add(1);

        let result = self.alloc_inner(size, mem_type);
        if let Err(err) = &result {
            self.stats.alloc_failures = self.stats.alloc_failures.wrapping_add(1);
            warn!("[MEM] alloc({}, {}) failed: {}", size, mem_type.name(), err);
        }
        result
    }

    fn alloc_inner(&mut self, size: usize, mem_type: MemType) -> MemoryResult<Handle> {
        if size > self.settings.heap_size {
            return Err(MemoryError::OutOfSpace {
                requested: size,
                available: self.stats.free_space,
            });
        }
        let (footprint, _) = footprint_for(size);

        let index = self
            .handles
            .iter()
            .position(Option::is_none)
            .ok_or(MemoryError::NoHandles {
                max: self.settings.max_handles,
            })?;

        let (offset, block_footprint) = match self.find_dirty_fit(size) {
            Some((offset, dirty_footprint)) => {
                self.stats.dirty_space -= dirty_footprint;
                trace!(
                    "[MEM] Reusing dirty block at {} ({} bytes) for {} bytes",
                    offset,
                    dirty_footprint,
                    size
                );
                (offset, dirty_footprint)
            }
            None => {
                if self.stats.free_space < footprint {
                    return Err(MemoryError::OutOfSpace {
                        requested: footprint,
                        available: self.stats.free_space,
                    });
                }
                let offset = self.free_ptr;
                self.free_ptr += footprint;
                self.stats.free_space -= footprint;
                (offset, footprint)
            }
        };

        let region = block_footprint - HEADER_LEN - CANARY_LEN;
        let header = BlockHeader {
            size: region as u32,
            dirty: false,
            handle: index as i16,
            mem_type: mem_type.0,
            padding_len: (region - size) as u8,
        };
        header.write(&mut self.arena, offset);
        self.arena[offset + HEADER_LEN..offset + HEADER_LEN + region].fill(0);
        self.arena[header.canary_offset(offset)] = CANARY_VALUE;

        self.handles[index] = Some(offset as u32);
        self.stats.used_space += block_footprint;
        self.stats.data_space += size;
        self.stats.handles_used += 1;
        self.stats.peak_usage = self.stats.peak_usage.max(self.stats.used_space);

        let handle = Handle::from_index(index);
        trace!(
            "[MEM] alloc {} bytes ({}) -> handle {} at offset {}",
            size,
            mem_type.name(),
            handle,
            offset
        );
        Ok(handle)
    }

    /// Best-fitting dirty block able to host `size` bytes with at most 255 bytes of padding.
    fn find_dirty_fit(&self, size: usize) -> Option<(usize, usize)> {
        if self.stats.dirty_space == 0 {
            return None;
        }
        let mut best: Option<(usize, usize)> = None;
        for block in self.blocks().filter(|b| b.dirty) {
            let region = block.footprint - HEADER_LEN - CANARY_LEN;
            if region < size || region - size > u8::MAX as usize {
                continue;
            }
            if best.map_or(true, |(_, fp)| block.footprint < fp) {
                best = Some((block.offset, block.footprint));
            }
        }
        best
    }

    /// Free a block. Halts on an invalid handle.
    pub fn free(&mut self, handle: Handle) {
        if let Err(err) = self.try_free(handle) {
            halt(err);
        }
    }

    /// Free a block, reporting handle validation failures instead of halting.
    ///
    /// The block is marked dirty and its footprint moves to `dirty_space`. The bytes stay
    /// in the arena until the collector runs or a later `alloc` reuses the block.
    pub fn try_free(&mut self, handle: Handle) -> MemoryResult<()> {
        let (index, offset, mut header) = self.resolve(handle)?;

        header.dirty = true;
        header.write(&mut self.arena, offset);

        self.handles[index] = None;
        self.stats.used_space -= header.footprint();
        self.stats.dirty_space += header.footprint();
        self.stats.data_space -= header.data_len();
        self.stats.handles_used -= 1;

        trace!(
            "[MEM] free handle {} ({} bytes dirty)",
            handle,
            header.footprint()
        );
        Ok(())
    }

    /// Resize a block while keeping its handle value.
    ///
    /// A new block of the same type is allocated, the old contents copied (truncated to
    /// `new_size`), the old block freed, and the original handle slot remapped to the new
    /// block. On exhaustion the original block is left untouched.
    pub fn realloc(&mut self, handle: Handle, new_size: usize) -> MemoryResult<()> {
        let (index, offset, header) = match self.resolve(handle) {
            Ok(resolved) => resolved,
            Err(err) => halt(err),
        };

        let temp = self.alloc(new_size, MemType(header.mem_type))?;
        let temp_index = temp.index().unwrap_or_else(|| halt(MemoryError::InvalidHandle(temp.raw())));
        let new_offset = match self.handles[temp_index] {
            Some(o) => o as usize,
            None => halt(MemoryError::InvalidHandle(temp.raw())),
        };

        let copy_len = header.data_len().min(new_size);
        self.arena.copy_within(
            offset + HEADER_LEN..offset + HEADER_LEN + copy_len,
            new_offset + HEADER_LEN,
        );

        self.free(handle);

        self.handles[index] = Some(new_offset as u32);
        self.handles[temp_index] = None;
        let mut new_header = BlockHeader::read(&self.arena, new_offset);
        new_header.handle = index as i16;
        new_header.write(&mut self.arena, new_offset);

        debug!(
            "[MEM] realloc handle {}: {} -> {} bytes",
            handle,
            header.data_len(),
            new_size
        );
        Ok(())
    }

    // endregion

    // region Access

    /// Data region of a live block. Halts on an invalid handle.
    pub fn get(&self, handle: Handle) -> &[u8] {
        match self.try_get(handle) {
            Ok(data) => data,
            Err(err) => halt(err),
        }
    }

    /// Mutable data region of a live block. Halts on an invalid handle.
    pub fn get_mut(&mut self, handle: Handle) -> &mut [u8] {
        match self.try_get_mut(handle) {
            Ok(data) => data,
            Err(err) => halt(err),
        }
    }

    pub fn try_get(&self, handle: Handle) -> MemoryResult<&[u8]> {
        let (_, offset, header) = self.resolve(handle)?;
        let start = offset + HEADER_LEN;
        Ok(&self.arena[start..start + header.data_len()])
    }

    pub fn try_get_mut(&mut self, handle: Handle) -> MemoryResult<&mut [u8]> {
        let (_, offset, header) = self.resolve(handle)?;
        let start = offset + HEADER_LEN;
        Ok(&mut self.arena[start..start + header.data_len()])
    }

    /// Requested size of a live block. Halts on an invalid handle.
    pub fn size(&self, handle: Handle) -> usize {
        match self.try_size(handle) {
            Ok(size) => size,
            Err(err) => halt(err),
        }
    }

    pub fn try_size(&self, handle: Handle) -> MemoryResult<usize> {
        self.resolve(handle).map(|(_, _, header)| header.data_len())
    }

    /// Type tag of a live block
    pub fn mem_type(&self, handle: Handle) -> MemoryResult<MemType> {
        self.resolve(handle).map(|(_, _, header)| MemType(header.mem_type))
    }

    /// True if `handle` currently names a live, intact block
    pub fn is_valid(&self, handle: Handle) -> bool {
        self.resolve(handle).is_ok()
    }

    /// Copy `len` bytes between two live blocks (or within one).
    pub fn copy_between(
        &mut self,
        src: Handle,
        src_offset: usize,
        dst: Handle,
        dst_offset: usize,
        len: usize,
    ) -> MemoryResult<()> {
        let (_, src_block, src_header) = self.resolve(src)?;
        let (_, dst_block, dst_header) = self.resolve(dst)?;

        check_bounds(src, src_offset, len, src_header.data_len())?;
        check_bounds(dst, dst_offset, len, dst_header.data_len())?;

        let from = src_block + HEADER_LEN + src_offset;
        let to = dst_block + HEADER_LEN + dst_offset;
        self.arena.copy_within(from..from + len, to);
        Ok(())
    }

    // endregion

    // region Validation

    /// Validate every live block. Halts on the first corrupted block.
    pub fn check_canaries(&self) {
        if let Err(err) = self.try_check_canaries() {
            halt(err);
        }
    }

    /// Validate header alignment, footprint alignment and canary of every live handle.
    pub fn try_check_canaries(&self) -> MemoryResult<()> {
        for index in 0..self.handles.len() {
            if self.handles[index].is_some() {
                self.resolve(Handle::from_index(index))?;
            }
        }
        Ok(())
    }

    /// Unswizzle and validate a handle.
    ///
    /// Returns the table index, the header offset and the decoded header.
    pub(crate) fn resolve(&self, handle: Handle) -> MemoryResult<(usize, usize, BlockHeader)> {
        let raw = handle.raw();
        let index = handle
            .index()
            .filter(|index| *index < self.handles.len())
            .ok_or(MemoryError::InvalidHandle(raw))?;
        let offset = self.handles[index].ok_or(MemoryError::InvalidHandle(raw))? as usize;

        if offset % BLOCK_ALIGN != 0 || offset + HEADER_LEN + CANARY_LEN > self.free_ptr {
            return Err(MemoryError::Misaligned {
                handle: raw,
                offset,
            });
        }

        let header = BlockHeader::read(&self.arena, offset);
        if header.dirty {
            return Err(MemoryError::DirtyHandle {
                handle: raw,
                offset,
            });
        }
        if header.handle as usize != index {
            return Err(MemoryError::HeaderMismatch {
                handle: raw,
                offset,
                found: header.handle,
            });
        }
        if header.footprint() % BLOCK_ALIGN != 0
            || offset + header.footprint() > self.free_ptr
            || header.padding_len as u32 > header.size
        {
            return Err(MemoryError::Misaligned {
                handle: raw,
                offset,
            });
        }

        let found = self.arena[header.canary_offset(offset)];
        if found != CANARY_VALUE {
            return Err(MemoryError::CanaryCorrupted {
                handle: raw,
                offset,
                found,
            });
        }

        Ok((index, offset, header))
    }

    // endregion

    /// Walk every block between the arena start and the free pointer
    pub fn blocks(&self) -> BlockIter<'_> {
        BlockIter {
            allocator: self,
            offset: 0,
        }
    }

    /// Raw arena bytes for diagnostics and fault injection in tests
    #[doc(hidden)]
    pub fn arena_mut(&mut self) -> &mut [u8] {
        &mut self.arena
    }
}

fn check_bounds(handle: Handle, offset: usize, len: usize, size: usize) -> MemoryResult<()> {
    let end = offset.checked_add(len).unwrap_or(usize::MAX);
    if end > size {
        return Err(MemoryError::OutOfBounds {
            handle: handle.raw(),
            offset,
            end,
            size,
        });
    }
    Ok(())
}

/// Iterator over the arena's blocks, live and dirty
pub struct BlockIter<'a> {
    allocator: &'a Allocator,
    offset: usize,
}

impl Iterator for BlockIter<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        let allocator = self.allocator;
        if self.offset + HEADER_LEN > allocator.free_ptr {
            return None;
        }
        let header = BlockHeader::read(&allocator.arena, self.offset);
        let footprint = header.footprint();
        if footprint % BLOCK_ALIGN != 0 || self.offset + footprint > allocator.free_ptr {
            // Unwalkable arena; stop rather than read past the free pointer
            self.offset = allocator.free_ptr;
            return None;
        }

        let info = BlockInfo {
            offset: self.offset,
            footprint,
            data_len: header.size.saturating_sub(header.padding_len as u32) as usize,
            dirty: header.dirty,
            handle: (!header.dirty).then(|| Handle::from_index(header.handle as usize)),
            mem_type: MemType(header.mem_type),
        };
        self.offset += footprint;
        Some(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_heap() -> Allocator {
        Allocator::new(AllocatorSettings {
            heap_size: 1024,
            max_handles: 8,
            defrag_threshold: 64,
        })
        .unwrap()
    }

    #[test]
    fn test_alloc_updates_stats() {
        let mut mem = small_heap();
        let handle = mem.alloc(100, MemType::SCRATCH).unwrap();

        let stats = mem.stats();
        assert_eq!(stats.used_space, 112);
        assert_eq!(stats.free_space, 1024 - 112);
        assert_eq!(stats.data_space, 100);
        assert_eq!(stats.handles_used, 1);
        assert_eq!(stats.alloc_attempts, 1);
        assert!(stats.is_conserved());
        assert_eq!(mem.size(handle), 100);
        assert_eq!(mem.get(handle).len(), 100);
    }

    #[test]
    fn test_write_then_read_pattern() {
        let mut mem = small_heap();
        let handle = mem.alloc(37, MemType::SCRATCH).unwrap();
        for (i, byte) in mem.get_mut(handle).iter_mut().enumerate() {
            *byte = i as u8 ^ 0x5A;
        }
        let expected: Vec<u8> = (0..37u8).map(|i| i ^ 0x5A).collect();
        assert_eq!(mem.get(handle), expected.as_slice());
        mem.check_canaries();
    }

    #[test]
    fn test_exhaustion_is_recoverable() {
        let mut mem = small_heap();
        let err = mem.alloc(2000, MemType::SCRATCH).unwrap_err();
        assert!(matches!(err, MemoryError::OutOfSpace { .. }));
        assert_eq!(mem.stats().alloc_failures, 1);
        assert_eq!(mem.stats().used_space, 0);
        assert!(mem.stats().is_conserved());
    }

    #[test]
    fn test_handle_table_exhaustion() {
        let mut mem = small_heap();
        for _ in 0..8 {
            mem.alloc(4, MemType::SCRATCH).unwrap();
        }
        let err = mem.alloc(4, MemType::SCRATCH).unwrap_err();
        assert_eq!(err, MemoryError::NoHandles { max: 8 });
    }

    #[test]
    fn test_free_moves_footprint_to_dirty() {
        let mut mem = small_heap();
        let handle = mem.alloc(100, MemType::SCRATCH).unwrap();
        mem.free(handle);

        let stats = mem.stats();
        assert_eq!(stats.used_space, 0);
        assert_eq!(stats.dirty_space, 112);
        assert_eq!(stats.data_space, 0);
        assert_eq!(stats.handles_used, 0);
        assert!(stats.is_conserved());
    }

    #[test]
    fn test_stale_handle_detected() {
        let mut mem = small_heap();
        let handle = mem.alloc(16, MemType::SCRATCH).unwrap();
        mem.free(handle);

        assert_eq!(mem.try_get(handle), Err(MemoryError::InvalidHandle(handle.raw())));
        assert_eq!(mem.try_free(handle), Err(MemoryError::InvalidHandle(handle.raw())));
        assert!(!mem.is_valid(handle));
    }

    #[test]
    #[should_panic(expected = "heap corruption")]
    fn test_double_free_halts() {
        let mut mem = small_heap();
        let handle = mem.alloc(16, MemType::SCRATCH).unwrap();
        mem.free(handle);
        mem.free(handle);
    }

    #[test]
    fn test_canary_corruption_detected() {
        let mut mem = small_heap();
        let handle = mem.alloc(10, MemType::SCRATCH).unwrap();
        // header (8) + region (11) puts the canary at byte 19
        mem.arena_mut()[19] = 0;
        assert!(matches!(
            mem.try_check_canaries(),
            Err(MemoryError::CanaryCorrupted { found: 0, .. })
        ));
        assert!(mem.try_get(handle).is_err());
    }

    #[test]
    fn test_unissued_handles_rejected() {
        let mem = small_heap();
        assert!(mem.try_get(Handle::from_raw(0)).is_err());
        assert!(mem.try_get(Handle::from_index(3)).is_err());
        assert!(mem.try_get(Handle::from_index(500)).is_err());
    }

    #[test]
    fn test_realloc_keeps_handle_and_contents() {
        let mut mem = small_heap();
        let handle = mem.alloc(8, MemType::VM_IMAGE).unwrap();
        mem.get_mut(handle).copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let other = mem.alloc(8, MemType::SCRATCH).unwrap();

        mem.realloc(handle, 20).unwrap();

        assert_eq!(mem.size(handle), 20);
        assert_eq!(&mem.get(handle)[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&mem.get(handle)[8..], &[0; 12]);
        assert_eq!(mem.mem_type(handle).unwrap(), MemType::VM_IMAGE);
        assert!(mem.is_valid(other));
        assert_eq!(mem.stats().handles_used, 2);
        assert!(mem.stats().is_conserved());
        mem.check_canaries();
    }

    #[test]
    fn test_realloc_shrink_truncates() {
        let mut mem = small_heap();
        let handle = mem.alloc(8, MemType::SCRATCH).unwrap();
        mem.get_mut(handle).copy_from_slice(&[9; 8]);
        mem.realloc(handle, 3).unwrap();
        assert_eq!(mem.get(handle), &[9, 9, 9]);
    }

    #[test]
    fn test_realloc_failure_leaves_block() {
        let mut mem = small_heap();
        let handle = mem.alloc(8, MemType::SCRATCH).unwrap();
        mem.get_mut(handle)[0] = 42;
        assert!(mem.realloc(handle, 4096).is_err());
        assert_eq!(mem.get(handle)[0], 42);
        assert_eq!(mem.size(handle), 8);
    }

    #[test]
    fn test_copy_between_blocks() {
        let mut mem = small_heap();
        let src = mem.alloc(8, MemType::SCRATCH).unwrap();
        let dst = mem.alloc(16, MemType::SCRATCH).unwrap();
        mem.get_mut(src).copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);

        mem.copy_between(src, 2, dst, 10, 4).unwrap();
        assert_eq!(&mem.get(dst)[10..14], &[3, 4, 5, 6]);

        let err = mem.copy_between(src, 6, dst, 0, 4).unwrap_err();
        assert!(matches!(err, MemoryError::OutOfBounds { .. }));
    }

    #[test]
    fn test_dirty_block_reused_in_place() {
        let mut mem = small_heap();
        let first = mem.alloc(100, MemType::SCRATCH).unwrap();
        let _second = mem.alloc(200, MemType::SCRATCH).unwrap();
        mem.free(first);

        let third = mem.alloc(50, MemType::SCRATCH).unwrap();
        assert_eq!(third, first);
        assert_eq!(mem.size(third), 50);
        assert_eq!(mem.stats().dirty_space, 0);
        assert_eq!(mem.stats().used_space, 112 + 212);
        assert!(mem.stats().is_conserved());
    }

    #[test]
    fn test_blocks_walk() {
        let mut mem = small_heap();
        let a = mem.alloc(4, MemType::SCRATCH).unwrap();
        let b = mem.alloc(4, MemType::MESSAGE).unwrap();
        mem.free(a);

        let blocks: Vec<BlockInfo> = mem.blocks().collect();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].dirty);
        assert_eq!(blocks[0].handle, None);
        assert_eq!(blocks[1].handle, Some(b));
        assert_eq!(blocks[1].mem_type, MemType::MESSAGE);
    }

    #[test]
    fn test_invalid_settings() {
        let bad = AllocatorSettings {
            heap_size: 1023,
            ..AllocatorSettings::default()
        };
        assert!(Allocator::new(bad).is_err());

        let bad = AllocatorSettings {
            max_handles: 0,
            ..AllocatorSettings::default()
        };
        assert!(Allocator::new(bad).is_err());
    }

    #[test]
    fn test_with_arena_rounds_down() {
        let mem = Allocator::with_arena(vec![0u8; 1027].into_boxed_slice(), AllocatorSettings::default())
            .unwrap();
        assert_eq!(mem.stats().heap_size, 1024);
    }
}
