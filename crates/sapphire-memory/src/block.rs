// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Block header layout inside the arena
//!
//! All header reads and writes go through this module, addressed by byte offset.

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use crate::handle::{Handle, MemType};

/// Size of the per-block header in bytes
pub const HEADER_LEN: usize = 8;

/// Size of the trailing canary in bytes
pub(crate) const CANARY_LEN: usize = 1;

/// Sentinel written after every block
pub const CANARY_VALUE: u8 = 0x47;

/// Footprint alignment for every block
pub const BLOCK_ALIGN: usize = 4;

/// High bit of the size field marks a freed block
pub(crate) const DIRTY_FLAG: u32 = 0x8000_0000;

/// Decoded block header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockHeader {
    /// Data region length (requested size + padding), dirty bit stripped
    pub size: u32,
    pub dirty: bool,
    /// Unswizzled handle table index
    pub handle: i16,
    pub mem_type: u8,
    pub padding_len: u8,
}

impl BlockHeader {
    pub fn read(arena: &[u8], offset: usize) -> Self {
        let raw_size = LittleEndian::read_u32(&arena[offset..offset + 4]);
        Self {
            size: raw_size & !DIRTY_FLAG,
            dirty: raw_size & DIRTY_FLAG != 0,
            handle: LittleEndian::read_i16(&arena[offset + 4..offset + 6]),
            mem_type: arena[offset + 6],
            padding_len: arena[offset + 7],
        }
    }

    pub fn write(&self, arena: &mut [u8], offset: usize) {
        let raw_size = if self.dirty {
            self.size | DIRTY_FLAG
        } else {
            self.size
        };
        LittleEndian::write_u32(&mut arena[offset..offset + 4], raw_size);
        LittleEndian::write_i16(&mut arena[offset + 4..offset + 6], self.handle);
        arena[offset + 6] = self.mem_type;
        arena[offset + 7] = self.padding_len;
    }

    /// Total bytes occupied in the arena, header and canary included
    pub fn footprint(&self) -> usize {
        HEADER_LEN + self.size as usize + CANARY_LEN
    }

    /// Size originally requested by the caller
    pub fn data_len(&self) -> usize {
        self.size as usize - self.padding_len as usize
    }

    /// Arena offset of the canary byte for a block starting at `offset`
    pub fn canary_offset(&self, offset: usize) -> usize {
        offset + HEADER_LEN + self.size as usize
    }
}

/// Footprint and padding for a request of `size` bytes.
///
/// Returns `(footprint, padding_len)` with `footprint % BLOCK_ALIGN == 0`.
pub(crate) fn footprint_for(size: usize) -> (usize, usize) {
    let total = HEADER_LEN + size + CANARY_LEN;
    let padding = (BLOCK_ALIGN - total % BLOCK_ALIGN) % BLOCK_ALIGN;
    (total + padding, padding)
}

/// Snapshot of one block, as yielded by [`crate::Allocator::blocks`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockInfo {
    pub offset: usize,
    pub footprint: usize,
    /// Requested size (0 for dirty blocks' callers, kept for diagnostics)
    pub data_len: usize,
    pub dirty: bool,
    /// Owning handle, `None` for dirty blocks
    pub handle: Option<Handle>,
    pub mem_type: MemType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_footprint_is_aligned() {
        for size in 0..64 {
            let (footprint, padding) = footprint_for(size);
            assert_eq!(footprint % BLOCK_ALIGN, 0);
            assert!(padding < BLOCK_ALIGN);
            assert_eq!(footprint, HEADER_LEN + size + padding + CANARY_LEN);
        }
    }

    #[test]
    fn test_known_footprints() {
        assert_eq!(footprint_for(100), (112, 3));
        assert_eq!(footprint_for(200), (212, 3));
        assert_eq!(footprint_for(50), (60, 1));
        assert_eq!(footprint_for(0), (12, 3));
    }

    #[test]
    fn test_header_round_trip_keeps_dirty_bit() {
        let mut arena = [0u8; 16];
        let header = BlockHeader {
            size: 103,
            dirty: true,
            handle: 3,
            mem_type: 2,
            padding_len: 53,
        };
        header.write(&mut arena, 4);
        assert_eq!(BlockHeader::read(&arena, 4), header);
        assert_eq!(header.data_len(), 50);
        assert_eq!(header.footprint(), 112);
    }
}
