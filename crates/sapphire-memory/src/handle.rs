// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Opaque handles and block type tags

use serde::{Deserialize, Serialize};

/// Offset added to a handle table index before it leaves the allocator.
///
/// Zero and small integers are therefore never valid handles.
pub const HANDLE_SWIZZLE: i16 = 0x1000;

/// Largest handle table the swizzled `i16` encoding can address.
pub const MAX_HANDLES_LIMIT: usize = (i16::MAX - HANDLE_SWIZZLE) as usize;

/// Opaque reference to a heap block.
///
/// A handle survives relocation by the collector. It becomes invalid when the block is
/// freed, and may be issued again by a later `alloc()` that reuses the same table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle(i16);

impl Handle {
    pub(crate) fn from_index(index: usize) -> Self {
        debug_assert!(index < MAX_HANDLES_LIMIT);
        Handle(index as i16 + HANDLE_SWIZZLE)
    }

    /// Rebuild a handle from its raw value (e.g. read back from a message).
    ///
    /// The value is validated on every use, not here.
    pub const fn from_raw(raw: i16) -> Self {
        Handle(raw)
    }

    /// Raw swizzled value
    pub const fn raw(self) -> i16 {
        self.0
    }

    /// Table index, or `None` for values below the swizzle offset
    pub(crate) fn index(self) -> Option<usize> {
        let index = self.0.checked_sub(HANDLE_SWIZZLE)?;
        if index < 0 {
            None
        } else {
            Some(index as usize)
        }
    }
}

impl core::fmt::Display for Handle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Block type tag stored in every header, kept for diagnostics and `realloc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemType(pub u8);

impl MemType {
    pub const UNKNOWN: MemType = MemType(0);
    pub const VM_IMAGE: MemType = MemType(1);
    pub const VM_STATE: MemType = MemType(2);
    pub const SYNC_BUFFER: MemType = MemType(3);
    pub const MESSAGE: MemType = MemType(4);
    pub const SCRATCH: MemType = MemType(5);

    pub fn name(self) -> &'static str {
        match self {
            MemType::UNKNOWN => "unknown",
            MemType::VM_IMAGE => "vm_image",
            MemType::VM_STATE => "vm_state",
            MemType::SYNC_BUFFER => "sync_buffer",
            MemType::MESSAGE => "message",
            MemType::SCRATCH => "scratch",
            _ => "user",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_is_never_a_handle() {
        assert_eq!(Handle::from_raw(0).index(), None);
        assert_eq!(Handle::from_raw(-1).index(), None);
        assert_eq!(Handle::from_raw(HANDLE_SWIZZLE - 1).index(), None);
    }

    #[test]
    fn test_swizzle_round_trip() {
        let handle = Handle::from_index(5);
        assert_eq!(handle.raw(), HANDLE_SWIZZLE + 5);
        assert_eq!(handle.index(), Some(5));
    }
}
