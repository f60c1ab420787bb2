// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for heap operations

/// Heap errors
///
/// Exhaustion variants (`OutOfSpace`, `NoHandles`) are recoverable. Every other variant
/// means the arena or handle table no longer matches what the allocator wrote, see
/// [`MemoryError::is_corruption`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    #[error("out of heap space: block needs {requested} bytes, {available} free")]
    OutOfSpace { requested: usize, available: usize },

    #[error("no free memory handles ({max} in use)")]
    NoHandles { max: usize },

    #[error("invalid handle {0}")]
    InvalidHandle(i16),

    #[error("handle {handle} refers to a dirty block at offset {offset}")]
    DirtyHandle { handle: i16, offset: usize },

    #[error("canary corrupted for handle {handle} at offset {offset}: found {found:#04x}")]
    CanaryCorrupted {
        handle: i16,
        offset: usize,
        found: u8,
    },

    #[error("block for handle {handle} is misaligned or truncated at offset {offset}")]
    Misaligned { handle: i16, offset: usize },

    #[error("block at offset {offset} is owned by handle index {found}, table says {handle}")]
    HeaderMismatch {
        handle: i16,
        offset: usize,
        found: i16,
    },

    #[error("access [{offset}..{end}) outside block of {size} bytes (handle {handle})")]
    OutOfBounds {
        handle: i16,
        offset: usize,
        end: usize,
        size: usize,
    },

    #[error("invalid allocator settings: {0}")]
    InvalidSettings(String),
}

impl MemoryError {
    /// True when the error indicates heap corruption rather than exhaustion or misuse.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            MemoryError::InvalidHandle(_)
                | MemoryError::DirtyHandle { .. }
                | MemoryError::CanaryCorrupted { .. }
                | MemoryError::Misaligned { .. }
                | MemoryError::HeaderMismatch { .. }
        )
    }
}

/// Result type for heap operations
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Halt on heap corruption.
///
/// Continuing with a corrupted heap risks undefined device behavior. Release builds use
/// `panic = "abort"`, and the watchdog reboots the controller.
#[cold]
#[track_caller]
pub(crate) fn halt(err: MemoryError) -> ! {
    tracing::error!("[MEM] FATAL heap corruption: {}", err);
    panic!("heap corruption: {err}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhaustion_is_not_corruption() {
        assert!(!MemoryError::OutOfSpace {
            requested: 16,
            available: 4
        }
        .is_corruption());
        assert!(!MemoryError::NoHandles { max: 8 }.is_corruption());
        assert!(MemoryError::InvalidHandle(7).is_corruption());
    }
}
