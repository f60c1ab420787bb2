// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the frame sync protocol

use std::net::SocketAddr;

use sapphire_memory::MemoryError;
use sapphire_vm::RunnerError;

/// Frame sync errors.
///
/// None of these are fatal to the VM. Protocol faults reset the follower to idle and the
/// handshake restarts on the next request interval.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("message truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("bad magic {0:#010x}")]
    BadMagic(u32),

    #[error("unsupported protocol version {0}")]
    BadVersion(u8),

    #[error("unknown message type {0}")]
    UnknownType(u8),

    #[error("{field} count {count} exceeds limit {max}")]
    TooMany {
        field: &'static str,
        count: usize,
        max: usize,
    },

    #[error("message of {size} bytes exceeds {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("program mismatch with leader")]
    ProgramMismatch,

    #[error("data length mismatch: local {local}, leader {leader}")]
    DataLengthMismatch { local: u32, leader: u32 },

    #[error("round trip {rtt_ms} ms exceeds {max_ms} ms")]
    ExcessiveRtt { rtt_ms: u64, max_ms: u64 },

    #[error("tick drift {drift_ms} ms exceeds {max_ms} ms")]
    Drift { drift_ms: u64, max_ms: u64 },

    #[error("no checkpoint overlap with leader")]
    NoCheckpointOverlap,

    #[error("chunk [{offset}..{end}) outside data segment of {len} bytes")]
    ChunkOverflow { offset: u32, end: u32, len: u32 },

    #[error("reassembled data hash mismatch")]
    DataHashMismatch,

    #[error("sync request timed out")]
    RequestTimeout,

    #[error("leader lost")]
    LeaderLost,

    #[error("invalid sync settings: {0}")]
    InvalidSettings(String),

    #[error("send to {addr} failed: {source}")]
    Send {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// Result type for frame sync operations
pub type SyncResult<T> = Result<T, SyncError>;
