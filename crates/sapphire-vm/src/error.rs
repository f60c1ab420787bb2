// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for VM execution and the command layer

use sapphire_memory::MemoryError;
use serde::{Deserialize, Serialize};

/// Runtime fault of a VM program.
///
/// A fault tears down the faulting instance only. The instance publishes
/// [`VmError::code`] as its (negative) status until it is reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum VmError {
    #[error("cycle limit exceeded")]
    CycleLimit,

    #[error("bad opcode {opcode:#04x} at pc {pc}")]
    BadOpcode { opcode: u8, pc: u16 },

    #[error("operand stack overflow")]
    StackOverflow,

    #[error("operand stack underflow")]
    StackUnderflow,

    #[error("call stack overflow")]
    CallOverflow,

    #[error("data address {addr} out of range")]
    DataOutOfRange { addr: u16 },

    #[error("pc {pc} outside code segment")]
    JumpOutOfCode { pc: u32 },

    #[error("yield outside a thread's top frame")]
    InvalidYield,

    #[error("program image memory fault")]
    MemoryFault,

    #[error("sync data does not fit the data segment")]
    SyncOverflow,
}

impl VmError {
    /// Negative status code published to the management layer
    pub fn code(&self) -> i8 {
        match self {
            VmError::CycleLimit => -1,
            VmError::BadOpcode { .. } => -2,
            VmError::StackOverflow => -3,
            VmError::StackUnderflow => -4,
            VmError::CallOverflow => -5,
            VmError::DataOutOfRange { .. } => -6,
            VmError::JumpOutOfCode { .. } => -7,
            VmError::InvalidYield => -8,
            VmError::MemoryFault => -9,
            VmError::SyncOverflow => -10,
        }
    }
}

/// Result type for VM execution
pub type VmResult<T> = Result<T, VmError>;

/// Errors returned to the command layer (`load`, `start`, sync accessors)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunnerError {
    #[error("invalid VM index {0}")]
    InvalidSlot(usize),

    #[error("image of {requested} bytes exceeds budget ({available} of {budget} available)")]
    BudgetExceeded {
        requested: usize,
        available: usize,
        budget: usize,
    },

    #[error("chunk [{offset}..{end}) exceeds image size {total}")]
    ChunkOutOfBounds {
        offset: usize,
        end: usize,
        total: usize,
    },

    #[error("chunk at {offset} does not continue the image at {expected}")]
    ChunkOutOfOrder { expected: usize, offset: usize },

    #[error("no load in progress for VM {0}")]
    NotLoading(usize),

    #[error("image incomplete: {received} of {total} bytes")]
    Incomplete { received: usize, total: usize },

    #[error("invalid program image: {0}")]
    InvalidImage(String),

    #[error("segment misaligned: {segment} starts at {offset}")]
    Misaligned {
        segment: &'static str,
        offset: usize,
    },

    #[error("program mismatch: expected {expected_name:#010x}/{expected_file:#018x}, got {name:#010x}/{file:#018x}")]
    ProgramMismatch {
        expected_name: u32,
        expected_file: u64,
        name: u32,
        file: u64,
    },

    #[error("invalid runner settings: {0}")]
    InvalidSettings(String),

    #[error("VM {vm} is {status}, expected {expected}")]
    WrongStatus {
        vm: usize,
        status: &'static str,
        expected: &'static str,
    },

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Fault(#[from] VmError),
}

/// Result type for command layer operations
pub type RunnerResult<T> = Result<T, RunnerError>;
