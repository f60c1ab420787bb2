// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-instance status and run modes

use serde::{Deserialize, Serialize};

use crate::error::VmError;

pub const VM_STATUS_OK: i8 = 0;
pub const VM_STATUS_READY: i8 = 1;
pub const VM_STATUS_NOT_RUNNING: i8 = 2;
pub const VM_STATUS_HALT: i8 = 3;
pub const VM_STATUS_WAIT_SYNC: i8 = 4;

/// Lifecycle of one VM slot.
///
/// `NotRunning -> Ready` on a completed load, `Ready -> Ok` on start, then `Halt` or
/// `Error` (terminal until reset). `WaitSync` is a sub-state of `Ok` held while a frame
/// sync handshake owns the data segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VmStatus {
    #[default]
    NotRunning,
    Ready,
    Ok,
    WaitSync,
    Halt,
    Error(VmError),
}

impl VmStatus {
    /// Numeric status as published to the management layer
    pub fn code(&self) -> i8 {
        match self {
            VmStatus::Ok => VM_STATUS_OK,
            VmStatus::Ready => VM_STATUS_READY,
            VmStatus::NotRunning => VM_STATUS_NOT_RUNNING,
            VmStatus::Halt => VM_STATUS_HALT,
            VmStatus::WaitSync => VM_STATUS_WAIT_SYNC,
            VmStatus::Error(err) => err.code(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            VmStatus::NotRunning => "not_running",
            VmStatus::Ready => "ready",
            VmStatus::Ok => "ok",
            VmStatus::WaitSync => "wait_sync",
            VmStatus::Halt => "halt",
            VmStatus::Error(_) => "error",
        }
    }

    /// True for `Ok` and `WaitSync`
    pub fn is_running(&self) -> bool {
        matches!(self, VmStatus::Ok | VmStatus::WaitSync)
    }

    /// True for `Halt` and `Error`
    pub fn is_terminal(&self) -> bool {
        matches!(self, VmStatus::Halt | VmStatus::Error(_))
    }
}

impl core::fmt::Display for VmStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            VmStatus::Error(err) => write!(f, "error({}): {}", err.code(), err),
            other => f.write_str(other.name()),
        }
    }
}

/// Entry point selector for [`crate::VmRunner::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    /// Program init entry, once after start
    Init,
    /// One main loop frame
    Loop,
    /// Resume a cooperative thread from its saved pc
    Thread(usize),
    /// Arbitrary function address (event callbacks)
    Func(u16),
}
