// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

#[derive(Debug, thiserror::Error)]
pub enum HalError {
    #[error("invalid MAC address '{0}'")]
    InvalidMac(String),
}

pub type HalResult<T> = Result<T, HalError>;
