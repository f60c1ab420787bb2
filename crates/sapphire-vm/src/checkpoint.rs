// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Checkpoint Ring - recent data segment hashes for divergence detection
//!
//! Architecture:
//! - Circular buffer of content hashes, newest last (configurable window size)
//! - One entry every `checkpoint_interval` loop frames
//! - Two nodes are considered in sync while their windows share at least one hash
//!
//! A wider window tolerates more jitter between leader and follower frames, at the cost
//! of more bytes per sync broadcast and a slower reaction to real divergence.

use std::collections::VecDeque;

/// Sliding window of checkpoint hashes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRing {
    hashes: VecDeque<u64>,
    window_size: usize,
}

impl CheckpointRing {
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            hashes: VecDeque::with_capacity(window_size),
            window_size,
        }
    }

    /// Record a checkpoint, evicting the oldest once the window is full
    pub fn push(&mut self, hash: u64) {
        if self.hashes.len() == self.window_size {
            self.hashes.pop_front();
        }
        self.hashes.push_back(hash);
    }

    /// Replace the window with `hashes` (oldest first), keeping the newest that fit
    pub fn seed(&mut self, hashes: &[u64]) {
        self.hashes.clear();
        let skip = hashes.len().saturating_sub(self.window_size);
        self.hashes.extend(hashes.iter().skip(skip).copied());
    }

    /// True if any local checkpoint appears in `other`
    pub fn overlaps(&self, other: &[u64]) -> bool {
        self.hashes.iter().any(|h| other.contains(h))
    }

    /// Up to `n` most recent hashes, oldest first
    pub fn latest(&self, n: usize) -> Vec<u64> {
        let skip = self.hashes.len().saturating_sub(n);
        self.hashes.iter().skip(skip).copied().collect()
    }

    pub fn newest(&self) -> Option<u64> {
        self.hashes.back().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &u64> {
        self.hashes.iter()
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn clear(&mut self) {
        self.hashes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_evicts_oldest() {
        let mut ring = CheckpointRing::new(3);
        for h in 1..=5 {
            ring.push(h);
        }
        assert_eq!(ring.latest(10), vec![3, 4, 5]);
        assert_eq!(ring.latest(2), vec![4, 5]);
        assert_eq!(ring.newest(), Some(5));
    }

    #[test]
    fn test_overlap() {
        let mut ring = CheckpointRing::new(4);
        ring.push(10);
        ring.push(11);
        assert!(ring.overlaps(&[11, 12, 13]));
        assert!(!ring.overlaps(&[12, 13]));
        assert!(!ring.overlaps(&[]));
    }

    #[test]
    fn test_seed_keeps_newest() {
        let mut ring = CheckpointRing::new(2);
        ring.push(99);
        ring.seed(&[1, 2, 3]);
        assert_eq!(ring.latest(5), vec![2, 3]);
    }
}
