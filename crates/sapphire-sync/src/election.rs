// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Leader election seam
//!
//! The sync engine never elects anyone itself. It asks whether this node leads a group
//! and, if not, where the leader is.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

/// Source of leadership decisions for sync groups
pub trait LeaderElection: Send {
    fn is_leader(&self, group_hash: u32) -> bool;

    /// Address of the current leader, `None` if no leader is available
    fn leader_addr(&self, group_hash: u32) -> Option<SocketAddr>;
}

#[derive(Debug, Clone, Copy, Default)]
struct ElectionView {
    is_leader: bool,
    leader: Option<SocketAddr>,
}

/// Fixed roles from configuration, adjustable at runtime through [`ElectionHandle`]
#[derive(Debug, Clone)]
pub struct StaticElection {
    view: Arc<RwLock<ElectionView>>,
}

impl StaticElection {
    pub fn leader() -> Self {
        Self::from_view(ElectionView {
            is_leader: true,
            leader: None,
        })
    }

    pub fn follower(leader: SocketAddr) -> Self {
        Self::from_view(ElectionView {
            is_leader: false,
            leader: Some(leader),
        })
    }

    /// Neither leading nor aware of a leader
    pub fn orphan() -> Self {
        Self::from_view(ElectionView::default())
    }

    fn from_view(view: ElectionView) -> Self {
        Self {
            view: Arc::new(RwLock::new(view)),
        }
    }

    pub fn handle(&self) -> ElectionHandle {
        ElectionHandle {
            view: Arc::clone(&self.view),
        }
    }
}

impl LeaderElection for StaticElection {
    fn is_leader(&self, _group_hash: u32) -> bool {
        self.view.read().is_leader
    }

    fn leader_addr(&self, _group_hash: u32) -> Option<SocketAddr> {
        let view = self.view.read();
        if view.is_leader {
            None
        } else {
            view.leader
        }
    }
}

/// Shared control over a [`StaticElection`]
#[derive(Debug, Clone)]
pub struct ElectionHandle {
    view: Arc<RwLock<ElectionView>>,
}

impl ElectionHandle {
    pub fn promote(&self) {
        info!("[VM-SYNC] Election: this node now leads");
        *self.view.write() = ElectionView {
            is_leader: true,
            leader: None,
        };
    }

    pub fn follow(&self, leader: Option<SocketAddr>) {
        match leader {
            Some(addr) => info!("[VM-SYNC] Election: following {}", addr),
            None => info!("[VM-SYNC] Election: no leader available"),
        }
        *self.view.write() = ElectionView {
            is_leader: false,
            leader,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_changes_view() {
        let leader: SocketAddr = "10.0.0.1:32042".parse().unwrap();
        let election = StaticElection::follower(leader);
        assert!(!election.is_leader(7));
        assert_eq!(election.leader_addr(7), Some(leader));

        let handle = election.handle();
        handle.follow(None);
        assert_eq!(election.leader_addr(7), None);

        handle.promote();
        assert!(election.is_leader(7));
        assert_eq!(election.leader_addr(7), None);
    }
}
