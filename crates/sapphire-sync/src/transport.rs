// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Datagram transports
//!
//! The protocol only needs best-effort, unordered datagrams: unicast to one peer,
//! broadcast to the subnet, and a non-blocking receive. [`LoopbackNetwork`] provides an
//! in-memory hub for tests and host simulations; `UdpTransport` (feature `udp`) binds a
//! real socket.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::SyncResult;

/// Best-effort datagram transport
pub trait DatagramTransport: Send {
    /// Address peers use to reach this node
    fn local_addr(&self) -> SocketAddr;

    fn send_to(&mut self, addr: SocketAddr, data: &[u8]) -> SyncResult<()>;

    /// Send to every node on the segment
    fn broadcast(&mut self, data: &[u8]) -> SyncResult<()>;

    /// Next pending datagram, never blocks
    fn try_recv(&mut self) -> SyncResult<Option<(SocketAddr, Vec<u8>)>>;
}

#[derive(Default)]
struct Hub {
    inboxes: HashMap<SocketAddr, VecDeque<(SocketAddr, Vec<u8>)>>,
    /// Nodes whose traffic is dropped in both directions
    partitioned: Vec<SocketAddr>,
    delivered: u64,
    dropped: u64,
}

/// Shared in-memory datagram network
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node at `addr`
    pub fn endpoint(&self, addr: SocketAddr) -> LoopbackTransport {
        self.hub.lock().inboxes.entry(addr).or_default();
        LoopbackTransport {
            addr,
            hub: Arc::clone(&self.hub),
        }
    }

    /// Drop all traffic to and from `addr` until healed
    pub fn partition(&self, addr: SocketAddr) {
        let mut hub = self.hub.lock();
        if !hub.partitioned.contains(&addr) {
            hub.partitioned.push(addr);
        }
        if let Some(inbox) = hub.inboxes.get_mut(&addr) {
            inbox.clear();
        }
    }

    pub fn heal(&self, addr: SocketAddr) {
        self.hub.lock().partitioned.retain(|a| *a != addr);
    }

    /// Datagrams delivered and dropped so far
    pub fn counters(&self) -> (u64, u64) {
        let hub = self.hub.lock();
        (hub.delivered, hub.dropped)
    }
}

/// One node's view of a [`LoopbackNetwork`]
pub struct LoopbackTransport {
    addr: SocketAddr,
    hub: Arc<Mutex<Hub>>,
}

impl LoopbackTransport {
    fn deliver(hub: &mut Hub, from: SocketAddr, to: SocketAddr, data: &[u8]) {
        if hub.partitioned.contains(&from) || hub.partitioned.contains(&to) {
            hub.dropped += 1;
            return;
        }
        match hub.inboxes.get_mut(&to) {
            Some(inbox) => {
                inbox.push_back((from, data.to_vec()));
                hub.delivered += 1;
            }
            None => hub.dropped += 1,
        }
    }
}

impl DatagramTransport for LoopbackTransport {
    fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    fn send_to(&mut self, addr: SocketAddr, data: &[u8]) -> SyncResult<()> {
        let mut hub = self.hub.lock();
        Self::deliver(&mut hub, self.addr, addr, data);
        Ok(())
    }

    fn broadcast(&mut self, data: &[u8]) -> SyncResult<()> {
        let mut hub = self.hub.lock();
        let peers: Vec<SocketAddr> = hub
            .inboxes
            .keys()
            .filter(|a| **a != self.addr)
            .copied()
            .collect();
        for peer in peers {
            Self::deliver(&mut hub, self.addr, peer, data);
        }
        Ok(())
    }

    fn try_recv(&mut self) -> SyncResult<Option<(SocketAddr, Vec<u8>)>> {
        Ok(self
            .hub
            .lock()
            .inboxes
            .get_mut(&self.addr)
            .and_then(VecDeque::pop_front))
    }
}

#[cfg(feature = "udp")]
pub use udp::UdpTransport;

#[cfg(feature = "udp")]
mod udp {
    use std::io::ErrorKind;
    use std::net::{SocketAddr, UdpSocket};

    use tracing::{debug, info};

    use super::DatagramTransport;
    use crate::error::{SyncError, SyncResult};
    use crate::message::SYNC_MAX_MESSAGE_LEN;

    /// Non-blocking UDP socket with broadcast enabled
    pub struct UdpTransport {
        socket: UdpSocket,
        local: SocketAddr,
        broadcast_addr: SocketAddr,
        buf: Vec<u8>,
    }

    impl UdpTransport {
        pub fn bind(bind_addr: SocketAddr, broadcast_addr: SocketAddr) -> SyncResult<Self> {
            let socket = UdpSocket::bind(bind_addr)?;
            socket.set_nonblocking(true)?;
            socket.set_broadcast(true)?;
            let local = socket.local_addr()?;
            info!(
                "[VM-SYNC] UDP transport bound to {} (broadcast {})",
                local, broadcast_addr
            );
            Ok(Self {
                socket,
                local,
                broadcast_addr,
                buf: vec![0u8; SYNC_MAX_MESSAGE_LEN + 1],
            })
        }
    }

    impl DatagramTransport for UdpTransport {
        fn local_addr(&self) -> SocketAddr {
            self.local
        }

        fn send_to(&mut self, addr: SocketAddr, data: &[u8]) -> SyncResult<()> {
            self.socket
                .send_to(data, addr)
                .map(|_| ())
                .map_err(|source| SyncError::Send { addr, source })
        }

        fn broadcast(&mut self, data: &[u8]) -> SyncResult<()> {
            let addr = self.broadcast_addr;
            self.send_to(addr, data)
        }

        fn try_recv(&mut self) -> SyncResult<Option<(SocketAddr, Vec<u8>)>> {
            loop {
                match self.socket.recv_from(&mut self.buf) {
                    // Own broadcasts loop back on most stacks
                    Ok((_, from)) if from == self.local => continue,
                    Ok((len, from)) => return Ok(Some((from, self.buf[..len].to_vec()))),
                    Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(None),
                    Err(err) => {
                        debug!("[VM-SYNC] UDP receive error: {}", err);
                        return Err(err.into());
                    }
                }
            }
        }
    }
}
