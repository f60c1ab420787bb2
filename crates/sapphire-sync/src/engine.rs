// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Frame sync engine - leader/follower state machine for VM instance 0
//!
//! Architecture:
//! - Single cooperative `poll()` per pass: drain datagrams, then run role timers
//! - Leader broadcasts SYNC on an interval and answers SYNC_REQ with a reply, data
//!   chunks and a terminal hash
//! - Follower: IDLE --request--> SYNCING --full sync--> SYNC --fault--> IDLE
//! - While SYNCING the data segment is reassembled into a `SYNC_BUFFER` heap block; the
//!   instance is held in `WaitSync` from the accepted reply until the sync is applied
//! - In SYNC, each leader broadcast is checked for program identity, tick drift and
//!   checkpoint overlap; any failure is a sync loss and restarts the handshake

use std::net::SocketAddr;

use sapphire_memory::{Allocator, Handle, MemType};
use sapphire_vm::{hash32, hash64, VmRunner, VmStatus};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::election::LeaderElection;
use crate::error::{SyncError, SyncResult};
use crate::message::{
    flags, SyncFrame, SyncHeader, SyncMessage, SyncPayload, SYNC_MAX_CHECKPOINTS,
    VM_SYNC_MAX_DATA_LEN,
};
use crate::transport::DatagramTransport;

/// Instance slot kept in lockstep across the group
pub const SYNC_VM: usize = 0;

/// Frame sync settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Sync group name, hashed into every header
    pub group: String,
    /// Leader broadcast interval
    pub sync_interval_ms: u64,
    /// Leader broadcast interval while a sequencer is stepping programs
    pub sequencer_interval_ms: u64,
    /// Follower gives up on an unanswered request after this long
    pub request_timeout_ms: u64,
    /// Replies slower than this are discarded
    pub max_rtt_ms: u64,
    /// Largest tolerated tick difference against a leader broadcast
    pub max_drift_ms: u64,
    /// Synced follower drops to idle without leader traffic for this long
    pub leader_timeout_ms: u64,
    /// Data segment bytes per SYNC_DATA message
    pub chunk_size: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            group: "default".to_string(),
            sync_interval_ms: 1000,
            sequencer_interval_ms: 250,
            request_timeout_ms: 2000,
            max_rtt_ms: 500,
            max_drift_ms: 200,
            leader_timeout_ms: 5000,
            chunk_size: VM_SYNC_MAX_DATA_LEN,
        }
    }
}

impl SyncSettings {
    pub fn validate(&self) -> SyncResult<()> {
        if self.group.is_empty() {
            return Err(SyncError::InvalidSettings("group must not be empty".into()));
        }
        if self.sync_interval_ms == 0 || self.sequencer_interval_ms == 0 {
            return Err(SyncError::InvalidSettings(
                "broadcast intervals must be > 0".into(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(SyncError::InvalidSettings(
                "request_timeout_ms must be > 0".into(),
            ));
        }
        if self.leader_timeout_ms <= self.sync_interval_ms {
            return Err(SyncError::InvalidSettings(format!(
                "leader_timeout_ms ({}) must exceed sync_interval_ms ({})",
                self.leader_timeout_ms, self.sync_interval_ms
            )));
        }
        if self.chunk_size == 0 || self.chunk_size > VM_SYNC_MAX_DATA_LEN {
            return Err(SyncError::InvalidSettings(format!(
                "chunk_size must be in 1..={}",
                VM_SYNC_MAX_DATA_LEN
            )));
        }
        Ok(())
    }
}

/// Follower state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum SyncState {
    #[default]
    Idle = 0,
    Syncing = 1,
    Sync = 2,
}

impl SyncState {
    pub fn name(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Syncing => "syncing",
            SyncState::Sync => "sync",
        }
    }
}

/// Protocol counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Completed full syncs
    pub full_syncs: u64,
    /// Leader broadcasts that passed the steady state check
    pub hits: u64,
    pub losses: u64,
    pub broadcasts: u64,
    pub requests_sent: u64,
    pub requests_answered: u64,
    pub chunks_sent: u64,
    pub chunks_received: u64,
    /// Program, data length or data hash mismatches
    pub mismatches: u64,
    pub malformed: u64,
}

/// Byte coverage of the reassembly buffer
#[derive(Debug)]
struct Coverage {
    bits: Vec<u64>,
    covered: usize,
    len: usize,
}

impl Coverage {
    fn new(len: usize) -> Self {
        Self {
            bits: vec![0; len.div_ceil(64)],
            covered: 0,
            len,
        }
    }

    fn mark(&mut self, start: usize, end: usize) {
        for i in start..end.min(self.len) {
            let (word, bit) = (i / 64, 1u64 << (i % 64));
            if self.bits[word] & bit == 0 {
                self.bits[word] |= bit;
                self.covered += 1;
            }
        }
    }

    fn is_complete(&self) -> bool {
        self.covered == self.len
    }
}

/// In-flight follower handshake
#[derive(Debug)]
struct Session {
    leader: SocketAddr,
    request_time: u64,
    deadline: u64,
    data_len: u32,
    buffer: Option<Handle>,
    coverage: Coverage,
    reply: Option<(SyncHeader, SyncFrame)>,
    data_hash: Option<u64>,
}

impl Session {
    fn is_complete(&self) -> bool {
        self.reply.is_some() && self.data_hash.is_some() && self.coverage.is_complete()
    }
}

/// Frame sync engine for one sync group
pub struct VmSync {
    settings: SyncSettings,
    group_hash: u32,
    transport: Box<dyn DatagramTransport>,
    election: Box<dyn LeaderElection>,
    is_leader: bool,
    state: SyncState,
    session: Option<Session>,
    last_leader_seen: Option<u64>,
    next_broadcast_ms: u64,
    next_request_ms: u64,
    sequencer_step: Option<u16>,
    leader_sequencer_step: Option<u16>,
    stats: SyncStats,
    stopped: bool,
}

impl VmSync {
    pub fn new(
        settings: SyncSettings,
        transport: Box<dyn DatagramTransport>,
        election: Box<dyn LeaderElection>,
    ) -> SyncResult<Self> {
        settings.validate()?;
        let group_hash = hash32(&settings.group);
        let is_leader = election.is_leader(group_hash);
        info!(
            "[VM-SYNC] Group '{}' ({:#010x}) on {} as {}",
            settings.group,
            group_hash,
            transport.local_addr(),
            if is_leader { "leader" } else { "follower" }
        );
        Ok(Self {
            settings,
            group_hash,
            transport,
            election,
            is_leader,
            state: SyncState::Idle,
            session: None,
            last_leader_seen: None,
            next_broadcast_ms: 0,
            next_request_ms: 0,
            sequencer_step: None,
            leader_sequencer_step: None,
            stats: SyncStats::default(),
            stopped: false,
        })
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn group_hash(&self) -> u32 {
        self.group_hash
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Mark a sequencer as stepping (shorter broadcast interval), or idle with `None`
    pub fn set_sequencer_step(&mut self, step: Option<u16>) {
        self.sequencer_step = step;
    }

    /// Sequencer step last announced by the leader
    pub fn leader_sequencer_step(&self) -> Option<u16> {
        self.leader_sequencer_step
    }

    /// Run one pass at host time `now_ms`; returns the next time sync wants service
    pub fn poll(&mut self, now_ms: u64, runner: &mut VmRunner, mem: &mut Allocator) -> Option<u64> {
        if self.stopped {
            return None;
        }

        let leader = self.election.is_leader(self.group_hash);
        if leader != self.is_leader {
            self.is_leader = leader;
            if leader {
                self.abort(runner, mem, "promoted to leader");
                self.next_broadcast_ms = now_ms;
            } else {
                self.next_request_ms = now_ms;
                self.last_leader_seen = None;
            }
            info!(
                "[VM-SYNC] Role changed to {}",
                if leader { "leader" } else { "follower" }
            );
        }

        self.drain(now_ms, runner, mem);

        if self.is_leader {
            Some(self.leader_timers(now_ms, runner))
        } else {
            Some(self.follower_timers(now_ms, runner, mem))
        }
    }

    /// Abort immediately, discarding any in-flight handshake
    pub fn shutdown(&mut self, runner: &mut VmRunner, mem: &mut Allocator) {
        if self.stopped {
            return;
        }
        self.discard_session(runner, mem);
        self.state = SyncState::Idle;
        self.stopped = true;
        info!(
            "[VM-SYNC] Shut down ({} full syncs, {} losses)",
            self.stats.full_syncs, self.stats.losses
        );
    }

    fn drain(&mut self, now_ms: u64, runner: &mut VmRunner, mem: &mut Allocator) {
        loop {
            let (from, bytes) = match self.transport.try_recv() {
                Ok(Some(datagram)) => datagram,
                Ok(None) => break,
                Err(err) => {
                    warn!("[VM-SYNC] Receive failed: {}", err);
                    break;
                }
            };
            let message = match SyncMessage::decode(&bytes) {
                Ok(message) => message,
                Err(err) => {
                    self.stats.malformed += 1;
                    debug!("[VM-SYNC] Dropping malformed datagram from {}: {}", from, err);
                    continue;
                }
            };
            if message.header.group_hash != self.group_hash {
                trace!(
                    "[VM-SYNC] Ignoring group {:#010x} from {}",
                    message.header.group_hash,
                    from
                );
                continue;
            }

            if self.is_leader {
                if let Err(err) = self.handle_as_leader(from, message, runner, mem) {
                    warn!("[VM-SYNC] Failed to answer {}: {}", from, err);
                }
            } else if let Err(err) = self.handle_as_follower(now_ms, from, message, runner, mem) {
                self.lose_sync(err, runner, mem);
            }
        }
    }

    fn header(&self, identity: (u32, u64), extra: u16) -> SyncHeader {
        let sequencer = if self.sequencer_step.is_some() {
            flags::SEQUENCER_ACTIVE
        } else {
            0
        };
        SyncHeader {
            flags: extra | sequencer,
            group_hash: self.group_hash,
            program_name_hash: identity.0,
            program_file_hash: identity.1,
        }
    }

    fn send(&mut self, to: Option<SocketAddr>, header: SyncHeader, payload: SyncPayload) -> SyncResult<()> {
        let bytes = SyncMessage::new(header, payload).encode()?;
        match to {
            Some(addr) => self.transport.send_to(addr, &bytes),
            None => self.transport.broadcast(&bytes),
        }
    }

    // region Leader

    fn broadcast_interval(&self) -> u64 {
        if self.sequencer_step.is_some() {
            self.settings.sequencer_interval_ms
        } else {
            self.settings.sync_interval_ms
        }
    }

    fn leader_timers(&mut self, now_ms: u64, runner: &VmRunner) -> u64 {
        if now_ms >= self.next_broadcast_ms {
            self.next_broadcast_ms = now_ms + self.broadcast_interval();
            if let Some((header, frame)) = self.leader_frame(runner, 0, 0) {
                match self.send(None, header, SyncPayload::Sync(frame)) {
                    Ok(()) => self.stats.broadcasts += 1,
                    Err(err) => warn!("[VM-SYNC] Broadcast failed: {}", err),
                }
            }
        }
        self.next_broadcast_ms
    }

    /// Current SYNC frame of the local instance, `None` if nothing is running
    fn leader_frame(
        &self,
        runner: &VmRunner,
        extra: u16,
        request_time: u64,
    ) -> Option<(SyncHeader, SyncFrame)> {
        let snapshot = runner.sync_snapshot(SYNC_VM)?;
        let checkpoints = runner
            .checkpoints(SYNC_VM)
            .map(|ring| ring.latest(SYNC_MAX_CHECKPOINTS))
            .unwrap_or_default();
        let mut frame = SyncFrame::from_snapshot(&snapshot, &checkpoints);
        frame.request_time = request_time;
        frame.sequencer_step = self.sequencer_step.unwrap_or(0);
        let header = self.header((snapshot.program_name_hash, snapshot.file_hash), extra);
        Some((header, frame))
    }

    fn handle_as_leader(
        &mut self,
        from: SocketAddr,
        message: SyncMessage,
        runner: &VmRunner,
        mem: &Allocator,
    ) -> SyncResult<()> {
        match message.payload {
            SyncPayload::Request { request_time } => {
                let Some((header, frame)) = self.leader_frame(runner, flags::REPLY, request_time)
                else {
                    debug!("[VM-SYNC] Request from {} but no program is running", from);
                    return Ok(());
                };
                let data_len = frame.data_len;
                self.send(Some(from), header, SyncPayload::Sync(frame))?;
                self.stats.requests_answered += 1;

                if message.header.has(flags::REQUEST_DATA) {
                    self.send_data(from, header, data_len, runner, mem)?;
                }
                debug!("[VM-SYNC] Answered request from {}", from);
            }
            SyncPayload::Sync(_) => {
                debug!("[VM-SYNC] Ignoring SYNC from {} while leading", from);
            }
            SyncPayload::Data { .. } | SyncPayload::DataHash { .. } => {
                trace!("[VM-SYNC] Ignoring data from {} while leading", from);
            }
        }
        Ok(())
    }

    fn send_data(
        &mut self,
        to: SocketAddr,
        header: SyncHeader,
        data_len: u32,
        runner: &VmRunner,
        mem: &Allocator,
    ) -> SyncResult<()> {
        let header = SyncHeader {
            flags: header.flags & !flags::REPLY,
            ..header
        };
        let Some(data) = runner.data_segment(mem, SYNC_VM) else {
            return Ok(());
        };
        for (index, piece) in data.chunks(self.settings.chunk_size).enumerate() {
            let chunk = heapless::Vec::from_slice(piece).map_err(|_| SyncError::TooMany {
                field: "chunk bytes",
                count: piece.len(),
                max: VM_SYNC_MAX_DATA_LEN,
            })?;
            let payload = SyncPayload::Data {
                data_len,
                offset: (index * self.settings.chunk_size) as u32,
                chunk,
            };
            self.send(Some(to), header, payload)?;
            self.stats.chunks_sent += 1;
        }
        let hash = hash64(data);
        self.send(Some(to), header, SyncPayload::DataHash { data_len, hash })
    }

    // endregion

    // region Follower

    fn follower_timers(&mut self, now_ms: u64, runner: &mut VmRunner, mem: &mut Allocator) -> u64 {
        let Some(leader) = self.election.leader_addr(self.group_hash) else {
            if self.state != SyncState::Idle {
                self.lose_sync(SyncError::LeaderLost, runner, mem);
            }
            return now_ms + self.settings.sync_interval_ms;
        };

        if self.state != SyncState::Idle && !runner.status(SYNC_VM).is_running() {
            self.abort(runner, mem, "program stopped");
        }

        match self.state {
            SyncState::Idle => {
                if runner.status(SYNC_VM) != VmStatus::Ok {
                    return now_ms + self.settings.sync_interval_ms;
                }
                if now_ms >= self.next_request_ms {
                    if let Err(err) = self.request(now_ms, leader, runner, mem) {
                        self.lose_sync(err, runner, mem);
                    }
                }
            }
            SyncState::Syncing => {
                if self.session.as_ref().is_some_and(|s| now_ms >= s.deadline) {
                    self.lose_sync(SyncError::RequestTimeout, runner, mem);
                }
            }
            SyncState::Sync => {
                let silent_since = self.last_leader_seen.unwrap_or(now_ms);
                if now_ms >= silent_since + self.settings.leader_timeout_ms {
                    self.lose_sync(SyncError::LeaderLost, runner, mem);
                }
            }
        }

        match self.state {
            SyncState::Idle => self.next_request_ms.max(now_ms),
            SyncState::Syncing => self.session.as_ref().map_or(now_ms, |s| s.deadline),
            SyncState::Sync => {
                self.last_leader_seen.unwrap_or(now_ms) + self.settings.leader_timeout_ms
            }
        }
    }

    /// Allocate the reassembly buffer and ask the leader for a full sync
    fn request(
        &mut self,
        now_ms: u64,
        leader: SocketAddr,
        runner: &VmRunner,
        mem: &mut Allocator,
    ) -> SyncResult<()> {
        self.next_request_ms = now_ms + self.settings.sync_interval_ms;
        let (identity, data_len) = match (runner.program_identity(SYNC_VM), runner.state(SYNC_VM)) {
            (Some(identity), Some(state)) => (identity, state.data_len),
            _ => return Ok(()),
        };

        let buffer = if data_len > 0 {
            Some(mem.alloc(data_len, MemType::SYNC_BUFFER)?)
        } else {
            None
        };
        self.session = Some(Session {
            leader,
            request_time: now_ms,
            deadline: now_ms + self.settings.request_timeout_ms,
            data_len: data_len as u32,
            buffer,
            coverage: Coverage::new(data_len),
            reply: None,
            data_hash: None,
        });
        self.state = SyncState::Syncing;

        let header = self.header(identity, flags::REQUEST_DATA);
        self.send(
            Some(leader),
            header,
            SyncPayload::Request {
                request_time: now_ms,
            },
        )?;
        self.stats.requests_sent += 1;
        debug!("[VM-SYNC] Requested full sync from {} ({} data bytes)", leader, data_len);
        Ok(())
    }

    fn handle_as_follower(
        &mut self,
        now_ms: u64,
        from: SocketAddr,
        message: SyncMessage,
        runner: &mut VmRunner,
        mem: &mut Allocator,
    ) -> SyncResult<()> {
        if self.election.leader_addr(self.group_hash) != Some(from) {
            trace!("[VM-SYNC] Ignoring message from non-leader {}", from);
            return Ok(());
        }
        self.last_leader_seen = Some(now_ms);
        let header = message.header;

        match message.payload {
            SyncPayload::Sync(frame) if header.has(flags::REPLY) => {
                self.on_reply(now_ms, header, frame, runner)?;
                self.complete_if_ready(now_ms, runner, mem)
            }
            SyncPayload::Sync(frame) => {
                self.leader_sequencer_step = header
                    .has(flags::SEQUENCER_ACTIVE)
                    .then_some(frame.sequencer_step);
                if self.state == SyncState::Sync {
                    self.check_steady(&header, &frame, runner)?;
                    self.stats.hits += 1;
                }
                Ok(())
            }
            SyncPayload::Data {
                data_len,
                offset,
                chunk,
            } => {
                self.on_chunk(data_len, offset, &chunk, mem)?;
                self.complete_if_ready(now_ms, runner, mem)
            }
            SyncPayload::DataHash { data_len, hash } => {
                let Some(session) = self.session.as_mut() else {
                    return Ok(());
                };
                if data_len != session.data_len {
                    return Err(SyncError::DataLengthMismatch {
                        local: session.data_len,
                        leader: data_len,
                    });
                }
                session.data_hash = Some(hash);
                self.complete_if_ready(now_ms, runner, mem)
            }
            SyncPayload::Request { .. } => Ok(()),
        }
    }

    fn check_program(&self, header: &SyncHeader, leader_len: u32, runner: &VmRunner) -> SyncResult<()> {
        let (name, file) = runner
            .program_identity(SYNC_VM)
            .ok_or(SyncError::ProgramMismatch)?;
        if header.program_name_hash != name || header.program_file_hash != file {
            return Err(SyncError::ProgramMismatch);
        }
        let local = runner.state(SYNC_VM).map_or(0, |s| s.data_len as u32);
        if local != leader_len {
            return Err(SyncError::DataLengthMismatch {
                local,
                leader: leader_len,
            });
        }
        Ok(())
    }

    /// Accept the reply to the outstanding request and hold the instance until data completes
    fn on_reply(
        &mut self,
        now_ms: u64,
        header: SyncHeader,
        frame: SyncFrame,
        runner: &mut VmRunner,
    ) -> SyncResult<()> {
        let expected = self
            .session
            .as_ref()
            .filter(|s| s.reply.is_none())
            .map(|s| s.request_time);
        if expected != Some(frame.request_time) {
            trace!("[VM-SYNC] Ignoring stale reply for request at {}", frame.request_time);
            return Ok(());
        }
        self.check_program(&header, frame.data_len, runner)?;

        let rtt_ms = now_ms.saturating_sub(frame.request_time);
        if rtt_ms > self.settings.max_rtt_ms {
            return Err(SyncError::ExcessiveRtt {
                rtt_ms,
                max_ms: self.settings.max_rtt_ms,
            });
        }
        if !runner.begin_wait_sync(SYNC_VM) {
            debug!("[VM-SYNC] Program not running, dropping reply");
            return Ok(());
        }
        if let Some(session) = self.session.as_mut() {
            session.reply = Some((header, frame));
        }
        Ok(())
    }

    fn on_chunk(&mut self, data_len: u32, offset: u32, chunk: &[u8], mem: &mut Allocator) -> SyncResult<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        if data_len != session.data_len {
            return Err(SyncError::DataLengthMismatch {
                local: session.data_len,
                leader: data_len,
            });
        }
        let end = offset as usize + chunk.len();
        let Some(buffer) = session.buffer.filter(|_| end <= data_len as usize) else {
            return Err(SyncError::ChunkOverflow {
                offset,
                end: end as u32,
                len: data_len,
            });
        };
        let dest = mem
            .try_get_mut(buffer)?
            .get_mut(offset as usize..end)
            .ok_or(SyncError::ChunkOverflow {
                offset,
                end: end as u32,
                len: data_len,
            })?;
        dest.copy_from_slice(chunk);
        session.coverage.mark(offset as usize, end);
        self.stats.chunks_received += 1;
        Ok(())
    }

    fn complete_if_ready(&mut self, now_ms: u64, runner: &mut VmRunner, mem: &mut Allocator) -> SyncResult<()> {
        if !self.session.as_ref().is_some_and(Session::is_complete) {
            return Ok(());
        }
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        let result = self.apply(now_ms, &session, runner, mem);
        if let Some(buffer) = session.buffer {
            if let Err(err) = mem.try_free(buffer) {
                error!("[VM-SYNC] Failed to free sync buffer {}: {}", buffer, err);
            }
        }
        result
    }

    fn apply(&mut self, now_ms: u64, session: &Session, runner: &mut VmRunner, mem: &mut Allocator) -> SyncResult<()> {
        let Some((header, frame)) = session.reply.as_ref() else {
            return Ok(());
        };

        let data_len = session.data_len as usize;
        let received = match session.buffer {
            Some(buffer) => {
                let data = mem.try_get(buffer)?;
                hash64(data.get(..data_len).unwrap_or(data))
            }
            None => hash64(&[]),
        };
        if Some(received) != session.data_hash {
            return Err(SyncError::DataHashMismatch);
        }

        let rtt_ms = now_ms.saturating_sub(session.request_time);
        let mut snapshot = frame.to_snapshot(header);
        snapshot.tick += rtt_ms / 2;
        runner.apply_sync(mem, SYNC_VM, &snapshot, session.buffer)?;
        runner.seed_checkpoints(SYNC_VM, &frame.checkpoints);
        runner.end_wait_sync(SYNC_VM);

        self.state = SyncState::Sync;
        self.stats.full_syncs += 1;
        info!(
            "[VM-SYNC] Synced to {} at tick {} frame {} (rtt {} ms)",
            session.leader, snapshot.tick, snapshot.frame_number, rtt_ms
        );
        Ok(())
    }

    fn check_steady(&self, header: &SyncHeader, frame: &SyncFrame, runner: &VmRunner) -> SyncResult<()> {
        self.check_program(header, frame.data_len, runner)?;

        let local_tick = runner.state(SYNC_VM).map_or(0, |s| s.tick);
        let drift_ms = local_tick.abs_diff(frame.tick);
        if drift_ms > self.settings.max_drift_ms {
            return Err(SyncError::Drift {
                drift_ms,
                max_ms: self.settings.max_drift_ms,
            });
        }

        if let Some(ring) = runner.checkpoints(SYNC_VM) {
            if !frame.checkpoints.is_empty() && !ring.is_empty() && !ring.overlaps(&frame.checkpoints) {
                return Err(SyncError::NoCheckpointOverlap);
            }
        }
        Ok(())
    }

    // endregion

    /// Count a loss and restart from idle
    fn lose_sync(&mut self, err: SyncError, runner: &mut VmRunner, mem: &mut Allocator) {
        if matches!(
            err,
            SyncError::ProgramMismatch
                | SyncError::DataLengthMismatch { .. }
                | SyncError::DataHashMismatch
        ) {
            self.stats.mismatches += 1;
        }
        self.stats.losses += 1;
        warn!("[VM-SYNC] Sync lost while {}: {}", self.state.name(), err);
        self.discard_session(runner, mem);
        self.state = SyncState::Idle;
    }

    /// Back to idle without counting a loss
    fn abort(&mut self, runner: &mut VmRunner, mem: &mut Allocator, reason: &str) {
        if self.state != SyncState::Idle || self.session.is_some() {
            debug!("[VM-SYNC] Leaving {}: {}", self.state.name(), reason);
        }
        self.discard_session(runner, mem);
        self.state = SyncState::Idle;
    }

    fn discard_session(&mut self, runner: &mut VmRunner, mem: &mut Allocator) {
        if let Some(session) = self.session.take() {
            if let Some(buffer) = session.buffer {
                if let Err(err) = mem.try_free(buffer) {
                    error!("[VM-SYNC] Failed to free sync buffer {}: {}", buffer, err);
                }
            }
        }
        runner.end_wait_sync(SYNC_VM);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_validation() {
        assert!(SyncSettings::default().validate().is_ok());

        let bad = SyncSettings {
            chunk_size: VM_SYNC_MAX_DATA_LEN + 1,
            ..SyncSettings::default()
        };
        assert!(matches!(bad.validate(), Err(SyncError::InvalidSettings(_))));

        let bad = SyncSettings {
            leader_timeout_ms: 500,
            ..SyncSettings::default()
        };
        assert!(bad.validate().is_err());

        let bad = SyncSettings {
            group: String::new(),
            ..SyncSettings::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_coverage_counts_each_byte_once() {
        let mut coverage = Coverage::new(100);
        coverage.mark(0, 64);
        coverage.mark(32, 96);
        assert!(!coverage.is_complete());
        coverage.mark(96, 200);
        assert!(coverage.is_complete());
        assert_eq!(coverage.covered, 100);

        assert!(Coverage::new(0).is_complete());
    }

    #[test]
    fn test_state_codes() {
        assert_eq!(SyncState::Idle as u8, 0);
        assert_eq!(SyncState::Syncing as u8, 1);
        assert_eq!(SyncState::Sync as u8, 2);
        assert_eq!(SyncState::default().name(), "idle");
    }
}
