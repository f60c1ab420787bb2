// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Frame sync wire format
//!
//! Every datagram starts with a fixed header, little-endian:
//!
//! ```text
//! ┌───────────┬─────────┬──────────┬─────────┬────────────┬──────────────┬──────────────┐
//! │ magic u32 │ ver u8  │ type u8  │ flags   │ group_hash │ program_name │ program_file │
//! │ "SYNC"    │         │          │ u16     │ u32        │ hash u32     │ hash u64     │
//! └───────────┴─────────┴──────────┴─────────┴────────────┴──────────────┴──────────────┘
//! ```
//!
//! | Type | Name | Payload |
//! |------|------|---------|
//! | 1 | SYNC | tick, loop_tick, rng_seed, frame, data_len, request_time, sequencer step, threads, checkpoints |
//! | 2 | SYNC_REQ | request_time |
//! | 3 | SYNC_DATA | data_len, offset, chunk |
//! | 4 | SYNC_DATA_HASH | data_len, hash of the whole segment |

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use heapless::Vec as BoundedVec;
use sapphire_vm::{SyncSnapshot, ThreadEntry};

use crate::error::{SyncError, SyncResult};

pub const SYNC_MAGIC: u32 = u32::from_le_bytes(*b"SYNC");
pub const SYNC_VERSION: u8 = 1;
pub const SYNC_HEADER_LEN: usize = 24;

/// Thread table entries carried per SYNC message
pub const SYNC_MAX_THREADS: usize = 16;
/// Checkpoint hashes carried per SYNC message
pub const SYNC_MAX_CHECKPOINTS: usize = 16;
/// Data bytes per SYNC_DATA chunk
pub const VM_SYNC_MAX_DATA_LEN: usize = 512;

const SYNC_FIXED_LEN: usize = 8 + 8 + 8 + 4 + 4 + 8 + 2 + 1 + 1;
const THREAD_ENTRY_LEN: usize = 2 + 2 + 8;

const SYNC_FRAME_MAX_LEN: usize = SYNC_HEADER_LEN
    + SYNC_FIXED_LEN
    + SYNC_MAX_THREADS * THREAD_ENTRY_LEN
    + SYNC_MAX_CHECKPOINTS * 8;
const SYNC_DATA_MAX_LEN: usize = SYNC_HEADER_LEN + 4 + 4 + 2 + VM_SYNC_MAX_DATA_LEN;

/// Largest encoded message
pub const SYNC_MAX_MESSAGE_LEN: usize = if SYNC_FRAME_MAX_LEN > SYNC_DATA_MAX_LEN {
    SYNC_FRAME_MAX_LEN
} else {
    SYNC_DATA_MAX_LEN
};

/// Header flag bits
pub mod flags {
    /// SYNC sent in answer to a SYNC_REQ
    pub const REPLY: u16 = 0x0001;
    /// Leader's sequencer is stepping through programs
    pub const SEQUENCER_ACTIVE: u16 = 0x0002;
    /// SYNC_REQ asks for the data segment as well
    pub const REQUEST_DATA: u16 = 0x0004;
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Sync = 1,
    SyncReq = 2,
    SyncData = 3,
    SyncDataHash = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = SyncError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::Sync),
            2 => Ok(MessageType::SyncReq),
            3 => Ok(MessageType::SyncData),
            4 => Ok(MessageType::SyncDataHash),
            other => Err(SyncError::UnknownType(other)),
        }
    }
}

/// Fields common to every message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncHeader {
    pub flags: u16,
    pub group_hash: u32,
    pub program_name_hash: u32,
    pub program_file_hash: u64,
}

impl SyncHeader {
    pub fn has(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }
}

/// Deterministic VM state as broadcast by the leader
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncFrame {
    pub tick: u64,
    pub loop_tick: u64,
    pub rng_seed: u64,
    pub frame_number: u32,
    pub data_len: u32,
    /// Echo of the follower's request time in replies, 0 in broadcasts
    pub request_time: u64,
    pub sequencer_step: u16,
    pub threads: BoundedVec<ThreadEntry, SYNC_MAX_THREADS>,
    /// Most recent checkpoint hashes, oldest first
    pub checkpoints: BoundedVec<u64, SYNC_MAX_CHECKPOINTS>,
}

impl SyncFrame {
    /// Build from a runner snapshot, truncating tables to the wire limits
    pub fn from_snapshot(snapshot: &SyncSnapshot, checkpoints: &[u64]) -> Self {
        let threads = snapshot
            .threads
            .iter()
            .take(SYNC_MAX_THREADS)
            .copied()
            .collect();
        let skip = checkpoints.len().saturating_sub(SYNC_MAX_CHECKPOINTS);
        let checkpoints = checkpoints.iter().skip(skip).copied().collect();
        Self {
            tick: snapshot.tick,
            loop_tick: snapshot.loop_tick,
            rng_seed: snapshot.rng_seed,
            frame_number: snapshot.frame_number,
            data_len: snapshot.data_len,
            request_time: 0,
            sequencer_step: 0,
            threads,
            checkpoints,
        }
    }

    /// Snapshot for [`sapphire_vm::VmRunner::apply_sync`]
    pub fn to_snapshot(&self, header: &SyncHeader) -> SyncSnapshot {
        SyncSnapshot {
            program_name_hash: header.program_name_hash,
            file_hash: header.program_file_hash,
            tick: self.tick,
            loop_tick: self.loop_tick,
            rng_seed: self.rng_seed,
            frame_number: self.frame_number,
            data_len: self.data_len,
            threads: self.threads.iter().copied().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPayload {
    Sync(SyncFrame),
    Request {
        request_time: u64,
    },
    Data {
        data_len: u32,
        offset: u32,
        chunk: BoundedVec<u8, VM_SYNC_MAX_DATA_LEN>,
    },
    DataHash {
        data_len: u32,
        hash: u64,
    },
}

impl SyncPayload {
    pub fn message_type(&self) -> MessageType {
        match self {
            SyncPayload::Sync(_) => MessageType::Sync,
            SyncPayload::Request { .. } => MessageType::SyncReq,
            SyncPayload::Data { .. } => MessageType::SyncData,
            SyncPayload::DataHash { .. } => MessageType::SyncDataHash,
        }
    }
}

/// One protocol datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMessage {
    pub header: SyncHeader,
    pub payload: SyncPayload,
}

impl SyncMessage {
    pub fn new(header: SyncHeader, payload: SyncPayload) -> Self {
        Self { header, payload }
    }

    pub fn encode(&self) -> SyncResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(SYNC_HEADER_LEN + SYNC_FIXED_LEN);
        buf.write_u32::<LittleEndian>(SYNC_MAGIC)?;
        buf.write_u8(SYNC_VERSION)?;
        buf.write_u8(self.payload.message_type() as u8)?;
        buf.write_u16::<LittleEndian>(self.header.flags)?;
        buf.write_u32::<LittleEndian>(self.header.group_hash)?;
        buf.write_u32::<LittleEndian>(self.header.program_name_hash)?;
        buf.write_u64::<LittleEndian>(self.header.program_file_hash)?;

        match &self.payload {
            SyncPayload::Sync(frame) => {
                buf.write_u64::<LittleEndian>(frame.tick)?;
                buf.write_u64::<LittleEndian>(frame.loop_tick)?;
                buf.write_u64::<LittleEndian>(frame.rng_seed)?;
                buf.write_u32::<LittleEndian>(frame.frame_number)?;
                buf.write_u32::<LittleEndian>(frame.data_len)?;
                buf.write_u64::<LittleEndian>(frame.request_time)?;
                buf.write_u16::<LittleEndian>(frame.sequencer_step)?;
                buf.write_u8(frame.threads.len() as u8)?;
                buf.write_u8(frame.checkpoints.len() as u8)?;
                for thread in &frame.threads {
                    buf.write_u16::<LittleEndian>(thread.func_addr)?;
                    buf.write_u16::<LittleEndian>(thread.pc_offset)?;
                    buf.write_u64::<LittleEndian>(thread.tick)?;
                }
                for hash in &frame.checkpoints {
                    buf.write_u64::<LittleEndian>(*hash)?;
                }
            }
            SyncPayload::Request { request_time } => {
                buf.write_u64::<LittleEndian>(*request_time)?;
            }
            SyncPayload::Data {
                data_len,
                offset,
                chunk,
            } => {
                buf.write_u32::<LittleEndian>(*data_len)?;
                buf.write_u32::<LittleEndian>(*offset)?;
                buf.write_u16::<LittleEndian>(chunk.len() as u16)?;
                buf.extend_from_slice(chunk);
            }
            SyncPayload::DataHash { data_len, hash } => {
                buf.write_u32::<LittleEndian>(*data_len)?;
                buf.write_u64::<LittleEndian>(*hash)?;
            }
        }
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> SyncResult<Self> {
        if bytes.len() > SYNC_MAX_MESSAGE_LEN {
            return Err(SyncError::MessageTooLarge {
                size: bytes.len(),
                max: SYNC_MAX_MESSAGE_LEN,
            });
        }
        let mut r = Reader { buf: bytes, pos: 0 };

        let magic = r.u32()?;
        if magic != SYNC_MAGIC {
            return Err(SyncError::BadMagic(magic));
        }
        let version = r.u8()?;
        if version != SYNC_VERSION {
            return Err(SyncError::BadVersion(version));
        }
        let msg_type = MessageType::try_from(r.u8()?)?;
        let header = SyncHeader {
            flags: r.u16()?,
            group_hash: r.u32()?,
            program_name_hash: r.u32()?,
            program_file_hash: r.u64()?,
        };

        let payload = match msg_type {
            MessageType::Sync => {
                let mut frame = SyncFrame {
                    tick: r.u64()?,
                    loop_tick: r.u64()?,
                    rng_seed: r.u64()?,
                    frame_number: r.u32()?,
                    data_len: r.u32()?,
                    request_time: r.u64()?,
                    sequencer_step: r.u16()?,
                    ..SyncFrame::default()
                };
                let thread_count = r.u8()? as usize;
                let checkpoint_count = r.u8()? as usize;
                check_count("thread", thread_count, SYNC_MAX_THREADS)?;
                check_count("checkpoint", checkpoint_count, SYNC_MAX_CHECKPOINTS)?;
                for _ in 0..thread_count {
                    let entry = ThreadEntry {
                        func_addr: r.u16()?,
                        pc_offset: r.u16()?,
                        tick: r.u64()?,
                    };
                    // Capacity checked above
                    let _ = frame.threads.push(entry);
                }
                for _ in 0..checkpoint_count {
                    let _ = frame.checkpoints.push(r.u64()?);
                }
                SyncPayload::Sync(frame)
            }
            MessageType::SyncReq => SyncPayload::Request {
                request_time: r.u64()?,
            },
            MessageType::SyncData => {
                let data_len = r.u32()?;
                let offset = r.u32()?;
                let chunk_len = r.u16()? as usize;
                check_count("chunk byte", chunk_len, VM_SYNC_MAX_DATA_LEN)?;
                let mut chunk = BoundedVec::new();
                let _ = chunk.extend_from_slice(r.take(chunk_len)?);
                SyncPayload::Data {
                    data_len,
                    offset,
                    chunk,
                }
            }
            MessageType::SyncDataHash => SyncPayload::DataHash {
                data_len: r.u32()?,
                hash: r.u64()?,
            },
        };

        Ok(Self { header, payload })
    }
}

fn check_count(field: &'static str, count: usize, max: usize) -> SyncResult<()> {
    if count > max {
        return Err(SyncError::TooMany { field, count, max });
    }
    Ok(())
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> SyncResult<&'a [u8]> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(SyncError::Truncated {
                needed: end,
                available: self.buf.len(),
            });
        }
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> SyncResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> SyncResult<u16> {
        self.take(2).map(LittleEndian::read_u16)
    }

    fn u32(&mut self) -> SyncResult<u32> {
        self.take(4).map(LittleEndian::read_u32)
    }

    fn u64(&mut self) -> SyncResult<u64> {
        self.take(8).map(LittleEndian::read_u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> SyncHeader {
        SyncHeader {
            flags: flags::REPLY,
            group_hash: 0xAABB_CCDD,
            program_name_hash: 0x1122_3344,
            program_file_hash: 0x0102_0304_0506_0708,
        }
    }

    #[test]
    fn test_header_layout() {
        let msg = SyncMessage::new(header(), SyncPayload::Request { request_time: 5 });
        let bytes = msg.encode().unwrap();
        assert_eq!(bytes.len(), SYNC_HEADER_LEN + 8);
        assert_eq!(&bytes[0..4], b"SYNC");
        assert_eq!(bytes[4], SYNC_VERSION);
        assert_eq!(bytes[5], MessageType::SyncReq as u8);
        assert_eq!(LittleEndian::read_u16(&bytes[6..8]), flags::REPLY);
        assert_eq!(LittleEndian::read_u32(&bytes[8..12]), 0xAABB_CCDD);
        assert_eq!(LittleEndian::read_u64(&bytes[16..24]), 0x0102_0304_0506_0708);
    }

    #[test]
    fn test_sync_frame_decodes() {
        let mut frame = SyncFrame {
            tick: 1234,
            loop_tick: 1240,
            rng_seed: 99,
            frame_number: 61,
            data_len: 16,
            request_time: 77,
            sequencer_step: 3,
            ..SyncFrame::default()
        };
        frame
            .threads
            .push(ThreadEntry {
                func_addr: 10,
                pc_offset: 14,
                tick: 1300,
            })
            .unwrap();
        frame.checkpoints.push(0xDEAD).unwrap();
        frame.checkpoints.push(0xBEEF).unwrap();

        let msg = SyncMessage::new(header(), SyncPayload::Sync(frame));
        let bytes = msg.encode().unwrap();
        assert_eq!(bytes.len(), SYNC_HEADER_LEN + SYNC_FIXED_LEN + THREAD_ENTRY_LEN + 16);
        assert_eq!(SyncMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_truncated_rejected() {
        let msg = SyncMessage::new(
            header(),
            SyncPayload::DataHash {
                data_len: 16,
                hash: 1,
            },
        );
        let bytes = msg.encode().unwrap();
        assert!(matches!(
            SyncMessage::decode(&bytes[..bytes.len() - 1]),
            Err(SyncError::Truncated { .. })
        ));
    }

    #[test]
    fn test_oversized_counts_rejected() {
        let msg = SyncMessage::new(header(), SyncPayload::Sync(SyncFrame::default()));
        let mut bytes = msg.encode().unwrap();
        // thread_count byte sits just before checkpoint_count at the end of the fixed part
        let at = SYNC_HEADER_LEN + SYNC_FIXED_LEN - 2;
        bytes[at] = 17;
        assert!(matches!(
            SyncMessage::decode(&bytes),
            Err(SyncError::TooMany { field: "thread", .. })
        ));
    }

    #[test]
    fn test_bad_magic_and_type() {
        let msg = SyncMessage::new(header(), SyncPayload::Request { request_time: 1 });
        let mut bytes = msg.encode().unwrap();
        bytes[5] = 9;
        assert!(matches!(SyncMessage::decode(&bytes), Err(SyncError::UnknownType(9))));
        bytes[0] = b'X';
        assert!(matches!(SyncMessage::decode(&bytes), Err(SyncError::BadMagic(_))));
    }

    #[test]
    fn test_data_chunk() {
        let mut chunk = BoundedVec::new();
        chunk.extend_from_slice(&[1, 2, 3, 4]).unwrap();
        let msg = SyncMessage::new(
            header(),
            SyncPayload::Data {
                data_len: 64,
                offset: 8,
                chunk,
            },
        );
        let decoded = SyncMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..700)) {
                let _ = SyncMessage::decode(&bytes);
            }

            #[test]
            fn prop_valid_header_with_garbage_body(
                msg_type in 1u8..=4,
                body in prop::collection::vec(any::<u8>(), 0..600),
            ) {
                let mut bytes = SyncMessage::new(header(), SyncPayload::Request { request_time: 1 })
                    .encode()
                    .unwrap();
                bytes.truncate(SYNC_HEADER_LEN);
                bytes[5] = msg_type;
                bytes.extend_from_slice(&body);
                if let Ok(msg) = SyncMessage::decode(&bytes) {
                    prop_assert_eq!(msg.header.group_hash, 0xAABB_CCDD);
                }
            }
        }
    }
}
