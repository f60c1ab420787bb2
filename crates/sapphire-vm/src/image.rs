// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Program image format and assembler
//!
//! ```text
//! 0  magic u32 "SVM1"        4  version u16          6  header_len u16
//! 8  program_name_hash u32   12 code_len u32         16 data_len u32
//! 20 init_start u16          22 loop_start u16       24 publish_count u16
//! 26 reserved u16            28 reserved u32
//! 32 publish table: publish_count x { name_hash u32, word_addr u16, reserved u16 }
//!    code (code_len bytes)
//!    data (data_len bytes, initial i32 words)
//! ```

use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{RunnerError, RunnerResult};
use crate::hash::{hash32, hash64};
use crate::opcode::Opcode;

pub const IMAGE_MAGIC: u32 = u32::from_le_bytes(*b"SVM1");
pub const IMAGE_VERSION: u16 = 1;
pub const IMAGE_HEADER_LEN: usize = 32;
pub const PUBLISH_ENTRY_LEN: usize = 8;
/// Code offsets, return addresses and thread resume points are `u16`
pub const MAX_CODE_LEN: usize = u16::MAX as usize;

/// Published variable: a data word exposed to the management layer by name hash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishedVar {
    pub name_hash: u32,
    pub word_addr: u16,
}

/// Parsed and validated image layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLayout {
    pub program_name_hash: u32,
    pub file_hash: u64,
    pub code_start: usize,
    pub code_len: usize,
    pub data_start: usize,
    pub data_len: usize,
    pub init_start: u16,
    pub loop_start: u16,
    pub published: Vec<PublishedVar>,
}

impl ImageLayout {
    /// Parse the header and check every segment boundary against `image`
    pub fn parse(image: &[u8]) -> RunnerResult<Self> {
        if image.len() < IMAGE_HEADER_LEN {
            return Err(RunnerError::InvalidImage(format!(
                "{} bytes is shorter than the header",
                image.len()
            )));
        }
        let magic = LittleEndian::read_u32(&image[0..4]);
        if magic != IMAGE_MAGIC {
            return Err(RunnerError::InvalidImage(format!("bad magic {:#010x}", magic)));
        }
        let version = LittleEndian::read_u16(&image[4..6]);
        if version != IMAGE_VERSION {
            return Err(RunnerError::InvalidImage(format!(
                "unsupported version {}",
                version
            )));
        }
        let header_len = LittleEndian::read_u16(&image[6..8]) as usize;
        if header_len < IMAGE_HEADER_LEN {
            return Err(RunnerError::InvalidImage(format!(
                "header_len {} too small",
                header_len
            )));
        }

        let program_name_hash = LittleEndian::read_u32(&image[8..12]);
        let code_len = LittleEndian::read_u32(&image[12..16]) as usize;
        let data_len = LittleEndian::read_u32(&image[16..20]) as usize;
        let init_start = LittleEndian::read_u16(&image[20..22]);
        let loop_start = LittleEndian::read_u16(&image[22..24]);
        let publish_count = LittleEndian::read_u16(&image[24..26]) as usize;

        let code_start = header_len + publish_count * PUBLISH_ENTRY_LEN;
        let data_start = code_start + code_len;

        if code_len > MAX_CODE_LEN {
            return Err(RunnerError::InvalidImage(format!(
                "code of {} bytes exceeds the {} byte address space",
                code_len, MAX_CODE_LEN
            )));
        }
        if code_start % 4 != 0 {
            return Err(RunnerError::Misaligned {
                segment: "code",
                offset: code_start,
            });
        }
        if data_start % 4 != 0 {
            return Err(RunnerError::Misaligned {
                segment: "data",
                offset: data_start,
            });
        }
        if data_len % 4 != 0 {
            return Err(RunnerError::Misaligned {
                segment: "data length",
                offset: data_len,
            });
        }
        if data_start + data_len != image.len() {
            return Err(RunnerError::InvalidImage(format!(
                "segments end at {}, image is {} bytes",
                data_start + data_len,
                image.len()
            )));
        }
        if code_len == 0 || init_start as usize >= code_len || loop_start as usize >= code_len {
            return Err(RunnerError::InvalidImage(format!(
                "entry points init={} loop={} outside code of {} bytes",
                init_start, loop_start, code_len
            )));
        }

        let words = data_len / 4;
        let mut published = Vec::with_capacity(publish_count);
        for i in 0..publish_count {
            let at = header_len + i * PUBLISH_ENTRY_LEN;
            let var = PublishedVar {
                name_hash: LittleEndian::read_u32(&image[at..at + 4]),
                word_addr: LittleEndian::read_u16(&image[at + 4..at + 6]),
            };
            if var.word_addr as usize >= words {
                return Err(RunnerError::InvalidImage(format!(
                    "published variable {:#010x} at word {} outside data",
                    var.name_hash, var.word_addr
                )));
            }
            published.push(var);
        }

        Ok(Self {
            program_name_hash,
            file_hash: hash64(image),
            code_start,
            code_len,
            data_start,
            data_len,
            init_start,
            loop_start,
            published,
        })
    }
}

/// Label-resolving bytecode assembler
#[derive(Debug, Default, Clone)]
pub struct CodeBuilder {
    code: Vec<u8>,
    labels: HashMap<String, usize>,
    fixups: Vec<(usize, String)>,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current code offset
    pub fn here(&self) -> usize {
        self.code.len()
    }

    /// Define `name` at the current offset
    pub fn label(&mut self, name: &str) -> &mut Self {
        let here = self.here();
        self.labels.insert(name.to_string(), here);
        self
    }

    pub fn op(&mut self, op: Opcode) -> &mut Self {
        self.code.push(op as u8);
        self
    }

    pub fn push(&mut self, value: i32) -> &mut Self {
        self.code.push(Opcode::Push as u8);
        self.code.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn load(&mut self, word: u16) -> &mut Self {
        self.with_u16(Opcode::Load, word)
    }

    pub fn store(&mut self, word: u16) -> &mut Self {
        self.with_u16(Opcode::Store, word)
    }

    pub fn jmp(&mut self, label: &str) -> &mut Self {
        self.with_label(Opcode::Jmp, label)
    }

    pub fn jz(&mut self, label: &str) -> &mut Self {
        self.with_label(Opcode::Jz, label)
    }

    pub fn call(&mut self, label: &str) -> &mut Self {
        self.with_label(Opcode::Call, label)
    }

    pub fn spawn(&mut self, label: &str) -> &mut Self {
        self.with_label(Opcode::Spawn, label)
    }

    pub fn kill(&mut self, label: &str) -> &mut Self {
        self.with_label(Opcode::Kill, label)
    }

    /// Append raw bytes (used to build deliberately malformed programs)
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.code.extend_from_slice(bytes);
        self
    }

    fn with_u16(&mut self, op: Opcode, operand: u16) -> &mut Self {
        self.code.push(op as u8);
        self.code.extend_from_slice(&operand.to_le_bytes());
        self
    }

    fn with_label(&mut self, op: Opcode, label: &str) -> &mut Self {
        self.code.push(op as u8);
        self.fixups.push((self.code.len(), label.to_string()));
        self.code.extend_from_slice(&[0, 0]);
        self
    }

    fn resolve(&self, label: &str) -> RunnerResult<u16> {
        let at = self
            .labels
            .get(label)
            .copied()
            .ok_or_else(|| RunnerError::InvalidImage(format!("undefined label '{}'", label)))?;
        u16::try_from(at).map_err(|_| {
            RunnerError::InvalidImage(format!("label '{}' at {} is not addressable", label, at))
        })
    }

    /// Patch label references and pad to a 4-byte boundary with NOPs
    pub fn assemble(&self) -> RunnerResult<Vec<u8>> {
        let mut code = self.code.clone();
        for (at, label) in &self.fixups {
            let target = self.resolve(label)?;
            LittleEndian::write_u16(&mut code[*at..*at + 2], target);
        }
        while code.len() % 4 != 0 {
            code.push(Opcode::Nop as u8);
        }
        if code.len() > MAX_CODE_LEN {
            return Err(RunnerError::InvalidImage(format!(
                "code of {} bytes exceeds the {} byte address space",
                code.len(),
                MAX_CODE_LEN
            )));
        }
        Ok(code)
    }
}

/// Builds a complete program image.
///
/// ```rust
/// use sapphire_vm::{CodeBuilder, ImageBuilder, Opcode};
///
/// let mut code = CodeBuilder::new();
/// code.label("init").op(Opcode::Ret);
/// code.label("loop").load(0).push(1).op(Opcode::Add).store(0).op(Opcode::Ret);
///
/// let image = ImageBuilder::new("counter")
///     .data(&[0])
///     .publish("count", 0)
///     .build(&code, "init", "loop")
///     .unwrap();
/// assert_eq!(&image[0..4], b"SVM1");
/// ```
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    name: String,
    data: Vec<i32>,
    published: Vec<(u32, u16)>,
}

impl ImageBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            data: Vec::new(),
            published: Vec::new(),
        }
    }

    /// Initial data segment words
    pub fn data(mut self, words: &[i32]) -> Self {
        self.data = words.to_vec();
        self
    }

    pub fn publish(mut self, name: &str, word_addr: u16) -> Self {
        self.published.push((hash32(name), word_addr));
        self
    }

    pub fn build(&self, code: &CodeBuilder, init: &str, loop_entry: &str) -> RunnerResult<Vec<u8>> {
        let init_start = code.resolve(init)?;
        let loop_start = code.resolve(loop_entry)?;
        let code = code.assemble()?;

        let data_len = self.data.len() * 4;
        let header_len = IMAGE_HEADER_LEN;
        let total = header_len + self.published.len() * PUBLISH_ENTRY_LEN + code.len() + data_len;
        let mut image = vec![0u8; total];

        LittleEndian::write_u32(&mut image[0..4], IMAGE_MAGIC);
        LittleEndian::write_u16(&mut image[4..6], IMAGE_VERSION);
        LittleEndian::write_u16(&mut image[6..8], header_len as u16);
        LittleEndian::write_u32(&mut image[8..12], hash32(&self.name));
        LittleEndian::write_u32(&mut image[12..16], code.len() as u32);
        LittleEndian::write_u32(&mut image[16..20], data_len as u32);
        LittleEndian::write_u16(&mut image[20..22], init_start);
        LittleEndian::write_u16(&mut image[22..24], loop_start);
        LittleEndian::write_u16(&mut image[24..26], self.published.len() as u16);

        let mut at = header_len;
        for (name_hash, word_addr) in &self.published {
            LittleEndian::write_u32(&mut image[at..at + 4], *name_hash);
            LittleEndian::write_u16(&mut image[at + 4..at + 6], *word_addr);
            at += PUBLISH_ENTRY_LEN;
        }
        image[at..at + code.len()].copy_from_slice(&code);
        at += code.len();
        for word in &self.data {
            LittleEndian::write_i32(&mut image[at..at + 4], *word);
            at += 4;
        }
        Ok(image)
    }
}
