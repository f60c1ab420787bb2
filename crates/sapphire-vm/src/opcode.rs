// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Bytecode instruction set
//!
//! Stack machine over `i32` words. Operands follow the opcode byte, little-endian.
//!
//! | Opcode | Name | Operand | Stack effect |
//! |--------|------|---------|--------------|
//! | 0x00 | NOP | | |
//! | 0x01 | PUSH | i32 | `-> v` |
//! | 0x02 | LOAD | u16 word | `-> data[w]` |
//! | 0x03 | STORE | u16 word | `v ->` |
//! | 0x04 | DUP | | `a -> a a` |
//! | 0x05 | DROP | | `a ->` |
//! | 0x06-0x0A | ADD SUB MUL DIV MOD | | `a b -> a op b` (div/mod by zero gives 0) |
//! | 0x0B-0x0D | EQ LT GT | | `a b -> 0/1` |
//! | 0x0E | NOT | | `a -> a == 0` |
//! | 0x10 | JMP | u16 pc | |
//! | 0x11 | JZ | u16 pc | `c ->` jump if zero |
//! | 0x12 | CALL | u16 pc | |
//! | 0x13 | RET | | top-level return ends the entry |
//! | 0x14 | RAND | | `-> r` (advances `rng_seed`) |
//! | 0x15 | TICK | | `-> tick` (low 32 bits) |
//! | 0x18 | DELAY | | `ms ->` suspend thread |
//! | 0x19 | YIELD | | suspend thread until next tick |
//! | 0x1A | SPAWN | u16 pc | start a thread |
//! | 0x1B | KILL | u16 pc | stop a thread |
//! | 0x1F | HALT | | stop the program |

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Nop = 0x00,
    Push = 0x01,
    Load = 0x02,
    Store = 0x03,
    Dup = 0x04,
    Drop = 0x05,
    Add = 0x06,
    Sub = 0x07,
    Mul = 0x08,
    Div = 0x09,
    Mod = 0x0A,
    Eq = 0x0B,
    Lt = 0x0C,
    Gt = 0x0D,
    Not = 0x0E,
    Jmp = 0x10,
    Jz = 0x11,
    Call = 0x12,
    Ret = 0x13,
    Rand = 0x14,
    Tick = 0x15,
    Delay = 0x18,
    Yield = 0x19,
    Spawn = 0x1A,
    Kill = 0x1B,
    Halt = 0x1F,
}

impl Opcode {
    /// Operand bytes following the opcode
    pub fn operand_len(self) -> usize {
        match self {
            Opcode::Push => 4,
            Opcode::Load
            | Opcode::Store
            | Opcode::Jmp
            | Opcode::Jz
            | Opcode::Call
            | Opcode::Spawn
            | Opcode::Kill => 2,
            _ => 0,
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x00 => Opcode::Nop,
            0x01 => Opcode::Push,
            0x02 => Opcode::Load,
            0x03 => Opcode::Store,
            0x04 => Opcode::Dup,
            0x05 => Opcode::Drop,
            0x06 => Opcode::Add,
            0x07 => Opcode::Sub,
            0x08 => Opcode::Mul,
            0x09 => Opcode::Div,
            0x0A => Opcode::Mod,
            0x0B => Opcode::Eq,
            0x0C => Opcode::Lt,
            0x0D => Opcode::Gt,
            0x0E => Opcode::Not,
            0x10 => Opcode::Jmp,
            0x11 => Opcode::Jz,
            0x12 => Opcode::Call,
            0x13 => Opcode::Ret,
            0x14 => Opcode::Rand,
            0x15 => Opcode::Tick,
            0x18 => Opcode::Delay,
            0x19 => Opcode::Yield,
            0x1A => Opcode::Spawn,
            0x1B => Opcode::Kill,
            0x1F => Opcode::Halt,
            other => return Err(other),
        })
    }
}
