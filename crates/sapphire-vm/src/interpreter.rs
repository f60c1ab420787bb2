// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Bytecode interpreter
//!
//! Runs one entry point to completion, suspension or fault. The operand and call
//! stacks live only for the duration of one entry; a suspended thread resumes with
//! empty stacks at its saved pc.

use byteorder::{ByteOrder, LittleEndian};
use tracing::trace;

use crate::error::{VmError, VmResult};
use crate::hash::next_random;
use crate::opcode::Opcode;
use crate::state::{ThreadEntry, VmState};

pub const STACK_DEPTH: usize = 32;
pub const CALL_DEPTH: usize = 16;

/// How an entry point finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Top-level `RET`
    Returned,
    /// `HALT` executed
    Halted,
    /// Thread suspended by `DELAY` or `YIELD`
    Suspended { pc: u16, wake_tick: u64 },
}

struct Machine<'a> {
    code: &'a [u8],
    data: &'a mut [u8],
    pc: usize,
    stack: [i32; STACK_DEPTH],
    sp: usize,
    calls: [u16; CALL_DEPTH],
    depth: usize,
}

impl Machine<'_> {
    fn push(&mut self, value: i32) -> VmResult<()> {
        if self.sp == STACK_DEPTH {
            return Err(VmError::StackOverflow);
        }
        self.stack[self.sp] = value;
        self.sp += 1;
        Ok(())
    }

    fn pop(&mut self) -> VmResult<i32> {
        if self.sp == 0 {
            return Err(VmError::StackUnderflow);
        }
        self.sp -= 1;
        Ok(self.stack[self.sp])
    }

    fn operand(&mut self, len: usize) -> VmResult<&[u8]> {
        let start = self.pc;
        if start + len > self.code.len() {
            return Err(VmError::JumpOutOfCode {
                pc: (start + len) as u32,
            });
        }
        self.pc += len;
        Ok(&self.code[start..start + len])
    }

    fn operand_u16(&mut self) -> VmResult<u16> {
        self.operand(2).map(LittleEndian::read_u16)
    }

    fn operand_i32(&mut self) -> VmResult<i32> {
        self.operand(4).map(LittleEndian::read_i32)
    }

    fn target(&self, addr: u16) -> VmResult<usize> {
        if addr as usize >= self.code.len() {
            return Err(VmError::JumpOutOfCode { pc: addr as u32 });
        }
        Ok(addr as usize)
    }

    fn word_range(&self, addr: u16) -> VmResult<core::ops::Range<usize>> {
        let start = addr as usize * 4;
        if start + 4 > self.data.len() {
            return Err(VmError::DataOutOfRange { addr });
        }
        Ok(start..start + 4)
    }

    fn binary(&mut self, f: impl FnOnce(i32, i32) -> i32) -> VmResult<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        self.push(f(a, b))
    }
}

/// Execute `code` from `entry` until it returns, halts, suspends or faults.
///
/// `thread` is the thread table index when resuming a cooperative thread; suspension is
/// only legal there, at call depth zero.
pub fn execute(
    code: &[u8],
    data: &mut [u8],
    state: &mut VmState,
    entry: u16,
    thread: Option<usize>,
) -> VmResult<ExecOutcome> {
    let mut m = Machine {
        code,
        data,
        pc: 0,
        stack: [0; STACK_DEPTH],
        sp: 0,
        calls: [0; CALL_DEPTH],
        depth: 0,
    };
    m.pc = m.target(entry)?;

    let mut cycles = 0u32;
    loop {
        cycles += 1;
        if cycles > state.max_cycles {
            return Err(VmError::CycleLimit);
        }

        let at = m.pc;
        let byte = m.operand(1)?[0];
        let op = Opcode::try_from(byte).map_err(|opcode| VmError::BadOpcode {
            opcode,
            pc: at as u16,
        })?;

        match op {
            Opcode::Nop => {}
            Opcode::Push => {
                let value = m.operand_i32()?;
                m.push(value)?;
            }
            Opcode::Load => {
                let addr = m.operand_u16()?;
                let range = m.word_range(addr)?;
                let value = LittleEndian::read_i32(&m.data[range]);
                m.push(value)?;
            }
            Opcode::Store => {
                let addr = m.operand_u16()?;
                let range = m.word_range(addr)?;
                let value = m.pop()?;
                LittleEndian::write_i32(&mut m.data[range], value);
            }
            Opcode::Dup => {
                let value = m.pop()?;
                m.push(value)?;
                m.push(value)?;
            }
            Opcode::Drop => {
                m.pop()?;
            }
            Opcode::Add => m.binary(i32::wrapping_add)?,
            Opcode::Sub => m.binary(i32::wrapping_sub)?,
            Opcode::Mul => m.binary(i32::wrapping_mul)?,
            Opcode::Div => m.binary(|a, b| if b == 0 { 0 } else { a.wrapping_div(b) })?,
            Opcode::Mod => m.binary(|a, b| if b == 0 { 0 } else { a.wrapping_rem(b) })?,
            Opcode::Eq => m.binary(|a, b| (a == b) as i32)?,
            Opcode::Lt => m.binary(|a, b| (a < b) as i32)?,
            Opcode::Gt => m.binary(|a, b| (a > b) as i32)?,
            Opcode::Not => {
                let value = m.pop()?;
                m.push((value == 0) as i32)?;
            }
            Opcode::Jmp => {
                let addr = m.operand_u16()?;
                m.pc = m.target(addr)?;
            }
            Opcode::Jz => {
                let addr = m.operand_u16()?;
                if m.pop()? == 0 {
                    m.pc = m.target(addr)?;
                }
            }
            Opcode::Call => {
                let addr = m.operand_u16()?;
                if m.depth == CALL_DEPTH {
                    return Err(VmError::CallOverflow);
                }
                m.calls[m.depth] = m.pc as u16;
                m.depth += 1;
                m.pc = m.target(addr)?;
            }
            Opcode::Ret => {
                if m.depth == 0 {
                    return Ok(ExecOutcome::Returned);
                }
                m.depth -= 1;
                m.pc = m.calls[m.depth] as usize;
            }
            Opcode::Rand => {
                let value = next_random(&mut state.rng_seed);
                m.push(value)?;
            }
            Opcode::Tick => {
                m.push(state.tick as u32 as i32)?;
            }
            Opcode::Delay => {
                let ms = m.pop()?.max(0) as u64;
                if thread.is_none() || m.depth != 0 {
                    return Err(VmError::InvalidYield);
                }
                return Ok(ExecOutcome::Suspended {
                    pc: m.pc as u16,
                    wake_tick: state.tick + ms,
                });
            }
            Opcode::Yield => {
                if thread.is_none() || m.depth != 0 {
                    return Err(VmError::InvalidYield);
                }
                return Ok(ExecOutcome::Suspended {
                    pc: m.pc as u16,
                    wake_tick: state.tick + 1,
                });
            }
            Opcode::Spawn => {
                let addr = m.operand_u16()?;
                m.target(addr)?;
                spawn(state, addr);
            }
            Opcode::Kill => {
                let addr = m.operand_u16()?;
                for entry in state.threads.iter_mut().filter(|t| t.func_addr == addr) {
                    *entry = ThreadEntry::FREE;
                }
            }
            Opcode::Halt => return Ok(ExecOutcome::Halted),
        }
    }
}

fn spawn(state: &mut VmState, addr: u16) {
    if state.threads.iter().any(|t| t.func_addr == addr) {
        return;
    }
    let tick = state.tick;
    match state.threads.iter_mut().find(|t| !t.is_active()) {
        Some(slot) => {
            *slot = ThreadEntry {
                func_addr: addr,
                pc_offset: addr,
                tick,
            };
        }
        None => trace!("[VM] Thread table full, SPAWN {} ignored", addr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{CodeBuilder, ImageLayout};

    fn state_for(code_len: usize) -> VmState {
        let layout = ImageLayout {
            program_name_hash: 0,
            file_hash: 0,
            code_start: 0,
            code_len,
            data_start: code_len,
            data_len: 16,
            init_start: 0,
            loop_start: 0,
            published: Vec::new(),
        };
        VmState::new(&layout, 4, 10_000, 1234)
    }

    fn run(code: &CodeBuilder, data: &mut [u8], thread: Option<usize>) -> (VmResult<ExecOutcome>, VmState) {
        let bytes = code.assemble().unwrap();
        let mut state = state_for(bytes.len());
        let result = execute(&bytes, data, &mut state, 0, thread);
        (result, state)
    }

    fn word(data: &[u8], addr: usize) -> i32 {
        LittleEndian::read_i32(&data[addr * 4..addr * 4 + 4])
    }

    #[test]
    fn test_arithmetic() {
        let mut code = CodeBuilder::new();
        code.push(7).push(5).op(Opcode::Sub).store(0);
        code.push(6).push(7).op(Opcode::Mul).store(1);
        code.push(-9).push(2).op(Opcode::Div).store(2);
        code.push(10).push(0).op(Opcode::Mod).store(3);
        code.op(Opcode::Ret);

        let mut data = [0u8; 16];
        let (result, _) = run(&code, &mut data, None);
        assert_eq!(result, Ok(ExecOutcome::Returned));
        assert_eq!(word(&data, 0), 2);
        assert_eq!(word(&data, 1), 42);
        assert_eq!(word(&data, 2), -4);
        assert_eq!(word(&data, 3), 0);
    }

    #[test]
    fn test_division_by_zero_yields_zero() {
        let mut code = CodeBuilder::new();
        code.push(5).push(0).op(Opcode::Div).store(0).op(Opcode::Ret);
        let mut data = [0xFFu8; 16];
        let (result, _) = run(&code, &mut data, None);
        assert_eq!(result, Ok(ExecOutcome::Returned));
        assert_eq!(word(&data, 0), 0);
    }

    #[test]
    fn test_conditional_loop() {
        // data[0] counts down from 5, data[1] accumulates
        let mut code = CodeBuilder::new();
        code.push(5).store(0);
        code.label("top").load(0).jz("done");
        code.load(1).push(3).op(Opcode::Add).store(1);
        code.load(0).push(1).op(Opcode::Sub).store(0);
        code.jmp("top");
        code.label("done").op(Opcode::Ret);

        let mut data = [0u8; 16];
        let (result, _) = run(&code, &mut data, None);
        assert_eq!(result, Ok(ExecOutcome::Returned));
        assert_eq!(word(&data, 1), 15);
    }

    #[test]
    fn test_call_and_return() {
        let mut code = CodeBuilder::new();
        code.call("double").call("double").op(Opcode::Ret);
        code.label("double").load(0).push(2).op(Opcode::Mul).store(0).op(Opcode::Ret);

        let mut data = [0u8; 16];
        data[0] = 3;
        let (result, _) = run(&code, &mut data, None);
        assert_eq!(result, Ok(ExecOutcome::Returned));
        assert_eq!(word(&data, 0), 12);
    }

    #[test]
    fn test_faults() {
        let mut data = [0u8; 16];

        let mut code = CodeBuilder::new();
        code.op(Opcode::Add);
        assert_eq!(run(&code, &mut data, None).0, Err(VmError::StackUnderflow));

        let mut code = CodeBuilder::new();
        code.load(4);
        assert_eq!(
            run(&code, &mut data, None).0,
            Err(VmError::DataOutOfRange { addr: 4 })
        );

        let mut code = CodeBuilder::new();
        code.raw(&[0xEE]);
        assert_eq!(
            run(&code, &mut data, None).0,
            Err(VmError::BadOpcode { opcode: 0xEE, pc: 0 })
        );

        let mut code = CodeBuilder::new();
        code.label("spin").jmp("spin");
        assert_eq!(run(&code, &mut data, None).0, Err(VmError::CycleLimit));

        let mut code = CodeBuilder::new();
        code.label("deep").call("deep");
        assert_eq!(run(&code, &mut data, None).0, Err(VmError::CallOverflow));

        let mut code = CodeBuilder::new();
        code.label("fill").push(1).jmp("fill");
        assert_eq!(run(&code, &mut data, None).0, Err(VmError::StackOverflow));
    }

    #[test]
    fn test_delay_only_in_thread_top_frame() {
        let mut data = [0u8; 16];
        let mut code = CodeBuilder::new();
        code.push(25).op(Opcode::Delay).op(Opcode::Ret);

        assert_eq!(run(&code, &mut data, None).0, Err(VmError::InvalidYield));

        let (result, _) = run(&code, &mut data, Some(0));
        assert_eq!(
            result,
            Ok(ExecOutcome::Suspended {
                pc: 6,
                wake_tick: 25
            })
        );

        let mut code = CodeBuilder::new();
        code.call("inner").op(Opcode::Ret);
        code.label("inner").op(Opcode::Yield).op(Opcode::Ret);
        assert_eq!(run(&code, &mut data, Some(0)).0, Err(VmError::InvalidYield));
    }

    #[test]
    fn test_spawn_and_kill() {
        let mut data = [0u8; 16];
        let mut code = CodeBuilder::new();
        code.spawn("worker").spawn("worker").op(Opcode::Ret);
        code.label("worker").op(Opcode::Ret);

        let (result, state) = run(&code, &mut data, None);
        assert_eq!(result, Ok(ExecOutcome::Returned));
        assert_eq!(state.active_threads(), 1);
        assert_eq!(state.threads[0].func_addr, 7);
        assert_eq!(state.threads[0].pc_offset, 7);

        let mut code = CodeBuilder::new();
        code.spawn("worker").kill("worker").op(Opcode::Ret);
        code.label("worker").op(Opcode::Ret);
        let (_, state) = run(&code, &mut data, None);
        assert_eq!(state.active_threads(), 0);
    }

    #[test]
    fn test_rand_advances_seed() {
        let mut data = [0u8; 16];
        let mut code = CodeBuilder::new();
        code.op(Opcode::Rand).store(0).op(Opcode::Ret);
        let (_, state) = run(&code, &mut data, None);
        assert_ne!(state.rng_seed, 1234);

        let mut expected = 1234u64;
        assert_eq!(word(&data, 0), next_random(&mut expected));
    }

    #[test]
    fn test_halt() {
        let mut data = [0u8; 16];
        let mut code = CodeBuilder::new();
        code.op(Opcode::Halt);
        assert_eq!(run(&code, &mut data, None).0, Ok(ExecOutcome::Halted));
    }
}
