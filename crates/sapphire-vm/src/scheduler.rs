// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! VM Scheduler - event-driven wake discipline for all instances
//!
//! Each call to [`VmScheduler::service`] is one cooperative pass:
//! 1. Advance every running instance's tick by the host time elapsed since its last pass
//! 2. Resume threads whose wake tick has arrived, then run the loop frame if due
//! 3. Return the delay until the earliest next wake across all instances
//!
//! The caller arms a timer for that delay and yields. When an instance is already behind
//! (delay <= 0), the pass returns one yield quantum instead so other cooperative work is not
//! starved, and the timing pressure counter records the overrun. Timing is best effort under
//! overload.

use sapphire_memory::Allocator;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::VmError;
use crate::runner::VmRunner;
use crate::status::{RunMode, VmStatus};

/// Scheduler timing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Delay returned when an instance is already behind schedule
    pub yield_quantum_ms: u64,
    /// Delay returned when no instance is running
    pub idle_delay_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            yield_quantum_ms: 2,
            idle_delay_ms: 100,
        }
    }
}

/// Result of one scheduler pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerPass {
    /// Milliseconds until the next pass is needed
    pub delay_ms: u64,
    pub loops_run: u32,
    pub threads_run: u32,
    /// Instances that faulted during this pass
    pub faulted: Vec<(usize, VmError)>,
    /// Instances that halted during this pass
    pub halted: Vec<usize>,
    /// True when the pass ended behind schedule
    pub timing_pressure: bool,
}

/// Drives a [`VmRunner`] on its instances' own wake requests
pub struct VmScheduler {
    runner: VmRunner,
    settings: SchedulerSettings,
    last_service_ms: Vec<Option<u64>>,
    timing_pressure: u64,
}

impl VmScheduler {
    pub fn new(runner: VmRunner, settings: SchedulerSettings) -> Self {
        let last_service_ms = vec![None; runner.max_vms()];
        Self {
            runner,
            settings,
            last_service_ms,
            timing_pressure: 0,
        }
    }

    pub fn runner(&self) -> &VmRunner {
        &self.runner
    }

    pub fn runner_mut(&mut self) -> &mut VmRunner {
        &mut self.runner
    }

    /// Passes that ended behind schedule since creation
    pub fn timing_pressure(&self) -> u64 {
        self.timing_pressure
    }

    /// Run one cooperative pass at host time `now_ms`
    pub fn service(&mut self, mem: &mut Allocator, now_ms: u64) -> SchedulerPass {
        let mut pass = SchedulerPass::default();
        let mut next_delay: Option<i64> = None;

        for vm in 0..self.runner.max_vms() {
            let status = self.runner.status(vm);
            if !status.is_running() {
                self.last_service_ms[vm] = None;
                continue;
            }

            let elapsed = self.last_service_ms[vm].map_or(0, |last| now_ms.saturating_sub(last));
            self.last_service_ms[vm] = Some(now_ms);
            if status == VmStatus::WaitSync {
                // Frame sync owns the instance; its tick comes from the leader
                continue;
            }
            self.runner.advance_tick(vm, elapsed);

            self.run_due_threads(mem, vm, &mut pass);
            self.run_loop_if_due(mem, vm, &mut pass);

            match self.runner.status(vm) {
                VmStatus::Ok => {
                    if let Some(state) = self.runner.state(vm) {
                        let delay = state.next_wake() as i64 - state.tick as i64;
                        next_delay = Some(next_delay.map_or(delay, |d| d.min(delay)));
                    }
                }
                VmStatus::Error(err) => pass.faulted.push((vm, err)),
                VmStatus::Halt => pass.halted.push(vm),
                _ => {}
            }
        }

        pass.delay_ms = match next_delay {
            None => self.settings.idle_delay_ms,
            Some(delay) if delay <= 0 => {
                self.timing_pressure += 1;
                pass.timing_pressure = true;
                self.settings.yield_quantum_ms
            }
            Some(delay) => delay as u64,
        };
        trace!(
            "[VM-SCHED] Pass at {} ms: {} loops, {} threads, next in {} ms",
            now_ms,
            pass.loops_run,
            pass.threads_run,
            pass.delay_ms
        );
        pass
    }

    fn run_due_threads(&mut self, mem: &mut Allocator, vm: usize, pass: &mut SchedulerPass) {
        let thread_count = self.runner.settings().max_threads;
        for index in 0..thread_count {
            let due = self.runner.state(vm).is_some_and(|state| {
                state
                    .threads
                    .get(index)
                    .is_some_and(|t| t.is_active() && t.tick <= state.tick)
            });
            if !due {
                continue;
            }
            pass.threads_run += 1;
            if self.runner.run(mem, vm, RunMode::Thread(index)) != VmStatus::Ok {
                break;
            }
        }
    }

    fn run_loop_if_due(&mut self, mem: &mut Allocator, vm: usize, pass: &mut SchedulerPass) {
        let due = self
            .runner
            .state(vm)
            .is_some_and(|state| state.loop_tick <= state.tick);
        if !due || self.runner.status(vm) != VmStatus::Ok {
            return;
        }

        pass.loops_run += 1;
        if self.runner.run(mem, vm, RunMode::Loop) != VmStatus::Ok {
            return;
        }

        let behind = self
            .runner
            .state(vm)
            .map(|state| (state.tick, state.loop_tick))
            .filter(|(tick, loop_tick)| loop_tick <= tick);
        if let Some((tick, loop_tick)) = behind {
            self.runner.rebase_loop(vm);
            self.timing_pressure += 1;
            pass.timing_pressure = true;
            if self.timing_pressure % 100 == 1 {
                warn!(
                    "[VM-SCHED] ⚠️ VM {} behind schedule by {} ms (timing pressure {})",
                    vm,
                    tick - loop_tick,
                    self.timing_pressure
                );
            } else {
                debug!("[VM-SCHED] VM {} behind by {} ms", vm, tick - loop_tick);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{CodeBuilder, ImageBuilder};
    use crate::opcode::Opcode;
    use crate::runner::RunnerSettings;
    use sapphire_memory::AllocatorSettings;

    fn scheduler_with(image: &[u8]) -> (Allocator, VmScheduler) {
        let mut mem = Allocator::new(AllocatorSettings::default()).unwrap();
        let mut runner = VmRunner::new(RunnerSettings::default(), [0; 6]).unwrap();
        runner.load(&mut mem, 0, 0, image.len(), image).unwrap();
        runner.load(&mut mem, 0, image.len(), image.len(), &[]).unwrap();
        runner.start(&mut mem, 0).unwrap();
        (mem, VmScheduler::new(runner, SchedulerSettings::default()))
    }

    fn counter() -> Vec<u8> {
        let mut code = CodeBuilder::new();
        code.label("init").op(Opcode::Ret);
        code.label("loop").load(0).push(1).op(Opcode::Add).store(0).op(Opcode::Ret);
        ImageBuilder::new("counter")
            .data(&[0])
            .build(&code, "init", "loop")
            .unwrap()
    }

    #[test]
    fn test_idle_scheduler_returns_idle_delay() {
        let runner = VmRunner::new(RunnerSettings::default(), [0; 6]).unwrap();
        let mut scheduler = VmScheduler::new(runner, SchedulerSettings::default());
        let mut mem = Allocator::new(AllocatorSettings::default()).unwrap();
        let pass = scheduler.service(&mut mem, 0);
        assert_eq!(pass.delay_ms, 100);
        assert_eq!(pass.loops_run, 0);
    }

    #[test]
    fn test_loop_runs_on_interval() {
        let (mut mem, mut scheduler) = scheduler_with(&counter());

        let pass = scheduler.service(&mut mem, 1000);
        assert_eq!(pass.loops_run, 1);
        assert_eq!(pass.delay_ms, 20);

        let pass = scheduler.service(&mut mem, 1010);
        assert_eq!(pass.loops_run, 0);
        assert_eq!(pass.delay_ms, 10);

        let pass = scheduler.service(&mut mem, 1020);
        assert_eq!(pass.loops_run, 1);
        assert_eq!(scheduler.runner().state(0).unwrap().frame_number, 2);
        assert_eq!(scheduler.timing_pressure(), 0);
    }

    #[test]
    fn test_overrun_rebases_loop_and_counts_pressure() {
        let (mut mem, mut scheduler) = scheduler_with(&counter());
        scheduler.service(&mut mem, 0);

        let pass = scheduler.service(&mut mem, 500);
        assert_eq!(pass.loops_run, 1);
        assert!(pass.timing_pressure);
        assert_eq!(scheduler.timing_pressure(), 1);
        let state = scheduler.runner().state(0).unwrap();
        assert_eq!(state.tick, 500);
        assert_eq!(state.loop_tick, 520);
        assert_eq!(pass.delay_ms, 20);
    }

    #[test]
    fn test_thread_wakes_on_delay() {
        let mut code = CodeBuilder::new();
        code.label("init").spawn("worker").op(Opcode::Ret);
        code.label("loop").op(Opcode::Ret);
        code.label("worker")
            .load(0)
            .push(1)
            .op(Opcode::Add)
            .store(0)
            .push(7)
            .op(Opcode::Delay)
            .jmp("worker");
        let image = ImageBuilder::new("worker")
            .data(&[0])
            .build(&code, "init", "loop")
            .unwrap();
        let (mut mem, mut scheduler) = scheduler_with(&image);

        let pass = scheduler.service(&mut mem, 0);
        assert_eq!(pass.threads_run, 1);
        assert_eq!(pass.delay_ms, 7);

        let pass = scheduler.service(&mut mem, 7);
        assert_eq!(pass.threads_run, 1);
        let count = scheduler.runner().data_segment(&mem, 0).unwrap()[0];
        assert_eq!(count, 2);
    }

    #[test]
    fn test_fault_reported_once() {
        let mut code = CodeBuilder::new();
        code.label("init").op(Opcode::Ret);
        code.label("loop").raw(&[0xEE]);
        let image = ImageBuilder::new("bad").build(&code, "init", "loop").unwrap();
        let (mut mem, mut scheduler) = scheduler_with(&image);

        let pass = scheduler.service(&mut mem, 0);
        assert_eq!(pass.faulted.len(), 1);
        assert_eq!(pass.faulted[0].0, 0);

        let pass = scheduler.service(&mut mem, 20);
        assert!(pass.faulted.is_empty());
        assert_eq!(pass.delay_ms, 100);
    }

    #[test]
    fn test_wait_sync_instance_is_frozen() {
        let (mut mem, mut scheduler) = scheduler_with(&counter());
        scheduler.service(&mut mem, 0);
        assert!(scheduler.runner_mut().begin_wait_sync(0));

        let pass = scheduler.service(&mut mem, 100);
        assert_eq!(pass.loops_run, 0);
        assert_eq!(scheduler.runner().state(0).unwrap().tick, 0);
    }
}
