// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Command layer scenarios across loader, runner and scheduler

use sapphire_memory::{Allocator, AllocatorSettings, MemType};
use sapphire_vm::{
    hash32, CodeBuilder, ImageBuilder, Opcode, RunMode, RunnerError, RunnerSettings,
    SchedulerSettings, VmError, VmRunner, VmScheduler, VmStatus,
};

fn heap() -> Allocator {
    Allocator::new(AllocatorSettings {
        heap_size: 8192,
        max_handles: 32,
        defrag_threshold: 128,
    })
    .unwrap()
}

fn runner(budget: usize) -> VmRunner {
    VmRunner::new(
        RunnerSettings {
            image_budget: budget,
            ..RunnerSettings::default()
        },
        [0x02, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE],
    )
    .unwrap()
}

/// Loop program that mixes the RNG into a running hash so any divergence shows up in data
fn rainbow() -> Vec<u8> {
    let mut code = CodeBuilder::new();
    code.label("init").push(3).store(1).op(Opcode::Ret);
    code.label("loop")
        .load(0)
        .push(31)
        .op(Opcode::Mul)
        .op(Opcode::Rand)
        .op(Opcode::Add)
        .store(0)
        .load(2)
        .push(1)
        .op(Opcode::Add)
        .store(2)
        .op(Opcode::Ret);
    ImageBuilder::new("rainbow")
        .data(&[0, 0, 0, 0])
        .publish("frames", 2)
        .build(&code, "init", "loop")
        .unwrap()
}

fn load_in_chunks(mem: &mut Allocator, runner: &mut VmRunner, vm: usize, image: &[u8], chunk: usize) {
    for (i, piece) in image.chunks(chunk).enumerate() {
        runner.load(mem, vm, i * chunk, image.len(), piece).unwrap();
    }
    runner.load(mem, vm, image.len(), image.len(), &[]).unwrap();
}

#[test]
fn test_budget_exceeded_rejected_before_copy() {
    let mut mem = heap();
    let mut runner = runner(512);
    let image = rainbow();
    load_in_chunks(&mut mem, &mut runner, 0, &image, 16);
    let before = mem.stats();

    let oversized = vec![0xAB; 64];
    let err = runner.load(&mut mem, 1, 0, 512, &oversized).unwrap_err();
    assert!(matches!(err, RunnerError::BudgetExceeded { budget: 512, .. }));

    // Nothing was allocated or written for the rejected slot
    assert_eq!(mem.stats().used_space, before.used_space);
    assert_eq!(mem.stats().alloc_attempts, before.alloc_attempts);
    assert_eq!(runner.status(1), VmStatus::NotRunning);
}

#[test]
fn test_chunk_past_block_rejected_without_writing() {
    let mut mem = heap();
    let mut runner = runner(4096);
    let image = rainbow();
    runner.load(&mut mem, 0, 0, image.len(), &image[..32]).unwrap();

    let err = runner
        .load(&mut mem, 0, image.len() - 4, image.len(), &[0xFF; 8])
        .unwrap_err();
    assert!(matches!(err, RunnerError::ChunkOutOfBounds { .. }));
    mem.check_canaries();
}

#[test]
fn test_loop_on_ready_instance_changes_nothing() {
    let mut mem = heap();
    let mut runner = runner(4096);
    load_in_chunks(&mut mem, &mut runner, 0, &rainbow(), 24);

    let state = runner.state(0).cloned();
    let data = runner.data_segment(&mem, 0).map(<[u8]>::to_vec);
    let stats = mem.stats();

    assert_eq!(runner.run(&mut mem, 0, RunMode::Loop), VmStatus::Ok);

    assert_eq!(runner.status(0), VmStatus::Ready);
    assert_eq!(runner.state(0).cloned(), state);
    assert_eq!(runner.data_segment(&mem, 0).map(<[u8]>::to_vec), data);
    assert_eq!(mem.stats(), stats);
}

#[test]
fn test_identical_nodes_stay_identical() {
    let image = rainbow();
    let mut nodes: Vec<(Allocator, VmScheduler)> = (0..2)
        .map(|_| {
            let mut mem = heap();
            let mut runner = runner(4096);
            load_in_chunks(&mut mem, &mut runner, 0, &image, 40);
            runner.start(&mut mem, 0).unwrap();
            (mem, VmScheduler::new(runner, SchedulerSettings::default()))
        })
        .collect();

    for now in (0..1000).step_by(20) {
        for (mem, scheduler) in nodes.iter_mut() {
            scheduler.service(mem, now);
        }
    }

    let (mem_a, sched_a) = &nodes[0];
    let (mem_b, sched_b) = &nodes[1];
    assert_eq!(
        sched_a.runner().data_hash(mem_a, 0),
        sched_b.runner().data_hash(mem_b, 0)
    );
    assert_eq!(
        sched_a.runner().published(mem_a, 0, hash32("frames")),
        Some(50)
    );
    assert_eq!(
        sched_a.runner().checkpoints(0).unwrap().latest(8),
        sched_b.runner().checkpoints(0).unwrap().latest(8)
    );
}

#[test]
fn test_faulty_instance_isolated() {
    let mut mem = heap();
    let mut runner = runner(4096);
    load_in_chunks(&mut mem, &mut runner, 0, &rainbow(), 64);

    let mut code = CodeBuilder::new();
    code.label("init").op(Opcode::Ret);
    code.label("loop").load(100).op(Opcode::Ret);
    let bad = ImageBuilder::new("bad").data(&[0]).build(&code, "init", "loop").unwrap();
    load_in_chunks(&mut mem, &mut runner, 1, &bad, 64);

    runner.start(&mut mem, 0).unwrap();
    runner.start(&mut mem, 1).unwrap();
    let mut scheduler = VmScheduler::new(runner, SchedulerSettings::default());
    let pass = scheduler.service(&mut mem, 0);

    assert_eq!(pass.faulted, vec![(1, VmError::DataOutOfRange { addr: 100 })]);
    assert_eq!(scheduler.runner().status(0), VmStatus::Ok);
    assert_eq!(scheduler.runner().status(1).code(), -6);
    assert_eq!(mem.stats().handles_used, 1);
}

#[test]
fn test_reload_replaces_program_and_frees_old_image() {
    let mut mem = heap();
    let mut runner = runner(4096);
    load_in_chunks(&mut mem, &mut runner, 0, &rainbow(), 64);
    runner.start(&mut mem, 0).unwrap();
    let filler = mem.alloc(100, MemType::SCRATCH).unwrap();

    load_in_chunks(&mut mem, &mut runner, 0, &rainbow(), 64);
    assert_eq!(runner.status(0), VmStatus::Ready);
    assert_eq!(mem.stats().handles_used, 2);
    // The old image block is reused in place for the identical new one
    assert_eq!(mem.stats().dirty_space, 0);
    assert!(mem.stats().is_conserved());

    mem.free(filler);
    mem.collect();
    runner.start(&mut mem, 0).unwrap();
    assert_eq!(runner.run(&mut mem, 0, RunMode::Loop), VmStatus::Ok);
}

#[test]
fn test_chunk_gap_rejected() {
    let mut mem = heap();
    let mut runner = runner(4096);
    let image = rainbow();
    assert!(image.len() > 44);
    runner.load(&mut mem, 0, 0, image.len(), &image[..32]).unwrap();

    // Skipping bytes 32..44 leaves a hole that would read back as NOPs
    let err = runner
        .load(&mut mem, 0, 44, image.len(), &image[44..])
        .unwrap_err();
    assert!(matches!(err, RunnerError::ChunkOutOfOrder { expected: 32, offset: 44 }));
    assert!(matches!(
        runner.load(&mut mem, 0, image.len(), image.len(), &[]),
        Err(RunnerError::Incomplete { received: 32, .. })
    ));
    assert_eq!(runner.status(0), VmStatus::NotRunning);
    assert_eq!(mem.stats().handles_used, 0);

    // Resending a chunk is rejected the same way
    runner.load(&mut mem, 0, 0, image.len(), &image[..32]).unwrap();
    assert!(runner.load(&mut mem, 0, 16, image.len(), &image[16..32]).is_err());
    runner.load(&mut mem, 0, 32, image.len(), &image[32..]).unwrap();
    runner.load(&mut mem, 0, image.len(), image.len(), &[]).unwrap();
    assert_eq!(runner.status(0), VmStatus::Ready);
}

/// Loop does nothing; `bump` adds 10 to word 1 when called as an event callback
fn with_callback() -> (Vec<u8>, u16) {
    let mut code = CodeBuilder::new();
    code.label("init").op(Opcode::Ret);
    code.label("loop").op(Opcode::Ret);
    let bump = code.here() as u16;
    code.label("bump")
        .load(1)
        .push(10)
        .op(Opcode::Add)
        .store(1)
        .op(Opcode::Ret);
    let image = ImageBuilder::new("callback")
        .data(&[0, 5])
        .publish("level", 1)
        .build(&code, "init", "loop")
        .unwrap();
    (image, bump)
}

#[test]
fn test_func_mode_runs_callback() {
    let mut mem = heap();
    let mut runner = runner(4096);
    let (image, bump) = with_callback();
    load_in_chunks(&mut mem, &mut runner, 0, &image, 32);

    // Not started yet: no-op
    let before = runner.state(0).cloned();
    assert_eq!(runner.run(&mut mem, 0, RunMode::Func(bump)), VmStatus::Ok);
    assert_eq!(runner.status(0), VmStatus::Ready);
    assert_eq!(runner.state(0).cloned(), before);
    assert_eq!(runner.published(&mem, 0, hash32("level")), Some(5));

    runner.start(&mut mem, 0).unwrap();
    assert_eq!(runner.run(&mut mem, 0, RunMode::Func(bump)), VmStatus::Ok);
    assert_eq!(runner.run(&mut mem, 0, RunMode::Func(bump)), VmStatus::Ok);
    assert_eq!(runner.published(&mem, 0, hash32("level")), Some(25));
    // Callbacks are not loop frames
    assert_eq!(runner.state(0).unwrap().frame_number, 0);
}

#[test]
fn test_func_mode_outside_code_faults() {
    let mut mem = heap();
    let mut runner = runner(4096);
    let (image, _) = with_callback();
    load_in_chunks(&mut mem, &mut runner, 0, &image, 32);
    runner.start(&mut mem, 0).unwrap();
    assert_eq!(mem.stats().handles_used, 1);

    let status = runner.run(&mut mem, 0, RunMode::Func(0x4000));
    assert_eq!(status, VmStatus::Error(VmError::JumpOutOfCode { pc: 0x4000 }));
    assert_eq!(runner.status(0), status);
    assert_eq!(mem.stats().handles_used, 0);
    assert_eq!(runner.published(&mem, 0, hash32("level")), None);
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        /// Arbitrary loop bodies either keep running or fault cleanly; the heap survives both
        #[test]
        fn prop_arbitrary_code_never_corrupts_heap(body in prop::collection::vec(any::<u8>(), 0..64)) {
            let mut code = CodeBuilder::new();
            code.label("init").op(Opcode::Ret);
            code.label("loop").raw(&body).op(Opcode::Ret);
            let built = ImageBuilder::new("fuzz").data(&[0, 0]).build(&code, "init", "loop");
            prop_assume!(built.is_ok());
            let image = built.unwrap();

            let mut mem = heap();
            let mut runner = runner(4096);
            load_in_chunks(&mut mem, &mut runner, 0, &image, 32);
            prop_assert!(runner.start(&mut mem, 0).is_ok());
            let mut scheduler = VmScheduler::new(runner, SchedulerSettings::default());
            for now in (0..200).step_by(20) {
                scheduler.service(&mut mem, now);
            }

            let status = scheduler.runner().status(0);
            match status {
                VmStatus::Ok | VmStatus::Halt => prop_assert_eq!(mem.stats().handles_used, 1),
                VmStatus::Error(err) => {
                    prop_assert!(err.code() < 0);
                    prop_assert_eq!(mem.stats().handles_used, 0);
                }
                other => prop_assert!(false, "unexpected status {}", other),
            }
            prop_assert!(mem.stats().is_conserved());
            prop_assert!(mem.try_check_canaries().is_ok());
        }
    }
}
