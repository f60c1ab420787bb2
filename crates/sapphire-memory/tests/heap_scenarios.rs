// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

use sapphire_memory::{Allocator, AllocatorSettings, MemType, MemoryError};

const TYPE_A: MemType = MemType(0x41);
const TYPE_B: MemType = MemType(0x42);

fn heap_of(size: usize) -> Allocator {
    Allocator::new(AllocatorSettings {
        heap_size: size,
        ..AllocatorSettings::default()
    })
    .unwrap()
}

#[test]
fn test_freed_slot_reused_without_collection() {
    let mut mem = heap_of(10_000);

    let h1 = mem.alloc(100, TYPE_A).unwrap();
    let h2 = mem.alloc(200, TYPE_B).unwrap();
    mem.free(h1);
    let h3 = mem.alloc(50, TYPE_A).unwrap();

    // The lowest free slot is h1's, not a fresh one past h2
    assert_eq!(h3, h1);
    assert_ne!(h3, h2);

    let stats = mem.stats();
    assert_eq!(stats.dirty_space, 0);
    assert_eq!(stats.used_space, 112 + 212);
    assert_eq!(stats.data_space, 250);
    assert_eq!(stats.handles_used, 2);
    assert_eq!(stats.gc_runs, 0);
    assert!(stats.is_conserved());

    assert_eq!(mem.size(h3), 50);
    assert_eq!(mem.mem_type(h3).unwrap(), TYPE_A);
    assert_eq!(mem.mem_type(h2).unwrap(), TYPE_B);
    mem.check_canaries();
}

#[test]
fn test_exhaustion_then_collect_recovers_space() {
    let mut mem = heap_of(1024);
    let mut handles = Vec::new();
    while let Ok(handle) = mem.alloc(120, MemType::SCRATCH) {
        handles.push(handle);
    }
    assert!(handles.len() >= 7);
    let stats = mem.stats();
    assert!(stats.alloc_failures >= 1);

    // Free every other block; the holes are too small for a 300 byte request
    for handle in handles.iter().step_by(2) {
        mem.free(*handle);
    }
    assert!(matches!(
        mem.alloc(300, MemType::SCRATCH),
        Err(MemoryError::OutOfSpace { .. })
    ));

    mem.collect();
    let big = mem.alloc(300, MemType::SCRATCH).unwrap();
    assert_eq!(mem.size(big), 300);
    for handle in handles.iter().skip(1).step_by(2) {
        assert!(mem.is_valid(*handle));
    }
    assert!(mem.stats().is_conserved());
}

#[test]
fn test_realloc_survives_collection() {
    let mut mem = heap_of(2048);
    let keep = mem.alloc(32, MemType::VM_IMAGE).unwrap();
    let gap = mem.alloc(64, MemType::SCRATCH).unwrap();
    mem.get_mut(keep).copy_from_slice(&[7u8; 32]);
    mem.free(gap);

    mem.realloc(keep, 96).unwrap();
    mem.collect();

    assert_eq!(&mem.get(keep)[..32], &[7u8; 32]);
    assert_eq!(mem.size(keep), 96);
    assert_eq!(mem.stats().handles_used, 1);
    assert!(mem.stats().is_conserved());
}

#[test]
fn test_stats_serialize() {
    let mut mem = heap_of(1024);
    mem.alloc(10, MemType::SCRATCH).unwrap();
    let json = serde_json::to_value(mem.stats()).unwrap();
    assert_eq!(json["heap_size"], 1024);
    assert_eq!(json["handles_used"], 1);
}
