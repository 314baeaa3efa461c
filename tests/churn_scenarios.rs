//! End-to-end churn scenarios against a real directory and a mocked
//! capacity probe: sizing, first tick, counters and concurrent readers.

mod common;

use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use disk_churn::churn::engine::{TickOutcome, slot_file_name};
use proptest::prelude::*;

#[test]
fn help_command_prints_usage() {
    let result = common::run_cli_case("help_command_prints_usage", &["--help"]);
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );
    assert!(
        result.stdout.contains("Usage: dchurn [OPTIONS]"),
        "missing help banner; log: {}",
        result.log_path.display()
    );
}

#[test]
fn zero_file_size_is_rejected_before_start() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("churn");
    let result = common::run_cli_case(
        "zero_file_size_is_rejected_before_start",
        &["-d", target.to_str().unwrap(), "-s", "0", "--no-console"],
    );
    assert!(!result.status.success(), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("max-file-size"), "log: {}", result.log_path.display());
    assert!(!target.exists(), "nothing may touch the disk on bad flags");
}

#[test]
fn first_tick_creates_exactly_one_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = common::started_engine(dir.path(), 1 << 30, 512, Some(10), 11);
    let view = engine.view();
    assert_eq!(view.stats().occupied, 0);

    let outcome = engine.tick().unwrap();
    let TickOutcome::Created(index) = outcome else {
        panic!("first tick on an empty pool must create, got {outcome:?}");
    };

    let stats = view.stats();
    assert_eq!(stats.capacity, 10);
    assert_eq!(stats.occupied, 1);
    assert_eq!(stats.created, 1);
    assert_eq!(stats.removed, 0);

    let path = dir.path().join(slot_file_name(index));
    assert_eq!(fs::metadata(&path).unwrap().len(), 512);
    let slot = view.with_pool(|pool| *pool.get(index).unwrap());
    assert_eq!(slot.size, 512);
    assert!(slot.last_change > 0);
}

#[test]
fn pool_is_sized_from_free_space() {
    let dir = tempfile::tempdir().unwrap();
    let engine = common::started_engine(dir.path(), 4_500, 1_000, None, 1);
    assert_eq!(engine.view().stats().capacity, 5);
}

#[test]
fn stale_files_from_a_previous_run_are_removed() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(slot_file_name(0)), "old").unwrap();
    fs::write(dir.path().join("unrelated.bin"), "old").unwrap();

    let engine = common::started_engine(dir.path(), 1 << 20, 64, Some(2), 3);
    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name != ".lock")
        .collect();
    assert!(leftovers.is_empty(), "left behind: {leftovers:?}");
    assert_eq!(engine.view().stats().occupied, 0);
}

#[test]
fn disk_contents_follow_the_pool() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = common::started_engine(dir.path(), 1 << 20, 100, Some(8), 99);
    for _ in 0..200 {
        engine.tick().unwrap();
    }
    let view = engine.view();
    view.with_pool(|pool| {
        for slot in pool.slots() {
            let path = dir.path().join(slot_file_name(slot.index));
            if slot.is_occupied() {
                assert_eq!(fs::metadata(&path).unwrap().len(), slot.size);
            } else {
                assert!(!path.exists(), "{} should be gone", path.display());
            }
        }
    });
    let stats = view.stats();
    assert_eq!(stats.created - stats.removed, stats.occupied as u64);
    assert_eq!(stats.occupied_bytes, stats.occupied as u64 * 100);
}

#[test]
fn readers_never_see_torn_slots() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = common::started_engine(dir.path(), 1 << 20, 16, Some(64), 5);
    let view = engine.view();
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let view = view.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut checks = 0_u64;
                while !done.load(Ordering::Relaxed) {
                    view.with_pool(|pool| {
                        let bitmap = pool.occupancy_bitmap();
                        for slot in pool.slots() {
                            assert_eq!(bitmap.get(slot.index), slot.size > 0);
                        }
                        assert_eq!(bitmap.count_ones(), pool.occupied_count());
                    });
                    let stats = view.stats();
                    assert_eq!(stats.created - stats.removed, stats.occupied as u64);
                    checks += 1;
                }
                checks
            })
        })
        .collect();

    for _ in 0..500 {
        engine.tick().unwrap();
    }
    done.store(true, Ordering::Relaxed);
    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn counters_only_grow(seed in any::<u64>(), slots in 1_usize..12, ticks in 1_usize..60) {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = common::started_engine(dir.path(), 1 << 20, 8, Some(slots), seed);
        let view = engine.view();
        let mut last = view.stats();
        for _ in 0..ticks {
            engine.tick().unwrap();
            let now = view.stats();
            prop_assert!(now.created >= last.created);
            prop_assert!(now.removed >= last.removed);
            prop_assert_eq!(now.created + now.removed, last.created + last.removed + 1);
            prop_assert!(now.occupied <= now.capacity);
            last = now;
        }
    }
}
