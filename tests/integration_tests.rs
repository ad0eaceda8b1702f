//! Integration tests for ccbench
//!
//! These tests exercise the timing, statistics and buffer layout through the
//! public API

use std::sync::atomic::Ordering;

use ccbench::cache_line::{CacheLine, CACHE_LINE_SIZE};
use ccbench::ops::{Op, OpEnv, Target, Untimed};
use ccbench::shm::SharedRegion;
use ccbench::stats::summarize;
use ccbench::{get_tsc, CacheLineBuffer, Config, FenceLevel, Profiler, Scenario, Xorshf96};

#[test]
fn test_get_tsc_basic() {
    let tsc = get_tsc();
    assert!(tsc.0 > 0, "TSC should return a non-zero value");
}

#[test]
fn test_get_tsc_increases_over_time() {
    let start = get_tsc();

    // Do some work to let time pass
    let mut sum = 0u64;
    for i in 0..10000 {
        sum = sum.wrapping_add(i);
    }
    std::hint::black_box(sum);

    let end = get_tsc();
    assert!(
        end.0 > start.0,
        "TSC should increase over time: start={}, end={}",
        start.0,
        end.0
    );
    assert!(end.since(start) > 0);
}

#[test]
fn test_profiler_correction_positive() {
    for capacity in [1, 1000] {
        let profiler = Profiler::initialize(capacity);
        assert!(
            profiler.correction() > 0,
            "correction should be positive for capacity {}",
            capacity
        );
        assert_eq!(profiler.capacity(), capacity);
    }
}

#[test]
fn test_profiler_records_into_slot() {
    let mut profiler = Profiler::with_correction(4, 0);
    profiler.begin(1);
    std::hint::black_box(0u64);
    profiler.end(1, 2);

    assert!(profiler.values(1)[2] >= 0);
    assert_eq!(profiler.values(1)[0], 0);
    assert!(profiler.values(0).iter().all(|&v| v == 0));
}

#[test]
fn test_summary_of_constant_sequence() {
    let vals = vec![120i64; 500];
    let ad = summarize(&vals);

    assert_eq!(ad.num_vals, 500);
    assert_eq!(ad.avg, 120.0);
    assert_eq!(ad.min_val, 120.0);
    assert_eq!(ad.max_val, 120.0);
    assert_eq!(ad.abs_dev, 0.0);
    assert_eq!(ad.std_dev, 0.0);
    assert_eq!(ad.bands[0].count, 500);
    for band in &ad.bands {
        assert_eq!(band.abs_dev, 0.0);
        assert_eq!(band.std_dev, 0.0);
    }
}

#[test]
fn test_summary_clamps_glitches() {
    let ad = summarize(&[10, 10, 20_000, 10]);
    assert_eq!(ad.num_vals, 4);
    assert_eq!(ad.avg, 7.5);
    assert_eq!(ad.min_val, 0.0);
    assert_eq!(ad.min_idx, 2);

    let ad = summarize(&[-3, 9, 9]);
    assert_eq!(ad.avg, 6.0);
    assert_eq!(ad.min_idx, 0);
    assert_eq!(ad.max_val, 9.0);
    assert_eq!(ad.max_idx, 1);
}

#[test]
fn test_summary_bands_partition_values() {
    // avg = 100; deviations 0, 5, 20, 40, 60, 100
    let vals = [100, 105, 80, 140, 40, 200, 100, 35];
    let ad = summarize(&vals);

    let total: u64 = ad.bands.iter().map(|b| b.count).sum();
    assert_eq!(total, vals.len() as u64);
    assert_eq!(ad.avg, 100.0);
    assert_eq!(ad.bands[0].count, 3);
    assert_eq!(ad.bands[1].count, 1);
    assert_eq!(ad.bands[2].count, 1);
    assert_eq!(ad.bands[3].count, 2);
    assert_eq!(ad.bands[4].count, 1);
    assert_eq!(ad.bands[4].avg, 200.0);
    assert_eq!(ad.bands[4].std_dev, 0.0);
}

#[test]
fn test_summary_min_and_max_on_rising_input() {
    let ad = summarize(&[1, 2, 3, 4]);
    assert_eq!(ad.min_val, 1.0);
    assert_eq!(ad.min_idx, 0);
    assert_eq!(ad.max_val, 4.0);
    assert_eq!(ad.max_idx, 3);
}

#[test]
fn test_summary_of_empty_sequence() {
    let ad = summarize(&[]);
    assert_eq!(ad.num_vals, 0);
    assert_eq!(ad.avg, 0.0);
    assert!(ad.bands.iter().all(|b| b.count == 0 && b.avg == 0.0));
}

#[test]
fn test_selector_unit_stride() {
    let mut rng = Xorshf96::from_tsc();
    for _ in 0..1000 {
        assert_eq!(rng.offset(1), 0);
    }
}

#[test]
fn test_selector_stays_in_window() {
    let mut rng = Xorshf96::from_tsc();
    let mut seen_nonzero = false;
    for _ in 0..10_000 {
        let offset = rng.offset(2048);
        assert!(offset < 2048);
        seen_nonzero |= offset != 0;
    }
    assert!(seen_nonzero);
}

fn small_config(scenario: Scenario, lines: usize) -> Config {
    Config {
        scenario,
        stride: 4,
        mem_size: lines * CACHE_LINE_SIZE,
        ..Config::default()
    }
}

#[test]
fn test_prepare_zeroes_lines() {
    let config = small_config(Scenario::StoreOnModified, 32);
    let buffer = CacheLineBuffer::anonymous(&config).unwrap();
    for line in buffer.lines() {
        line.word0().store(77, Ordering::Relaxed);
    }

    buffer.prepare(config.scenario);
    assert_eq!(buffer.len(), 32);
    assert!(buffer.lines().iter().all(|l| l.word0().load(Ordering::Relaxed) == 0));
}

#[test]
fn test_prepare_clears_stale_links() {
    let config = small_config(Scenario::LoadFromMemSize, 64);
    let buffer = CacheLineBuffer::anonymous(&config).unwrap();
    buffer.prepare(Scenario::LoadFromMemSize);

    // Leftovers of a pointer-chasing run, plus junk in the upper words
    for line in buffer.lines() {
        line.words[15].store(0xDEAD_BEEF, Ordering::Relaxed);
    }

    buffer.prepare(Scenario::StoreOnModified);
    for (i, line) in buffer.lines().iter().enumerate() {
        for (w, word) in line.words.iter().enumerate() {
            assert_eq!(word.load(Ordering::Relaxed), 0, "line {} word {} not cleared", i, w);
        }
    }
}

#[test]
fn test_chase_list_is_single_cycle() {
    let lines = 257;
    let config = small_config(Scenario::LoadFromMemSize, lines);
    let buffer = CacheLineBuffer::anonymous(&config).unwrap();
    buffer.prepare(Scenario::LoadFromMemSize);

    let all = buffer.lines();
    let base = all.as_ptr() as u64;
    let mut visited = vec![false; lines];
    let mut idx = 0usize;

    for hop in 0..lines {
        assert!(!visited[idx], "line {} visited twice (hop {})", idx, hop);
        visited[idx] = true;

        let next = all[idx].link().load(Ordering::Relaxed);
        assert!(next >= base && next < base + (lines * CACHE_LINE_SIZE) as u64);
        assert_eq!((next - base) % CACHE_LINE_SIZE as u64, 0);
        idx = ((next - base) / CACHE_LINE_SIZE as u64) as usize;
    }

    assert_eq!(idx, 0, "the list should close on the first line");
    assert!(visited.iter().all(|&v| v));
}

#[test]
fn test_named_segment_attaches_to_existing() {
    let name = format!("/ccbench_test_segment_{}", std::process::id());

    let first = SharedRegion::create_or_attach(&name, 4096).unwrap();
    // Second open finds the segment and grows it to the larger size
    let second = SharedRegion::create_or_attach(&name, 8192).unwrap();
    first.unlink();

    unsafe {
        first.as_ptr().write_volatile(0x5A);
        second.as_ptr().add(100).write_volatile(0xA5);

        assert_eq!(second.as_ptr().read_volatile(), 0x5A);
        assert_eq!(first.as_ptr().add(100).read_volatile(), 0xA5);
        assert_eq!(second.as_ptr().add(8000).read_volatile(), 0);
    }
}

fn store_env(lines: &[CacheLine], base: usize, level: u32) -> OpEnv<'_> {
    OpEnv {
        lines,
        base,
        stride: 1,
        fence: FenceLevel::from_level(level),
        id: 0,
        rep: 7,
    }
}

#[test]
fn test_double_write_store_hits_next_line() {
    let config = small_config(Scenario::StoreOnModified, 16);
    let buffer = CacheLineBuffer::anonymous(&config).unwrap();
    buffer.prepare(config.scenario);
    let lines = buffer.lines();
    let mut rng = Xorshf96::from_tsc();

    store_env(lines, 0, 9).execute(Op::Store(Target::Fixed), &mut rng, &mut Untimed);
    assert_eq!(lines[0].word0().load(Ordering::Relaxed), 7);
    assert_eq!(lines[1].word0().load(Ordering::Relaxed), 7);
    assert_eq!(lines[2].word0().load(Ordering::Relaxed), 0);

    // Any other level leaves the neighbour alone
    for level in 0..9 {
        store_env(lines, 4, level).execute(Op::Store(Target::Fixed), &mut rng, &mut Untimed);
        assert_eq!(lines[4].word0().load(Ordering::Relaxed), 7, "level {}", level);
        assert_eq!(lines[5].word0().load(Ordering::Relaxed), 0, "level {}", level);
    }
}

#[test]
fn test_double_write_store_on_last_line() {
    let config = small_config(Scenario::StoreOnModified, 16);
    let buffer = CacheLineBuffer::anonymous(&config).unwrap();
    buffer.prepare(config.scenario);
    let lines = buffer.lines();
    let mut rng = Xorshf96::from_tsc();

    store_env(lines, 15, 9).execute(Op::Store(Target::Fixed), &mut rng, &mut Untimed);
    assert_eq!(lines[15].word0().load(Ordering::Relaxed), 7);
    assert_eq!(lines[14].word0().load(Ordering::Relaxed), 0);
}
