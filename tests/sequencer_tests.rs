//! Multi-worker tests
//!
//! Threads stand in for the forked processes. Barriers and the line buffer
//! live in anonymous shared mappings exactly as they would across a fork

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use ccbench::cache_line::CACHE_LINE_SIZE;
use ccbench::{
    BarrierBank, CacheLineBuffer, Coloring, Config, Scenario, Worker, WorkerReport, Xorshf96,
};

const CORRECTION: u64 = 20;

#[test]
fn test_participant_count_follows_coloring() {
    let bank = BarrierBank::anonymous(4).unwrap();
    assert_eq!(bank.participants(0), Some(4));

    bank.configure(5, Coloring::FirstN(2), 4);
    assert_eq!(bank.participants(5), Some(2));

    bank.configure(6, Coloring::Ids(0b1010), 4);
    assert_eq!(bank.participants(6), Some(2));

    bank.configure(7, Coloring::Custom(|id| id != 0), 4);
    assert_eq!(bank.participants(7), Some(3));

    bank.configure(7, Coloring::All, 4);
    assert_eq!(bank.participants(7), Some(4));

    // Handles beyond the bank are ignored
    bank.configure(16, Coloring::All, 4);
    assert_eq!(bank.participants(16), None);
    bank.wait(16, 0, 4);
}

#[test]
fn test_non_participant_passes_straight_through() {
    let bank = BarrierBank::anonymous(2).unwrap();
    bank.configure(3, Coloring::Ids(0b01), 2);

    // Process 1 is not colored; it must neither block nor count
    bank.wait(3, 1, 2);
    assert_eq!(bank.crossings(3), Some([0, 0, 0]));

    // The single participant crosses alone
    bank.wait(3, 0, 2);
    assert_eq!(bank.crossings(3), Some([0, 1, 1]));
}

#[test]
fn test_barrier_liveness() {
    const THREADS: u32 = 4;
    const ROUNDS: usize = 2000;

    let bank = BarrierBank::anonymous(THREADS).unwrap();
    let done = AtomicU64::new(0);

    thread::scope(|s| {
        for id in 0..THREADS {
            let bank = &bank;
            let done = &done;
            s.spawn(move || {
                for _ in 0..ROUNDS {
                    bank.wait(0, id, THREADS);
                }
                done.fetch_add(1, Ordering::Relaxed);
            });
        }
    });

    assert_eq!(done.load(Ordering::Relaxed), THREADS as u64);
}

#[test]
fn test_barrier_reuse_keeps_rounds_apart() {
    const THREADS: usize = 3;
    const ROUNDS: u64 = 1000;

    let bank = BarrierBank::anonymous(THREADS as u32).unwrap();
    let arrived: Vec<AtomicU64> = (0..THREADS).map(|_| AtomicU64::new(0)).collect();

    thread::scope(|s| {
        for id in 0..THREADS {
            let bank = &bank;
            let arrived = &arrived;
            s.spawn(move || {
                for round in 1..=ROUNDS {
                    arrived[id].store(round, Ordering::SeqCst);
                    bank.wait(2, id as u32, THREADS as u32);

                    // Everybody reached this round, nobody got past the next one
                    for other in arrived.iter() {
                        let seen = other.load(Ordering::SeqCst);
                        assert!(seen >= round, "round {}: peer still at {}", round, seen);
                        assert!(seen <= round + 1, "round {}: peer already at {}", round, seen);
                    }

                    // Until this thread arrives again nobody can leave the first
                    // phase of the next round: the last phase stays full, the
                    // middle one is full or freshly reset, the first one counts
                    // early arrivals only
                    let [first, middle, last] = bank.crossings(2).unwrap();
                    assert!(first < THREADS as u64, "round {}: first phase at {}", round, first);
                    assert!(
                        middle == 0 || middle == THREADS as u64,
                        "round {}: middle phase at {}",
                        round,
                        middle
                    );
                    assert_eq!(last, THREADS as u64, "round {}: last phase reset early", round);
                }
            });
        }
    });
}

#[test]
fn test_subset_barrier_with_bystander() {
    let bank = BarrierBank::anonymous(3).unwrap();
    bank.configure(4, Coloring::FirstN(2), 3);

    thread::scope(|s| {
        for id in 0..2u32 {
            let bank = &bank;
            s.spawn(move || {
                for _ in 0..500 {
                    bank.wait(4, id, 3);
                }
            });
        }
        // ID 2 is outside the coloring and never arrives
        bank.wait(4, 2, 3);
    });
}

fn run_workers(config: &Config) -> Vec<WorkerReport> {
    config.validate().unwrap();

    let bank = BarrierBank::anonymous(config.cores).unwrap();
    let buffer = CacheLineBuffer::anonymous(config).unwrap();
    buffer.prepare(config.scenario);
    let rng = Xorshf96::from_tsc();

    let mut reports: Vec<WorkerReport> = thread::scope(|s| {
        let handles: Vec<_> = (0..config.cores)
            .map(|id| {
                let bank = &bank;
                let buffer = &buffer;
                let rng = rng.clone();
                s.spawn(move || {
                    Worker::new(id, config, bank, buffer, rng)
                        .with_correction(CORRECTION)
                        .run()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    reports.sort_by_key(|r| r.id);
    reports
}

fn config_for(scenario: Scenario, cores: u32, repetitions: u32) -> Config {
    Config {
        cores,
        repetitions,
        scenario,
        stride: 4,
        mem_size: 1024 * CACHE_LINE_SIZE,
        ..Config::default()
    }
}

#[test]
fn test_cas_outcomes_are_complementary() {
    let config = config_for(Scenario::Cas, 2, 100);
    let reports = run_workers(&config);

    let (first, second) = (&reports[0], &reports[1]);
    assert_eq!(first.outcomes.len(), 100);
    assert_eq!(second.outcomes.len(), 100);

    for (rep, (a, b)) in first.outcomes.iter().zip(&second.outcomes).enumerate() {
        assert_ne!(a, b, "repetition {} is not complementary", rep);
    }
    assert_eq!(first.successes(), 100);
    assert_eq!(second.successes(), 0);
    assert_eq!(first.sum, 100);

    // 100 successful toggles bring the line back to 0
    assert_eq!(first.final_word, 0);
}

#[test]
fn test_tas_resets_between_repetitions() {
    let config = config_for(Scenario::Tas, 2, 50);
    let reports = run_workers(&config);

    assert_eq!(reports[0].successes(), 50);
    assert_eq!(reports[1].successes(), 0);
    assert_eq!(reports[1].final_word, 0);
}

#[test]
fn test_every_timed_channel_is_summarized() {
    let config = config_for(Scenario::StoreOnOwned, 3, 40);
    let reports = run_workers(&config);

    assert_eq!(reports[0].summaries.len(), 1);
    let channels: Vec<usize> = reports[1].summaries.iter().map(|(c, _)| *c).collect();
    assert_eq!(channels, vec![0, 1]);
    assert!(reports[1].summaries.iter().all(|(_, s)| s.num_vals == 40));
    // ID 2 only helps
    assert!(reports[2].summaries.is_empty());
}

#[test]
fn test_walking_scenario_with_helpers() {
    let config = config_for(Scenario::LoadFromShared, 4, 64);
    let reports = run_workers(&config);

    for report in &reports[..3] {
        assert_eq!(report.summaries.len(), 1);
        assert_eq!(report.sum, 0, "nobody stores, every load reads 0");
    }
    assert!(reports[3].summaries.is_empty());
}

#[test]
fn test_flushed_store_scenario() {
    let config = Config {
        flush: true,
        ..config_for(Scenario::StoreOnModified, 2, 30)
    };
    let reports = run_workers(&config);
    assert!(reports.iter().all(|r| r.summaries.len() == 1));
}

#[test]
fn test_pointer_chase_single_worker() {
    let config = Config {
        mem_size: 128 * CACHE_LINE_SIZE,
        ..config_for(Scenario::LoadFromMemSize, 1, 5)
    };
    let reports = run_workers(&config);

    let (channel, summary) = &reports[0].summaries[0];
    assert_eq!(*channel, 0);
    assert_eq!(summary.num_vals, 5);
}

#[test]
fn test_cas_on_modified_with_success() {
    let config = Config {
        success: true,
        ..config_for(Scenario::CasOnModified, 2, 60)
    };
    let reports = run_workers(&config);
    assert_eq!(reports[1].successes(), 60);
}
