use std::sync::atomic::Ordering;

use log::debug;

use crate::atomics::{flush_line, full_fence};
use crate::barrier::BarrierBank;
use crate::cache_line::CacheLineBuffer;
use crate::config::Config;
use crate::ops::{OpEnv, Timed, Untimed};
use crate::profiler::Profiler;
use crate::scenario::{Step, WriteValue, WriteWhen};
use crate::stats::Summary;
use crate::xorshift::Xorshf96;

/// Opens and closes every repetition, and orders the per-core reports
pub const REPETITION_BARRIER: usize = 0;
/// Everyone has reported; the leader may interpret
pub const REPORT_BARRIER: usize = 11;

/// Only the first three processes report
const REPORTING_IDS: u32 = 3;

/// One cooperating process of a run
pub struct Worker<'a> {
    id: u32,
    config: &'a Config,
    barriers: &'a BarrierBank,
    buffer: &'a CacheLineBuffer,
    rng: Xorshf96,
    correction: Option<u64>,
}

/// What a worker measured and computed
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub id: u32,
    /// Summary per timed channel, ascending by channel
    pub summaries: Vec<(usize, Summary)>,
    /// Sum of the values returned by the operations
    pub sum: u64,
    /// Success of every CAS and TAS, in issue order
    pub outcomes: Vec<bool>,
    /// Word 0 of the base line after the last repetition
    pub final_word: u32,
}

impl WorkerReport {
    pub fn successes(&self) -> usize {
        self.outcomes.iter().filter(|&&ok| ok).count()
    }
}

impl<'a> Worker<'a> {
    /// `rng` should be cloned from one generator seeded before the fork, so
    /// that all workers draw the same line offsets
    pub fn new(
        id: u32,
        config: &'a Config,
        barriers: &'a BarrierBank,
        buffer: &'a CacheLineBuffer,
        rng: Xorshf96,
    ) -> Self {
        Self {
            id,
            config,
            barriers,
            buffer,
            rng,
            correction: None,
        }
    }

    /// Skip calibration and use a known profiler correction
    pub fn with_correction(mut self, correction: u64) -> Self {
        self.correction = Some(correction);
        self
    }

    #[inline(always)]
    fn cross(&self, handle: usize) {
        full_fence();
        self.barriers.wait(handle, self.id, self.config.cores);
        full_fence();
    }

    fn new_profiler(&self) -> Profiler {
        let capacity = self.config.repetitions as usize;
        match self.correction {
            Some(correction) => Profiler::with_correction(capacity, correction),
            None => Profiler::initialize(capacity),
        }
    }

    fn should_write(&self, when: WriteWhen) -> bool {
        match when {
            WriteWhen::Always => true,
            WriteWhen::SuccessSet => self.config.success,
            WriteWhen::SuccessUnset => !self.config.success,
        }
    }

    /// Run every repetition of the configured scenario, then report
    pub fn run(&mut self) -> WorkerReport {
        let config = self.config;
        let scenario = config.scenario;
        let script = scenario.script(self.id);
        let channels = scenario.timed_channels(self.id);
        let buffer = self.buffer;
        let lines = buffer.lines();

        debug!("worker {} runs {} with {} steps", self.id, scenario, script.len());

        self.cross(REPETITION_BARRIER);
        let mut profiler = if channels.is_empty() {
            None
        } else {
            Some(self.new_profiler())
        };
        self.cross(REPETITION_BARRIER);

        let advance = scenario.walks_buffer() && !config.flush;
        let mut base = 0usize;
        let mut last_base = 0usize;
        let mut sum = 0u64;
        let mut outcomes = Vec::new();

        for rep in 0..config.repetitions as usize {
            if config.flush {
                full_fence();
                flush_line(lines[base].as_ptr());
                full_fence();
            }

            self.cross(REPETITION_BARRIER);

            let env = OpEnv {
                lines,
                base,
                stride: config.stride,
                fence: config.fence,
                id: self.id,
                rep: rep as u64,
            };

            for step in script {
                let effect = match *step {
                    Step::Timed { op, channel } => match profiler.as_mut() {
                        Some(profiler) => {
                            let mut meter = Timed {
                                profiler,
                                channel,
                                slot: rep,
                            };
                            env.execute(op, &mut self.rng, &mut meter)
                        }
                        None => env.execute(op, &mut self.rng, &mut Untimed),
                    },
                    Step::Helper(op) => env.execute(op, &mut self.rng, &mut Untimed),
                    Step::Cross(handle) => {
                        self.cross(handle);
                        continue;
                    }
                    Step::Write { value, when } => {
                        if self.should_write(when) {
                            let value = match value {
                                WriteValue::Zero => 0,
                                WriteValue::Ones => u32::MAX,
                                WriteValue::Parity => (rep & 1) as u32,
                            };
                            full_fence();
                            lines[base].word0().store(value, Ordering::Relaxed);
                            full_fence();
                        }
                        continue;
                    }
                };

                sum = sum.wrapping_add(effect.value);
                if let Some(ok) = effect.success {
                    outcomes.push(ok);
                }
            }

            last_base = base;
            if advance {
                base += config.stride as usize;
            }

            self.cross(REPETITION_BARRIER);
        }

        let summaries: Vec<(usize, Summary)> = match &profiler {
            Some(profiler) => channels
                .iter()
                .map(|&channel| (channel, profiler.summarize(channel)))
                .collect(),
            None => Vec::new(),
        };

        // One report per turn, in ID order
        for turn in 0..config.cores {
            if turn == self.id && self.id < REPORTING_IDS {
                if let Some(profiler) = &profiler {
                    self.print_report(profiler, &summaries);
                }
            }
            self.cross(REPETITION_BARRIER);
        }

        self.cross(REPORT_BARRIER);

        if self.id == 0 {
            for line in scenario.interpretation(config) {
                println!("{}", line);
            }
        }

        self.cross(REPETITION_BARRIER);

        let final_word = lines[last_base].word0().load(Ordering::Relaxed);
        if self.id < REPORTING_IDS {
            println!(" value of cl is {:<10} / sum is {}", final_word, sum);
        }

        WorkerReport {
            id: self.id,
            summaries,
            sum,
            outcomes,
            final_word,
        }
    }

    fn print_report(&self, profiler: &Profiler, summaries: &[(usize, Summary)]) {
        let print = if self.config.verbose {
            (self.config.print_count as usize).min(profiler.capacity())
        } else {
            0
        };

        println!(" *** Core {:2} {}", self.id, "*".repeat(84));
        for (channel, summary) in summaries {
            let raw: Vec<String> = profiler.values(*channel)[..print]
                .iter()
                .enumerate()
                .map(|(i, v)| format!("[{:3}: {:4}] ", i, v))
                .collect();
            if !raw.is_empty() {
                println!("{}", raw.concat());
            }
            print!("{}", summary);
        }
    }
}
