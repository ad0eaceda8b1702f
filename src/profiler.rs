use log::{info, warn};

use crate::atomics::compiler_barrier;
use crate::config::{
    PFD_CORRECTION_CONF, PFD_CORRECTION_RETRIES, PFD_CORRECTION_SAMPLES, PFD_FALLBACK_CORRECTION,
    PFD_WARMUP_SPINS, PROFILER_CHANNELS,
};
use crate::stats::{summarize, Summary};
use crate::{get_tsc, Timestamp};

/// Per-process interval timer
///
/// Each channel keeps one slot per repetition. `begin` snapshots the counter,
/// `end` snapshots it again and stores the elapsed ticks minus the estimated
/// cost of the two snapshots themselves
pub struct Profiler {
    starts: [Timestamp; PROFILER_CHANNELS],
    store: Vec<Vec<i64>>,
    correction: u64,
}

impl Profiler {
    /// Allocate `capacity` slots per channel and calibrate the correction term
    pub fn initialize(capacity: usize) -> Self {
        let mut profiler = Self::with_correction(capacity, 0);
        profiler.correction = profiler.calibrate();
        assert!(profiler.correction > 0);
        profiler
    }

    /// A profiler with a known correction and no calibration
    pub fn with_correction(capacity: usize, correction: u64) -> Self {
        Self {
            starts: [Timestamp(0); PROFILER_CHANNELS],
            store: vec![vec![0; capacity.max(1)]; PROFILER_CHANNELS],
            correction,
        }
    }

    pub fn correction(&self) -> u64 {
        self.correction
    }

    pub fn capacity(&self) -> usize {
        self.store[0].len()
    }

    #[inline(always)]
    pub fn begin(&mut self, channel: usize) {
        compiler_barrier();
        self.starts[channel] = get_tsc();
    }

    #[inline(always)]
    pub fn end(&mut self, channel: usize, slot: usize) {
        compiler_barrier();
        let stop = get_tsc();
        self.store[channel][slot] = stop.since(self.starts[channel]) - self.correction as i64;
    }

    /// Like `end`, for a region that repeated the measured operation `repeats` times
    #[inline(always)]
    pub fn end_amortized(&mut self, channel: usize, slot: usize, repeats: u64) {
        compiler_barrier();
        let stop = get_tsc();
        let elapsed = stop.since(self.starts[channel]) - self.correction as i64;
        self.store[channel][slot] = elapsed / repeats.max(1) as i64;
    }

    pub fn values(&self, channel: usize) -> &[i64] {
        &self.store[channel]
    }

    pub fn summarize(&self, channel: usize) -> Summary {
        summarize(&self.store[channel])
    }

    /// Estimate the cost of an empty begin/end pair
    ///
    /// A long run of back-to-back snapshots gives a coarse figure first. Then
    /// the real channel is filled with empty regions measured against that
    /// figure, and the residual is added to it. If the spread is too wide the
    /// pass is repeated, and after the last retry a per-platform constant (or
    /// the coarse figure) is used instead
    fn calibrate(&mut self) -> u64 {
        warm_up();

        let coarse = coarse_correction();
        let capacity = self.capacity();
        let mut print_warning = 0;
        let mut tries = PFD_CORRECTION_RETRIES;

        self.correction = coarse;
        loop {
            for slot in 0..capacity {
                self.begin(0);
                compiler_barrier();
                self.end(0, slot);
            }

            let residual = self.summarize(0);
            let (total, std_pp) = refine(coarse, &residual);

            if let Some(correction) = accept(total, std_pp) {
                info!(
                    "set pfd correction: {} (std deviation: {:.1}%, coarse estimate: {})",
                    correction, std_pp, coarse
                );
                return correction;
            }

            print_warning += 1;
            if print_warning == 2 {
                warn!(
                    "avg pfd correction is {:.1} with std deviation: {:.1}%. Recalculating.",
                    total, std_pp
                );
            }

            if tries == 0 {
                break;
            }
            tries -= 1;
        }

        let correction = match PFD_FALLBACK_CORRECTION {
            Some(constant) => constant,
            None => {
                warn!("no default value for pfd correction on this platform, using coarse estimate");
                coarse
            }
        }
        .max(1);

        warn!("setting pfd correction manually: {}", correction);
        correction
    }
}

/// Full cost of an empty region and its spread in percent, from the coarse
/// figure and the residual measured on top of it
fn refine(coarse: u64, residual: &Summary) -> (f64, f64) {
    let total = coarse as f64 + residual.avg;
    let std_pp = if total > 0.0 {
        100.0 * residual.std_dev / total
    } else {
        f64::INFINITY
    };
    (total, std_pp)
}

fn accept(total: f64, std_pp: f64) -> Option<u64> {
    if total > 0.0 && std_pp <= PFD_CORRECTION_CONF {
        Some((total as u64).max(1))
    } else {
        None
    }
}

/// Keep the core busy long enough for frequency scaling to reach its top clock
fn warm_up() {
    let mut speed = 0u64;
    while speed < PFD_WARMUP_SPINS {
        speed = std::hint::black_box(speed) + 1;
    }
}

fn coarse_correction() -> u64 {
    let mut total = 0u64;
    for _ in 0..PFD_CORRECTION_SAMPLES {
        compiler_barrier();
        let start = get_tsc();
        compiler_barrier();
        let end = get_tsc();
        total = total.wrapping_add(end.0.wrapping_sub(start.0));
    }
    (total as f64 / PFD_CORRECTION_SAMPLES as f64) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn residual_adds_to_coarse_estimate() {
        let residual = summarize(&[3; 200]);
        let (total, std_pp) = refine(20, &residual);
        assert_eq!(total, 23.0);
        assert_eq!(std_pp, 0.0);
        assert_eq!(accept(total, std_pp), Some(23));
    }

    #[test]
    fn zero_residual_keeps_coarse_estimate() {
        let residual = summarize(&[0; 50]);
        let (total, std_pp) = refine(17, &residual);
        assert_eq!(accept(total, std_pp), Some(17));
    }

    #[test]
    fn wide_spread_is_rejected() {
        let residual = summarize(&[0, 40, 0, 40, 0, 40]);
        let (total, std_pp) = refine(10, &residual);
        assert!(std_pp > PFD_CORRECTION_CONF);
        assert_eq!(accept(total, std_pp), None);
    }

    #[test]
    fn nothing_measured_is_rejected() {
        let residual = summarize(&[0; 10]);
        let (total, std_pp) = refine(0, &residual);
        assert_eq!(accept(total, std_pp), None);
    }
}
