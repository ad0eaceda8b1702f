use anyhow::{bail, ensure, Context, Result};

use crate::cache_line::CACHE_LINE_SIZE;
use crate::scenario::Scenario;

/// Number of barrier slots in the shared bank
pub const NUM_BARRIERS: usize = 16;

/// The bank is never mapped smaller than this
pub const BARRIER_MEM_MIN_SIZE: usize = 8192;

/// Name of the shared-memory segment holding the barrier bank
pub const BARRIER_MEM_NAME: &str = "/ccbench_barrier_mem";

/// Name of the shared-memory segment holding the coherence target buffer
pub const CACHE_LINE_MEM_NAME: &str = "/ccbench_cache_line";

/// Default number of cache lines in the target buffer (power of 2)
pub const CACHE_LINE_NUM: usize = 1024 * 1024;

pub const DEFAULT_CORES: u32 = 2;
pub const DEFAULT_REPS: u32 = 10000;
pub const DEFAULT_TEST: u32 = 0;
pub const DEFAULT_CORE1: usize = 0;
pub const DEFAULT_CORE2: usize = 1;
pub const DEFAULT_CORE3: usize = 2;
pub const DEFAULT_CORE_OTHERS: usize = 0;
pub const DEFAULT_PRINT: u32 = 100;
pub const DEFAULT_STRIDE: u32 = 2048;
pub const DEFAULT_FENCE: u32 = 0;

/// Number of timing channels each profiler carries
pub const PROFILER_CHANNELS: usize = 2;

/// Measurements above this many cycles are treated as glitches
pub const PFD_VAL_UP_LIMIT: i64 = 1500;

/// Back-to-back start/stop pairs sampled for the coarse correction estimate
pub const PFD_CORRECTION_SAMPLES: u32 = 1_000_000;

/// Maximum acceptable std deviation of the correction, in percent of its average
pub const PFD_CORRECTION_CONF: f64 = 3.0;

/// Extra calibration passes before giving up on a stable correction
pub const PFD_CORRECTION_RETRIES: u32 = 10;

/// Busy-loop iterations run before calibrating so that frequency scaling
/// settles at the top clock
pub const PFD_WARMUP_SPINS: u64 = 200_000_000;

/// Correction used when calibration never stabilizes
#[cfg(target_arch = "x86_64")]
pub const PFD_FALLBACK_CORRECTION: Option<u64> = Some(20);
#[cfg(not(target_arch = "x86_64"))]
pub const PFD_FALLBACK_CORRECTION: Option<u64> = None;

/// Fence issued together with a timed load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFence {
    None,
    Load,
    Full,
}

/// Fence issued together with a timed store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFence {
    None,
    Store,
    Full,
    /// No fence, but the store also hits the following cache line
    DoubleWrite,
}

/// One of the `--fence` levels (0-9)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FenceLevel {
    pub load: LoadFence,
    pub store: StoreFence,
}

impl FenceLevel {
    /// Map a `--fence` level to its load/store fences. Unknown levels mean no fences
    pub fn from_level(level: u32) -> Self {
        use LoadFence as L;
        use StoreFence as S;

        let (load, store) = match level {
            1 => (L::Load, S::Store),
            2 => (L::Full, S::Full),
            3 => (L::Load, S::None),
            4 => (L::None, S::Store),
            5 => (L::Full, S::None),
            6 => (L::None, S::Full),
            7 => (L::Full, S::Store),
            8 => (L::Load, S::Full),
            9 => (L::None, S::DoubleWrite),
            _ => (L::None, S::None),
        };

        Self { load, store }
    }

    pub fn describe(&self) -> &'static str {
        use LoadFence as L;
        use StoreFence as S;

        match (self.load, self.store) {
            (L::Load, S::Store) => "load & store",
            (L::Full, S::Full) => "full",
            (L::Load, S::None) => "load",
            (L::None, S::Store) => "store",
            (L::Full, S::None) => "full/none",
            (L::None, S::Full) => "none/full",
            (L::Full, S::Store) => "full/store",
            (L::Load, S::Full) => "load/full",
            (L::None, S::DoubleWrite) => "double write",
            _ => "none",
        }
    }
}

/// Immutable description of one benchmark run
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of cooperating processes
    pub cores: u32,
    pub repetitions: u32,
    pub scenario: Scenario,
    pub core1: usize,
    pub core2: usize,
    pub core3: usize,
    /// Processes with ID >= 3 bind to core `ID - core_others`
    pub core_others: usize,
    /// Stride window in cache lines, always a power of two
    pub stride: u32,
    pub fence: FenceLevel,
    /// Size of the target buffer in bytes
    pub mem_size: usize,
    /// Flush the target line before every repetition
    pub flush: bool,
    /// Make the atomic operations of the *_ON_* scenarios succeed
    pub success: bool,
    pub verbose: bool,
    /// Raw values printed per channel when verbose
    pub print_count: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cores: DEFAULT_CORES,
            repetitions: DEFAULT_REPS,
            scenario: Scenario::StoreOnModified,
            core1: DEFAULT_CORE1,
            core2: DEFAULT_CORE2,
            core3: DEFAULT_CORE3,
            core_others: DEFAULT_CORE_OTHERS,
            stride: DEFAULT_STRIDE,
            fence: FenceLevel::from_level(DEFAULT_FENCE),
            mem_size: CACHE_LINE_NUM * CACHE_LINE_SIZE,
            flush: false,
            success: false,
            verbose: false,
            print_count: DEFAULT_PRINT,
        }
    }
}

impl Config {
    pub fn cache_line_num(&self) -> usize {
        self.mem_size / CACHE_LINE_SIZE
    }

    /// Core that the process with the given ID binds to
    pub fn core_for(&self, id: u32) -> usize {
        match id {
            0 => self.core1,
            1 => self.core2,
            2 => self.core3,
            n => n as usize - self.core_others,
        }
    }

    /// Check the invariants a run relies on. A failure here is an operator error
    pub fn validate(&self) -> Result<()> {
        let lines = self.cache_line_num();

        ensure!(self.cores >= 1, "at least one process is needed");
        ensure!(self.repetitions >= 1, "at least one repetition is needed");
        ensure!(self.stride.is_power_of_two(), "stride {} is not a power of two", self.stride);
        ensure!(lines >= 2, "memory size {} holds fewer than two cache lines", self.mem_size);

        if self.cores > 3 {
            ensure!(
                self.core_others <= 3,
                "core-others offset {} would bind process 3 below core 0",
                self.core_others
            );
        }

        if self.scenario.walks_buffer() && !self.flush {
            ensure!(
                (self.repetitions as usize) * (self.stride as usize) <= lines,
                "(repetitions * stride) <= cache line count ({} * {} > {})",
                self.repetitions,
                self.stride,
                lines
            );
        }

        if self.scenario != Scenario::LoadFromMemSize {
            ensure!(
                (self.stride as usize) < lines,
                "stride < cache line count ({} >= {})",
                self.stride,
                lines
            );
        }

        Ok(())
    }
}

/// Round up to the next power of two; zero rounds to one and anything above
/// 2^31 saturates there
pub fn pow2roundup(x: u32) -> u32 {
    x.max(1).checked_next_power_of_two().unwrap_or(1 << 31)
}

/// Parse a memory size such as `64`, `32k`, `8MB` or `1g` into bytes
pub fn parse_size(arg: &str) -> Result<usize> {
    let mut s = arg.trim();
    if s.ends_with(['b', 'B']) {
        s = &s[..s.len() - 1];
    }

    let (digits, multiplier) = match s.chars().last() {
        Some('k' | 'K') => (&s[..s.len() - 1], 1024),
        Some('m' | 'M') => (&s[..s.len() - 1], 1024 * 1024),
        Some('g' | 'G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        Some(_) => (s, 1),
        None => bail!("empty memory size"),
    };

    let value: usize = digits
        .parse()
        .with_context(|| format!("Invalid memory size \"{}\"", arg))?;

    value
        .checked_mul(multiplier)
        .with_context(|| format!("Memory size \"{}\" overflows", arg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_levels_match_cli_help() {
        assert_eq!(FenceLevel::from_level(0).describe(), "none");
        assert_eq!(FenceLevel::from_level(1).load, LoadFence::Load);
        assert_eq!(FenceLevel::from_level(1).store, StoreFence::Store);
        assert_eq!(FenceLevel::from_level(6).load, LoadFence::None);
        assert_eq!(FenceLevel::from_level(6).store, StoreFence::Full);
        assert_eq!(FenceLevel::from_level(9).store, StoreFence::DoubleWrite);
        assert_eq!(FenceLevel::from_level(42), FenceLevel::from_level(0));
    }

    #[test]
    fn sizes_accept_suffixes() {
        assert_eq!(parse_size("64").unwrap(), 64);
        assert_eq!(parse_size("32k").unwrap(), 32 * 1024);
        assert_eq!(parse_size("8MB").unwrap(), 8 * 1024 * 1024);
        assert_eq!(parse_size("1g").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_size("512b").unwrap(), 512);
        assert!(parse_size("").is_err());
        assert!(parse_size("k").is_err());
    }

    #[test]
    fn stride_rounds_up() {
        assert_eq!(pow2roundup(0), 1);
        assert_eq!(pow2roundup(1), 1);
        assert_eq!(pow2roundup(3), 4);
        assert_eq!(pow2roundup(2047), 2048);
        assert_eq!(pow2roundup(2048), 2048);
    }

    #[test]
    fn walking_scenarios_need_room() {
        let config = Config {
            scenario: Scenario::LoadFromInvalid,
            ..Config::default()
        };
        // 10000 * 2048 lines do not fit in the default buffer
        assert!(config.validate().is_err());

        let config = Config {
            flush: true,
            ..config
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn others_bind_relative_to_offset() {
        let config = Config {
            core_others: 1,
            ..Config::default()
        };
        assert_eq!(config.core_for(0), DEFAULT_CORE1);
        assert_eq!(config.core_for(2), DEFAULT_CORE3);
        assert_eq!(config.core_for(5), 4);
    }
}
