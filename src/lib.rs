//! Cache-coherence latency measurement
//!
//! Cooperating processes are pinned to cores and driven through a bank of
//! shared-memory barriers so that one of them leaves a cache line in a known
//! MOESI state before another one touches it. The cost of each touch is taken
//! with the time-stamp counter and summarized per process.

pub mod affinity;
pub mod atomics;
pub mod barrier;
pub mod cache_line;
pub mod config;
pub mod ops;
pub mod profiler;
pub mod scenario;
pub mod sequencer;
pub mod shm;
pub mod stats;
pub mod xorshift;

pub use barrier::{BarrierBank, Coloring};
pub use cache_line::{CacheLine, CacheLineBuffer};
pub use config::{Config, FenceLevel};
pub use profiler::Profiler;
pub use scenario::Scenario;
pub use sequencer::{Worker, WorkerReport};
pub use stats::Summary;
pub use xorshift::Xorshf96;

/// Setup failures that end the run with a dedicated exit code
///
/// Attached as context to the `anyhow` error so that the binary can pick the
/// code with `downcast_ref` after printing the whole chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fatal {
    /// A shared segment could not be opened, created or sized
    SharedMemory,
    /// Pinning to a core failed
    Affinity,
    /// A shared segment could not be mapped
    Mapping,
}

impl Fatal {
    pub fn exit_code(self) -> i32 {
        match self {
            Fatal::SharedMemory => 1,
            Fatal::Affinity => 3,
            Fatal::Mapping => 134,
        }
    }
}

impl std::fmt::Display for Fatal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let what = match self {
            Fatal::SharedMemory => "shared memory setup failed",
            Fatal::Affinity => "could not bind to core",
            Fatal::Mapping => "mmap of shared segment failed",
        };
        f.write_str(what)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Ticks elapsed since `earlier`, as a signed value so that a reading
    /// taken on a lagging counter shows up negative instead of wrapping
    #[inline(always)]
    pub fn since(self, earlier: Timestamp) -> i64 {
        self.0.wrapping_sub(earlier.0) as i64
    }
}

/// Get time-stamp counter
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn get_tsc() -> Timestamp {
    unsafe {
        use std::arch::x86_64::_rdtsc;

        let ret = _rdtsc();
        Timestamp(ret)
    }
}

/// Get the virtual counter (fixed frequency, readable from user space)
#[cfg(target_arch = "aarch64")]
#[inline(always)]
pub fn get_tsc() -> Timestamp {
    let val: u64;
    unsafe {
        std::arch::asm!("mrs {}, cntvct_el0", out(reg) val);
    }
    Timestamp(val)
}

/// Nanoseconds on the monotonic clock, for targets without a user-space counter
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[inline(always)]
pub fn get_tsc() -> Timestamp {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    Timestamp(ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64)
}
