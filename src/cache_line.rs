use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use anyhow::Result;
use log::{debug, info};

use crate::atomics::{flush_line, full_fence};
use crate::config::{Config, CACHE_LINE_MEM_NAME};
use crate::scenario::Scenario;
use crate::shm::SharedRegion;
use crate::xorshift::Xorshf96;

pub const CACHE_LINE_SIZE: usize = 64;
pub const WORDS_PER_LINE: usize = CACHE_LINE_SIZE / 4;

/// Seeds of the pointer-chasing list. Fixed so that every run chases the same cycle
const CHASE_SEEDS: [u64; 3] = [0xB9E4E2F1F1E2E3D5, 0xF1E2E3D5B9E4E2F1, 0x9B3A0FA212342345];

/// One coherence unit: sixteen 32-bit words
#[repr(C, align(64))]
pub struct CacheLine {
    pub words: [AtomicU32; WORDS_PER_LINE],
}

impl CacheLine {
    #[inline(always)]
    pub fn word0(&self) -> &AtomicU32 {
        &self.words[0]
    }

    /// The first eight bytes viewed as the address of the next line in the
    /// pointer-chasing list
    #[inline(always)]
    pub fn link(&self) -> &AtomicU64 {
        // SAFETY: the line is 64-byte aligned and its first 8 bytes are plain
        // atomic storage, which AtomicU64 may alias
        unsafe { &*(self.words.as_ptr() as *const AtomicU64) }
    }

    #[inline(always)]
    pub fn as_ptr(&self) -> *const u8 {
        self as *const CacheLine as *const u8
    }
}

/// The shared array of lines the benchmark operates on
pub struct CacheLineBuffer {
    region: SharedRegion,
    num_lines: usize,
}

impl CacheLineBuffer {
    /// Create or attach the named buffer of `config.mem_size` bytes
    pub fn open(config: &Config) -> Result<Self> {
        let num_lines = config.cache_line_num();
        let region = SharedRegion::create_or_attach(CACHE_LINE_MEM_NAME, num_lines * CACHE_LINE_SIZE)?;
        debug!("{} cache lines mapped at {:p}", num_lines, region.as_ptr());
        Ok(Self { region, num_lines })
    }

    /// Same buffer over an anonymous shared mapping
    pub fn anonymous(config: &Config) -> Result<Self> {
        let num_lines = config.cache_line_num();
        let region = SharedRegion::anonymous(num_lines * CACHE_LINE_SIZE)?;
        Ok(Self { region, num_lines })
    }

    #[inline(always)]
    pub fn lines(&self) -> &[CacheLine] {
        // SAFETY: the mapping is page aligned, holds `num_lines` lines and any
        // bit pattern is a valid AtomicU32
        unsafe { std::slice::from_raw_parts(self.region.as_ptr() as *const CacheLine, self.num_lines) }
    }

    pub fn len(&self) -> usize {
        self.num_lines
    }

    pub fn is_empty(&self) -> bool {
        self.num_lines == 0
    }

    /// Leader-side setup run before the workers exist: zero every line, evict
    /// it, and lay out the chasing list if the scenario needs it
    pub fn prepare(&self, scenario: Scenario) {
        for line in self.lines() {
            for word in &line.words {
                word.store(0, Ordering::Relaxed);
            }
            flush_line(line.as_ptr());
        }

        if scenario == Scenario::LoadFromMemSize {
            info!("building random pointer-chasing list over {} lines", self.num_lines);
            self.build_chase_list();
        }

        full_fence();
    }

    /// Link all lines into one random cycle that starts and ends at line 0
    fn build_chase_list(&self) {
        let lines = self.lines();
        let n = lines.len();
        let mut rng = Xorshf96::with_seeds(CHASE_SEEDS[0], CHASE_SEEDS[1], CHASE_SEEDS[2]);
        let mut used = vec![false; n];

        let mut idx = 0;
        for _ in 1..n {
            used[idx] = true;

            let next = loop {
                let candidate = rng.pick(n as u64, 0) as usize;
                if !used[candidate] {
                    break candidate;
                }
            };

            lines[idx].link().store(lines[next].as_ptr() as u64, Ordering::Relaxed);
            idx = next;
        }

        lines[idx].link().store(lines[0].as_ptr() as u64, Ordering::Relaxed);
    }

    /// Process 0 removes the named segment
    pub fn close(&self, id: u32) {
        if id == 0 {
            self.region.unlink();
        }
    }
}
