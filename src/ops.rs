//! The memory operations a scenario is built from
//!
//! Every operation runs against a `Meter`. `Timed` brackets the operation with
//! profiler snapshots and `Untimed` compiles to nothing, so a background
//! helper issues exactly the same instructions as the measured process minus
//! the timestamp reads.

use std::sync::atomic::Ordering;

use crate::atomics::{self, cas_u32, fai_u32, swap_u32, tas_u8};
use crate::cache_line::CacheLine;
use crate::config::{FenceLevel, LoadFence, StoreFence};
use crate::profiler::Profiler;
use crate::xorshift::Xorshf96;

/// Which line an operation hits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The current base line
    Fixed,
    /// A random line in the stride window above the base, redrawn until the
    /// offset comes out zero so the last access always lands on the base line
    Strided,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Store(Target),
    Load(Target),
    Cas(Target),
    Fai(Target),
    Tas(Target),
    Swap(Target),
    /// Flush the base line out of every cache
    Invalidate,
    /// Follow the pointer-chasing list once around the whole buffer
    ChaseList,
    LoadFence,
    StoreFence,
    FullFence,
    Pause,
    Nop,
    /// Nothing at all; measures the profiler itself
    Empty,
}

pub trait Meter {
    fn begin(&mut self);
    fn end(&mut self);
    fn end_amortized(&mut self, repeats: u64);
}

/// Records into one channel and slot of a profiler
pub struct Timed<'p> {
    pub profiler: &'p mut Profiler,
    pub channel: usize,
    pub slot: usize,
}

impl Meter for Timed<'_> {
    #[inline(always)]
    fn begin(&mut self) {
        self.profiler.begin(self.channel);
    }

    #[inline(always)]
    fn end(&mut self) {
        self.profiler.end(self.channel, self.slot);
    }

    #[inline(always)]
    fn end_amortized(&mut self, repeats: u64) {
        self.profiler.end_amortized(self.channel, self.slot, repeats);
    }
}

pub struct Untimed;

impl Meter for Untimed {
    #[inline(always)]
    fn begin(&mut self) {}

    #[inline(always)]
    fn end(&mut self) {}

    #[inline(always)]
    fn end_amortized(&mut self, _repeats: u64) {}
}

/// Everything an operation needs besides the meter and the generator
pub struct OpEnv<'a> {
    pub lines: &'a [CacheLine],
    /// Index of the current base line
    pub base: usize,
    pub stride: u32,
    pub fence: FenceLevel,
    pub id: u32,
    pub rep: u64,
}

/// What an operation produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Effect {
    /// Added to the process sum
    pub value: u64,
    /// CAS and TAS only
    pub success: Option<bool>,
}

impl Effect {
    fn value(value: u64) -> Self {
        Self {
            value,
            success: None,
        }
    }

    fn outcome(success: bool) -> Self {
        Self {
            value: success as u64,
            success: Some(success),
        }
    }
}

impl OpEnv<'_> {
    /// Run `f` on the target line, timing each attempt. Returns the result of
    /// the last attempt, which is always the one on the base line
    #[inline(always)]
    fn on_target<M: Meter, R>(
        &self,
        target: Target,
        rng: &mut Xorshf96,
        meter: &mut M,
        mut f: impl FnMut(&CacheLine, usize) -> R,
    ) -> R {
        match target {
            Target::Fixed => {
                let line = &self.lines[self.base];
                meter.begin();
                let r = f(line, 0);
                meter.end();
                r
            }
            Target::Strided => loop {
                let offset = rng.offset(self.stride);
                let line = &self.lines[self.base + offset];
                meter.begin();
                let r = f(line, offset);
                meter.end();
                if offset == 0 {
                    break r;
                }
            },
        }
    }

    #[inline(always)]
    fn store_fence(&self) {
        match self.fence.store {
            StoreFence::Store => atomics::store_fence(),
            StoreFence::Full => atomics::full_fence(),
            StoreFence::None | StoreFence::DoubleWrite => {}
        }
    }

    #[inline(always)]
    fn load_fence(&self) {
        match self.fence.load {
            LoadFence::Load => atomics::load_fence(),
            LoadFence::Full => atomics::full_fence(),
            LoadFence::None => {}
        }
    }

    /// Run one operation
    pub fn execute<M: Meter>(&self, op: Op, rng: &mut Xorshf96, meter: &mut M) -> Effect {
        match op {
            Op::Store(target) => {
                let double = self.fence.store == StoreFence::DoubleWrite;
                let rep = self.rep as u32;
                let lines = self.lines;
                let base = self.base;
                self.on_target(target, rng, meter, |line, offset| {
                    let value = match target {
                        Target::Fixed => rep,
                        Target::Strided => offset as u32,
                    };
                    line.word0().store(value, Ordering::Relaxed);
                    if double {
                        if let Some(next) = lines.get(base + offset + 1) {
                            next.word0().store(value, Ordering::Relaxed);
                        }
                    }
                    self.store_fence();
                });
                Effect::default()
            }
            Op::Load(target) => {
                let value = self.on_target(target, rng, meter, |line, _| {
                    let v = line.word0().load(Ordering::Relaxed);
                    self.load_fence();
                    v
                });
                atomics::full_fence();
                Effect::value(value as u64)
            }
            Op::Cas(target) => {
                let expected = (self.rep & 1) as u32;
                let new = expected ^ 1;
                let old = self.on_target(target, rng, meter, |line, _| cas_u32(line.word0(), expected, new));
                Effect::outcome(old == expected)
            }
            Op::Fai(target) => {
                let old = self.on_target(target, rng, meter, |line, _| fai_u32(line.word0()));
                Effect::value(old as u64)
            }
            Op::Tas(target) => {
                let old = self.on_target(target, rng, meter, |line, _| tas_u8(line.word0()));
                Effect::outcome(old != 0xFF)
            }
            Op::Swap(target) => {
                let id = self.id;
                let old = self.on_target(target, rng, meter, |line, _| swap_u32(line.word0(), id));
                atomics::full_fence();
                Effect::value(old as u64)
            }
            Op::Invalidate => {
                let line = &self.lines[self.base];
                meter.begin();
                atomics::flush_line(line.as_ptr());
                meter.end();
                atomics::full_fence();
                Effect::default()
            }
            Op::ChaseList => Effect::value(self.chase(meter)),
            Op::LoadFence => bracket(meter, atomics::load_fence),
            Op::StoreFence => bracket(meter, atomics::store_fence),
            Op::FullFence => bracket(meter, atomics::full_fence),
            Op::Pause => bracket(meter, atomics::pause),
            Op::Nop => bracket(meter, nop),
            Op::Empty => bracket(meter, atomics::compiler_barrier),
        }
    }

    /// One full trip around the list, reported per hop
    fn chase<M: Meter>(&self, meter: &mut M) -> u64 {
        let hops = self.lines.len() as u64;
        let mut cur: *const CacheLine = &self.lines[0];

        meter.begin();
        for _ in 0..hops {
            // SAFETY: every link holds the address of a line of this mapping,
            // which sits at the same address in all workers
            cur = unsafe { (*cur).link().load(Ordering::Relaxed) } as *const CacheLine;
            self.load_fence();
        }
        meter.end_amortized(hops);

        unsafe { (*cur).link().load(Ordering::Relaxed) }
    }
}

#[inline(always)]
fn bracket<M: Meter>(meter: &mut M, f: impl FnOnce()) -> Effect {
    meter.begin();
    f();
    meter.end();
    Effect::default()
}

#[inline(always)]
fn nop() {
    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    unsafe {
        std::arch::asm!("nop", options(nomem, nostack, preserves_flags));
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    atomics::compiler_barrier();
}
