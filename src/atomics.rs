//! Hardware primitives the protocols are built from
//!
//! The read-modify-write operations are plain `std::sync::atomic` calls on the
//! 32-bit words of a cache line; on x86_64 they lower to `lock cmpxchg`,
//! `lock xadd` and `xchg`. Fences, flushes and the spin hint use the x86_64
//! intrinsics where they exist and the closest portable equivalent elsewhere.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// Compare-and-swap. Returns the value found in memory
#[inline(always)]
pub fn cas_u32(word: &AtomicU32, expected: u32, new: u32) -> u32 {
    match word.compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst) {
        Ok(v) | Err(v) => v,
    }
}

/// Fetch-and-increment. Returns the previous value
#[inline(always)]
pub fn fai_u32(word: &AtomicU32) -> u32 {
    word.fetch_add(1, Ordering::SeqCst)
}

/// Test-and-set on the lowest-addressed byte of `word`. Returns the previous byte;
/// 0xFF means the byte was already set
#[inline(always)]
pub fn tas_u8(word: &AtomicU32) -> u8 {
    // SAFETY: AtomicU8 has alignment 1 and the same in-memory representation as
    // u8, so the first byte of a live AtomicU32 is a valid AtomicU8
    let byte = unsafe { &*(word as *const AtomicU32 as *const AtomicU8) };
    byte.swap(0xFF, Ordering::SeqCst)
}

/// Atomic swap. Returns the previous value
#[inline(always)]
pub fn swap_u32(word: &AtomicU32, new: u32) -> u32 {
    word.swap(new, Ordering::SeqCst)
}

#[cfg(target_arch = "x86_64")]
mod imp {
    use std::arch::x86_64::{_mm_clflush, _mm_lfence, _mm_mfence, _mm_pause, _mm_sfence};

    #[inline(always)]
    pub fn load_fence() {
        unsafe { _mm_lfence() }
    }

    #[inline(always)]
    pub fn store_fence() {
        unsafe { _mm_sfence() }
    }

    #[inline(always)]
    pub fn full_fence() {
        unsafe { _mm_mfence() }
    }

    #[inline(always)]
    pub fn flush_line(addr: *const u8) {
        unsafe { _mm_clflush(addr) }
    }

    #[inline(always)]
    pub fn pause() {
        unsafe { _mm_pause() }
    }
}

#[cfg(not(target_arch = "x86_64"))]
mod imp {
    use std::sync::atomic::{fence, Ordering};

    #[inline(always)]
    pub fn load_fence() {
        fence(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn store_fence() {
        fence(Ordering::Release)
    }

    #[inline(always)]
    pub fn full_fence() {
        fence(Ordering::SeqCst)
    }

    // No user-space eviction instruction is assumed here
    #[inline(always)]
    pub fn flush_line(_addr: *const u8) {
        fence(Ordering::SeqCst)
    }

    #[inline(always)]
    pub fn pause() {
        std::hint::spin_loop()
    }
}

pub use imp::{flush_line, full_fence, load_fence, pause, store_fence};

/// Compiler-only barrier placed around timestamp reads
#[inline(always)]
pub fn compiler_barrier() {
    std::sync::atomic::compiler_fence(Ordering::SeqCst);
}
