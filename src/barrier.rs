//! Reusable rendezvous points in shared memory
//!
//! A fixed bank of slots lives in one shared segment so that independent
//! processes can meet at them. Every slot counts its crossers through three
//! phases. Each phase resets the counter of the next one before it increments
//! its own, so a participant that races ahead into the next use of the slot
//! can never see or disturb a counter the slow ones still spin on.

use std::cell::UnsafeCell;
use std::mem::size_of;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use log::debug;

use crate::atomics;
use crate::config::{BARRIER_MEM_MIN_SIZE, BARRIER_MEM_NAME, NUM_BARRIERS};
use crate::shm::SharedRegion;

/// Which process IDs take part in a barrier
#[derive(Debug, Clone, Copy)]
pub enum Coloring {
    All,
    /// IDs `0..n`
    FirstN(u32),
    /// Bit `i` set means ID `i` participates. IDs above 63 never do
    Ids(u64),
    Custom(fn(u32) -> bool),
}

impl Coloring {
    #[inline]
    pub fn includes(&self, id: u32) -> bool {
        match *self {
            Coloring::All => true,
            Coloring::FirstN(n) => id < n,
            Coloring::Ids(mask) => id < 64 && mask & (1 << id) != 0,
            Coloring::Custom(f) => f(id),
        }
    }

    /// Number of IDs in `0..total` that participate
    pub fn participants(&self, total: u32) -> u64 {
        (0..total).filter(|&id| self.includes(id)).count() as u64
    }
}

#[repr(C, align(64))]
struct BarrierSlot {
    participants: AtomicU64,
    crossing1: AtomicU64,
    crossing2: AtomicU64,
    crossing3: AtomicU64,
    coloring: UnsafeCell<Coloring>,
}

impl BarrierSlot {
    fn new(coloring: Coloring, total: u32) -> Self {
        Self {
            participants: AtomicU64::new(coloring.participants(total)),
            crossing1: AtomicU64::new(0),
            crossing2: AtomicU64::new(0),
            crossing3: AtomicU64::new(0),
            coloring: UnsafeCell::new(coloring),
        }
    }

    #[inline(always)]
    fn coloring(&self) -> Coloring {
        // SAFETY: the coloring is only replaced by `configure`, which callers
        // never run concurrently with a wait on the same slot
        unsafe { *self.coloring.get() }
    }

    fn wait(&self, id: u32) {
        if !self.coloring().includes(id) {
            return;
        }

        let participants = self.participants.load(Ordering::Relaxed);

        self.crossing2.store(0, Ordering::Relaxed);
        self.crossing1.fetch_add(1, Ordering::AcqRel);
        spin_until(&self.crossing1, participants);

        self.crossing3.store(0, Ordering::Relaxed);
        self.crossing2.fetch_add(1, Ordering::AcqRel);
        spin_until(&self.crossing2, participants);

        self.crossing1.store(0, Ordering::Relaxed);
        self.crossing3.fetch_add(1, Ordering::AcqRel);
        spin_until(&self.crossing3, participants);
    }
}

#[inline(always)]
fn spin_until(counter: &AtomicU64, target: u64) {
    while counter.load(Ordering::Acquire) < target {
        atomics::pause();
        #[cfg(feature = "fenced-barrier")]
        atomics::full_fence();
    }
}

/// The bank of `NUM_BARRIERS` slots
pub struct BarrierBank {
    region: SharedRegion,
}

impl BarrierBank {
    fn region_size() -> usize {
        (NUM_BARRIERS * size_of::<BarrierSlot>()).max(BARRIER_MEM_MIN_SIZE)
    }

    /// Create or attach the named bank and configure every slot for all
    /// `total` processes
    pub fn initialize(total: u32) -> Result<Self> {
        let region = SharedRegion::create_or_attach(BARRIER_MEM_NAME, Self::region_size())?;
        debug!("barrier bank mapped at {:p}", region.as_ptr());
        Ok(Self::format(region, total))
    }

    /// Same bank over an anonymous mapping, shared with threads and with
    /// children forked afterwards
    pub fn anonymous(total: u32) -> Result<Self> {
        let region = SharedRegion::anonymous(Self::region_size())?;
        Ok(Self::format(region, total))
    }

    fn format(region: SharedRegion, total: u32) -> Self {
        let base = region.as_ptr() as *mut BarrierSlot;
        for i in 0..NUM_BARRIERS {
            // SAFETY: the mapping is page aligned and large enough for every slot
            unsafe { base.add(i).write(BarrierSlot::new(Coloring::All, total)) };
        }
        Self { region }
    }

    #[inline(always)]
    fn slot(&self, handle: usize) -> Option<&BarrierSlot> {
        if handle >= NUM_BARRIERS {
            return None;
        }
        // SAFETY: every slot was written in `format`
        Some(unsafe { &*(self.region.as_ptr() as *const BarrierSlot).add(handle) })
    }

    /// Reset the counters of `handle` and derive its participant count from `coloring`.
    /// Must not overlap a wait on the same handle
    pub fn configure(&self, handle: usize, coloring: Coloring, total: u32) {
        let Some(slot) = self.slot(handle) else {
            return;
        };

        slot.crossing1.store(0, Ordering::Relaxed);
        slot.crossing2.store(0, Ordering::Relaxed);
        slot.crossing3.store(0, Ordering::Relaxed);
        // SAFETY: see `BarrierSlot::coloring`
        unsafe { *slot.coloring.get() = coloring };
        slot.participants.store(coloring.participants(total), Ordering::Release);
    }

    /// Block until every participant of `handle` has arrived. Non-participants
    /// and handles outside the bank return at once
    #[inline]
    pub fn wait(&self, handle: usize, id: u32, total: u32) {
        debug_assert!(id < total);
        if let Some(slot) = self.slot(handle) {
            slot.wait(id);
        }
    }

    /// Participant count of `handle`
    pub fn participants(&self, handle: usize) -> Option<u64> {
        self.slot(handle)
            .map(|slot| slot.participants.load(Ordering::Acquire))
    }

    /// Current values of the three crossing counters of `handle`
    pub fn crossings(&self, handle: usize) -> Option<[u64; 3]> {
        self.slot(handle).map(|slot| {
            [
                slot.crossing1.load(Ordering::Acquire),
                slot.crossing2.load(Ordering::Acquire),
                slot.crossing3.load(Ordering::Acquire),
            ]
        })
    }

    /// The leader removes the named segment; everybody else just stops using it
    pub fn teardown(&self, id: u32) {
        if id == 0 {
            self.region.unlink();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_fits_one_line() {
        assert_eq!(size_of::<BarrierSlot>(), 64);
        assert!(BarrierBank::region_size() >= NUM_BARRIERS * 64);
    }

    #[test]
    fn coloring_counts() {
        assert_eq!(Coloring::All.participants(5), 5);
        assert_eq!(Coloring::FirstN(2).participants(5), 2);
        assert_eq!(Coloring::FirstN(9).participants(5), 5);
        assert_eq!(Coloring::Ids(0b10110).participants(5), 3);
        assert_eq!(Coloring::Custom(|id| id % 2 == 0).participants(5), 3);
        assert!(!Coloring::Ids(u64::MAX).includes(64));
    }
}
