// SPDX-License-Identifier: MIT OR Apache-2.0
//! Fixed-capacity pool of virtual users shared by a task's execution-mode
//! driver.

use std::sync::Mutex;
use wf_core::{VirtualUser, VuState};
use wf_error::{WfError, WfErrorCode};

#[derive(Clone, Copy)]
enum Slot {
    Empty,
    Vu(VirtualUser),
}

/// Holds up to `capacity` [`VirtualUser`] slots, constructing each lazily on
/// its first `acquire` and recycling it across iterations.
///
/// Exactly one caller may hold a given index between `acquire` and
/// `release`: a second `acquire` of an index already marked
/// [`VuState::Busy`] is rejected rather than silently handed a duplicate.
pub struct VuPool {
    slots: Mutex<Vec<Slot>>,
}

impl VuPool {
    /// Create a pool sized to `capacity` VUs. No VUs are constructed yet.
    pub fn new(capacity: u32) -> Self {
        Self {
            slots: Mutex::new(vec![Slot::Empty; capacity as usize]),
        }
    }

    /// Total number of slots this pool was sized with.
    pub fn capacity(&self) -> u32 {
        self.slots.lock().expect("vu pool lock poisoned").len() as u32
    }

    /// Acquire the VU at `index`, constructing it on first use and marking
    /// it [`VuState::Busy`]. Returns an error if `index` is beyond
    /// capacity, or if the slot is already held (busy) by another caller.
    pub fn acquire(&self, index: u32) -> Result<VirtualUser, WfError> {
        let mut slots = self.slots.lock().expect("vu pool lock poisoned");
        let idx = index as usize;
        if idx >= slots.len() {
            return Err(WfError::new(WfErrorCode::VuPoolExhausted, "vu index beyond pool capacity")
                .with_context("index", index)
                .with_context("capacity", slots.len()));
        }
        if matches!(slots[idx], Slot::Vu(vu) if vu.state == VuState::Busy) {
            return Err(WfError::new(WfErrorCode::VuPoolExhausted, "vu slot already in use").with_context("index", index));
        }
        let mut vu = match slots[idx] {
            Slot::Empty => VirtualUser::new(index),
            Slot::Vu(vu) => vu,
        };
        vu.state = VuState::Busy;
        slots[idx] = Slot::Vu(vu);
        Ok(vu)
    }

    /// Return a VU to the pool, marking it [`VuState::Idle`] for reuse.
    pub fn release(&self, vu: VirtualUser) {
        let mut slots = self.slots.lock().expect("vu pool lock poisoned");
        let idx = vu.index as usize;
        if idx < slots.len() {
            let mut vu = vu;
            vu.state = VuState::Idle;
            slots[idx] = Slot::Vu(vu);
        }
    }

    /// Mark every constructed VU [`VuState::Done`], signalling that no
    /// further iterations should be started. Does not deallocate slots.
    pub fn stop_all(&self) {
        let mut slots = self.slots.lock().expect("vu pool lock poisoned");
        for slot in slots.iter_mut() {
            if let Slot::Vu(vu) = slot {
                vu.state = VuState::Done;
            }
        }
    }

    /// Discard every constructed VU, so the next `acquire` for any index
    /// builds a fresh one. Used when a task's pool is reused across ramps.
    pub fn reset(&self) {
        let mut slots = self.slots.lock().expect("vu pool lock poisoned");
        for slot in slots.iter_mut() {
            *slot = Slot::Empty;
        }
    }

    /// Count of VUs currently marked [`VuState::Busy`].
    pub fn active_count(&self) -> u32 {
        let slots = self.slots.lock().expect("vu pool lock poisoned");
        slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Vu(vu) if vu.state == VuState::Busy))
            .count() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_constructs_lazily_and_marks_busy() {
        let pool = VuPool::new(4);
        assert_eq!(pool.active_count(), 0);
        let vu = pool.acquire(0).unwrap();
        assert_eq!(vu.index, 0);
        assert_eq!(vu.state, VuState::Busy);
        assert_eq!(pool.active_count(), 1);
    }

    #[test]
    fn release_marks_idle_and_preserves_identity() {
        let pool = VuPool::new(2);
        let vu = pool.acquire(1).unwrap();
        let id = vu.id;
        pool.release(vu);
        assert_eq!(pool.active_count(), 0);
        let reacquired = pool.acquire(1).unwrap();
        assert_eq!(reacquired.id, id, "recycled VU keeps its identity across acquire/release");
    }

    #[test]
    fn reset_drops_identity_so_next_acquire_builds_fresh() {
        let pool = VuPool::new(1);
        let vu = pool.acquire(0).unwrap();
        let id = vu.id;
        pool.release(vu);
        pool.reset();
        let fresh = pool.acquire(0).unwrap();
        assert_ne!(fresh.id, id);
    }

    #[test]
    fn acquire_beyond_capacity_is_an_error() {
        let pool = VuPool::new(1);
        let err = pool.acquire(5).unwrap_err();
        assert_eq!(err.code, WfErrorCode::VuPoolExhausted);
    }

    #[test]
    fn second_acquire_without_release_is_rejected() {
        let pool = VuPool::new(2);
        let _held = pool.acquire(0).unwrap();
        let err = pool.acquire(0).unwrap_err();
        assert_eq!(err.code, WfErrorCode::VuPoolExhausted);
        assert_eq!(pool.active_count(), 1);
    }

    #[test]
    fn acquire_after_release_succeeds_again() {
        let pool = VuPool::new(1);
        let vu = pool.acquire(0).unwrap();
        pool.release(vu);
        assert!(pool.acquire(0).is_ok());
    }

    #[test]
    fn stop_all_marks_constructed_vus_done() {
        let pool = VuPool::new(3);
        pool.acquire(0).unwrap();
        pool.acquire(1).unwrap();
        pool.stop_all();
        assert_eq!(pool.active_count(), 0);
    }
}
