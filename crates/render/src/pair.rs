use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::list::RenderList;

const IDLE: u8 = 0;
const BUILDING: u8 = 1;
const READY: u8 = 2;

/// Where the back list is in its rebuild cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    /// Nothing in flight; a rebuild may start.
    Idle,
    /// A worker owns the back list.
    Building,
    /// The back list is complete and waiting to be swapped in.
    Ready,
}

impl BuildState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            BUILDING => Self::Building,
            READY => Self::Ready,
            _ => Self::Idle,
        }
    }
}

/// Exactly two render lists: the front one is drawn, the back one rebuilt.
///
/// `Idle -> Building` is claimed by one rebuild at a time. The worker moves
/// `Building -> Ready` when the back list is complete, and only then can
/// [`try_swap`](Self::try_swap) promote it. The front list is never written
/// by a worker.
#[derive(Debug)]
pub struct RenderListPair {
    lists: [Mutex<RenderList>; 2],
    front: AtomicUsize,
    state: AtomicU8,
    swaps: AtomicU64,
}

impl RenderListPair {
    pub fn new(first: RenderList, second: RenderList) -> Self {
        Self {
            lists: [Mutex::new(first), Mutex::new(second)],
            front: AtomicUsize::new(0),
            state: AtomicU8::new(IDLE),
            swaps: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> BuildState {
        BuildState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn front_index(&self) -> usize {
        self.front.load(Ordering::Acquire)
    }

    pub fn swaps(&self) -> u64 {
        self.swaps.load(Ordering::Relaxed)
    }

    /// The list being drawn.
    pub fn front(&self) -> MutexGuard<'_, RenderList> {
        self.lists[self.front_index()].lock()
    }

    /// Claim the back list for a rebuild. False if one is already pending.
    pub fn begin_rebuild(&self) -> bool {
        self.state
            .compare_exchange(IDLE, BUILDING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// The list a claimed rebuild writes into.
    pub fn back(&self) -> MutexGuard<'_, RenderList> {
        debug_assert_eq!(self.state(), BuildState::Building, "back list used outside a rebuild");
        self.lists[1 - self.front_index()].lock()
    }

    /// Publish the back list for the next swap.
    pub fn finish_rebuild(&self) {
        let prev = self.state.swap(READY, Ordering::AcqRel);
        debug_assert_eq!(prev, BUILDING, "finish_rebuild without a rebuild in flight");
    }

    /// Give up a claimed rebuild without publishing it.
    pub fn abandon_rebuild(&self) {
        let _ = self
            .state
            .compare_exchange(BUILDING, IDLE, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Promote the back list if its rebuild has finished. Never blocks.
    ///
    /// GPU-submission thread only: the front index flips before the state
    /// returns to idle, so the next rebuild always targets the new back list.
    pub fn try_swap(&self) -> bool {
        if self.state.load(Ordering::Acquire) != READY {
            return false;
        }
        self.front.fetch_xor(1, Ordering::AcqRel);
        self.swaps.fetch_add(1, Ordering::Relaxed);
        self.state.store(IDLE, Ordering::Release);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;
    use wrapworld_common::Marker;
    use wrapworld_mem::{FreeingService, MemoryConfig, ObjectListTable, PageArena};

    fn pair() -> (RenderListPair, FreeingService) {
        let config = MemoryConfig {
            max_pages: 16,
            ..MemoryConfig::default()
        };
        let arena = PageArena::new(&config).unwrap();
        let service = FreeingService::start().unwrap();
        let table = ObjectListTable::new(16, &arena, &service, &config).unwrap();
        let pair = RenderListPair::new(
            RenderList::new(table.clone()).unwrap(),
            RenderList::new(table).unwrap(),
        );
        (pair, service)
    }

    #[test]
    fn swap_is_refused_until_the_rebuild_finishes() {
        let (pair, _service) = pair();
        assert!(!pair.try_swap());
        assert!(pair.begin_rebuild());
        assert!(!pair.begin_rebuild());
        assert!(!pair.try_swap());
        assert_eq!(pair.front_index(), 0);

        pair.back().push(&Marker::new(9, DVec3::ZERO), 0.0);
        pair.finish_rebuild();
        assert_eq!(pair.state(), BuildState::Ready);
        assert!(!pair.begin_rebuild());
        assert!(pair.try_swap());
        assert_eq!(pair.front_index(), 1);
        assert_eq!(pair.front().len(), 1);
        assert_eq!(pair.state(), BuildState::Idle);
        assert_eq!(pair.swaps(), 1);
    }

    #[test]
    fn rebuild_never_touches_the_front_list() {
        let (pair, _service) = pair();
        for round in 0..4u32 {
            assert!(pair.begin_rebuild());
            {
                let mut back = pair.back();
                back.reset();
                back.push(&Marker::new(round, DVec3::ZERO), 0.0);
            }
            let front_before: Vec<u32> = pair.front().entries().iter().map(|e| e.object_id).collect();
            pair.finish_rebuild();
            let front_after: Vec<u32> = pair.front().entries().iter().map(|e| e.object_id).collect();
            assert_eq!(front_before, front_after);
            assert!(pair.try_swap());
            assert_eq!(pair.front().entries()[0].object_id, round);
        }
    }

    #[test]
    fn abandoned_rebuild_returns_to_idle() {
        let (pair, _service) = pair();
        assert!(pair.begin_rebuild());
        pair.abandon_rebuild();
        assert_eq!(pair.state(), BuildState::Idle);
        assert!(!pair.try_swap());
        assert!(pair.begin_rebuild());
    }
}
