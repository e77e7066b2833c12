//! Deferred, batched index freeing shared by every memory window.
//!
//! Windows park indices in a pending batch with a deadline and schedule the
//! batch here. One thread keeps a min-heap of deadlines and releases each
//! batch once its deadline passes.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::error::{MemError, MemResult};

/// Every Nth released batch is logged.
const REPORT_EVERY: u64 = 32;

/// State of a window's pending batch as seen by the service.
pub(crate) enum BatchState {
    Empty,
    NotYet(Instant),
    Due(Vec<usize>),
}

/// A window-side pending batch the service can drain.
pub(crate) trait PendingBatch: Send + Sync {
    fn label(&self) -> &str;
    fn take_due(&self, now: Instant) -> BatchState;
    /// Take whatever is pending regardless of deadline.
    fn take_all(&self) -> Vec<usize>;
    fn release(&self, batch: Vec<usize>);
}

pub(crate) enum FreeMsg {
    Schedule {
        window: Weak<dyn PendingBatch>,
        deadline: Instant,
    },
    Shutdown,
}

struct Scheduled {
    deadline: Instant,
    seq: u64,
    window: Weak<dyn PendingBatch>,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Counters published by the freeing thread.
#[derive(Debug, Default)]
struct Counters {
    batches: AtomicU64,
    indices: AtomicU64,
    scheduled: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FreeingStats {
    /// Batches released so far.
    pub batches: u64,
    /// Indices released across all batches.
    pub indices: u64,
    /// Wakeups requested by windows.
    pub scheduled: u64,
}

/// Cloneable scheduling endpoint held by each window.
#[derive(Clone)]
pub struct FreeingHandle {
    tx: Sender<FreeMsg>,
}

impl FreeingHandle {
    /// Returns false once the service has stopped.
    pub(crate) fn schedule(&self, window: Weak<dyn PendingBatch>, deadline: Instant) -> bool {
        self.tx.send(FreeMsg::Schedule { window, deadline }).is_ok()
    }
}

/// The single background thread that releases deferred frees.
///
/// Dropping the service releases every outstanding batch immediately and
/// joins the thread.
pub struct FreeingService {
    tx: Sender<FreeMsg>,
    counters: Arc<Counters>,
    thread: Option<JoinHandle<()>>,
}

impl FreeingService {
    pub fn start() -> MemResult<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let counters = Arc::new(Counters::default());
        let thread_counters = Arc::clone(&counters);
        let thread = std::thread::Builder::new()
            .name("wrapworld-freeing".into())
            .spawn(move || run(rx, &thread_counters))
            .map_err(|e| MemError::ServiceSpawn(e.to_string()))?;
        Ok(Self {
            tx,
            counters,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> FreeingHandle {
        FreeingHandle { tx: self.tx.clone() }
    }

    pub fn stats(&self) -> FreeingStats {
        FreeingStats {
            batches: self.counters.batches.load(Ordering::Acquire),
            indices: self.counters.indices.load(Ordering::Acquire),
            scheduled: self.counters.scheduled.load(Ordering::Acquire),
        }
    }
}

impl Drop for FreeingService {
    fn drop(&mut self) {
        let _ = self.tx.send(FreeMsg::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("freeing thread panicked");
            }
        }
    }
}

fn run(rx: Receiver<FreeMsg>, counters: &Counters) {
    let mut heap: BinaryHeap<Reverse<Scheduled>> = BinaryHeap::new();
    let mut seq = 0u64;
    tracing::debug!("freeing service started");
    loop {
        let next = heap.peek().map(|Reverse(s)| s.deadline);
        let msg = match next {
            Some(deadline) => rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match msg {
            Ok(FreeMsg::Schedule { window, deadline }) => {
                counters.scheduled.fetch_add(1, Ordering::AcqRel);
                seq += 1;
                heap.push(Reverse(Scheduled { deadline, seq, window }));
            }
            Ok(FreeMsg::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        while heap.peek().is_some_and(|Reverse(s)| s.deadline <= now) {
            let Some(Reverse(entry)) = heap.pop() else { break };
            let Some(window) = entry.window.upgrade() else { continue };
            match window.take_due(now) {
                BatchState::Empty => {}
                BatchState::NotYet(deadline) => {
                    seq += 1;
                    heap.push(Reverse(Scheduled {
                        deadline,
                        seq,
                        window: entry.window,
                    }));
                }
                BatchState::Due(batch) => release(window.as_ref(), batch, counters),
            }
        }
    }

    while let Some(Reverse(entry)) = heap.pop() {
        let Some(window) = entry.window.upgrade() else { continue };
        let batch = window.take_all();
        if !batch.is_empty() {
            release(window.as_ref(), batch, counters);
        }
    }
    tracing::debug!("freeing service stopped");
}

fn release(window: &dyn PendingBatch, batch: Vec<usize>, counters: &Counters) {
    let len = batch.len() as u64;
    window.release(batch);
    let batches = counters.batches.fetch_add(1, Ordering::AcqRel) + 1;
    let indices = counters.indices.fetch_add(len, Ordering::AcqRel) + len;
    if batches % REPORT_EVERY == 0 {
        tracing::debug!(window = window.label(), batches, indices, "deferred frees released");
    } else {
        tracing::trace!(window = window.label(), len, "deferred batch released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct FakeBatch {
        pending: Mutex<(Vec<usize>, Option<Instant>)>,
        released: Mutex<Vec<Vec<usize>>>,
    }

    impl FakeBatch {
        fn new(indices: Vec<usize>, deadline: Instant) -> Arc<Self> {
            Arc::new(Self {
                pending: Mutex::new((indices, Some(deadline))),
                released: Mutex::new(Vec::new()),
            })
        }
    }

    impl PendingBatch for FakeBatch {
        fn label(&self) -> &str {
            "fake"
        }

        fn take_due(&self, now: Instant) -> BatchState {
            let mut pending = self.pending.lock();
            match pending.1 {
                None => BatchState::Empty,
                Some(d) if d > now => BatchState::NotYet(d),
                Some(_) => {
                    pending.1 = None;
                    BatchState::Due(std::mem::take(&mut pending.0))
                }
            }
        }

        fn take_all(&self) -> Vec<usize> {
            let mut pending = self.pending.lock();
            pending.1 = None;
            std::mem::take(&mut pending.0)
        }

        fn release(&self, batch: Vec<usize>) {
            self.released.lock().push(batch);
        }
    }

    fn wait_for(mut done: impl FnMut() -> bool) {
        let start = Instant::now();
        while !done() {
            assert!(start.elapsed() < Duration::from_secs(5), "timed out");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn batches_release_after_their_deadline() {
        let service = FreeingService::start().unwrap();
        let start = Instant::now();
        let batch = FakeBatch::new(vec![1, 2, 3], start + Duration::from_millis(30));
        let weak: Weak<dyn PendingBatch> = Arc::downgrade(&batch) as Weak<dyn PendingBatch>;
        assert!(service.handle().schedule(weak, start + Duration::from_millis(30)));

        wait_for(|| service.stats().batches == 1);
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(*batch.released.lock(), vec![vec![1, 2, 3]]);
        assert_eq!(service.stats().indices, 3);
    }

    #[test]
    fn early_wakeups_are_rescheduled() {
        let service = FreeingService::start().unwrap();
        let start = Instant::now();
        // The window moved its deadline later than what was scheduled.
        let batch = FakeBatch::new(vec![9], start + Duration::from_millis(60));
        let weak: Weak<dyn PendingBatch> = Arc::downgrade(&batch) as Weak<dyn PendingBatch>;
        service.handle().schedule(weak, start);

        wait_for(|| service.stats().batches == 1);
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn shutdown_flushes_outstanding_batches() {
        let service = FreeingService::start().unwrap();
        let far = Instant::now() + Duration::from_secs(60);
        let batch = FakeBatch::new(vec![4, 5], far);
        let weak: Weak<dyn PendingBatch> = Arc::downgrade(&batch) as Weak<dyn PendingBatch>;
        let handle = service.handle();
        handle.schedule(weak.clone(), far);
        drop(service);
        assert_eq!(*batch.released.lock(), vec![vec![4, 5]]);
        assert!(!handle.schedule(weak, far));
    }
}
