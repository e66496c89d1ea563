//! Epoch-based centralized scheduler.
//!
//! A rendezvous that accepts requests from any number of worker threads,
//! batches them over a wall-clock window, then releases them one at a time
//! in randomized priority order. One background thread runs a two-state
//! machine:
//!
//! - **COLLECTING** — sleep out the epoch window (wakeable for shutdown),
//!   then drain the pending FIFO into the priority heap. An empty FIFO
//!   means another COLLECTING pass; otherwise the epoch index advances and
//!   the machine flips to DRAINING.
//! - **DRAINING** — under the scheduler-global mutex, pop the minimum
//!   `(priority, submission)` entry, detach its waiter from the map, then
//!   signal the waiter outside the lock. An empty heap flips back to
//!   COLLECTING.
//!
//! Every request submitted during epoch *n* releases before any request
//! submitted during epoch *n+1*; a push that races the drain is deferred
//! one epoch, which the sampling design accepts.
//!
//! # Waiter lifetime
//!
//! The waiter is created by the worker and destroyed by the worker: the
//! map holds a second `Arc` reference that the scheduler removes *before*
//! signaling, so once the worker observes the flag it holds the only
//! reference and the waiter dies on the observing thread. The original
//! C++ implementation of this design shipped a heap-corruption bug by
//! destroying the waiter on the waking thread; the `Arc` encoding makes
//! that ordering structurally impossible.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use isofuzz_types::{PRIORITY_MAX, Priority, SchedulerIntent, TrxLibId};

/// Entries the release log retains before overwriting the oldest.
pub const RELEASE_LOG_CAPACITY: usize = 1024;

const PHASE_COLLECTING: u8 = 0;
const PHASE_DRAINING: u8 = 1;

// ---------------------------------------------------------------------------
// Waiter
// ---------------------------------------------------------------------------

/// One-shot park/unpark primitive for a single worker.
///
/// Exactly one producer sets the flag; exactly one consumer observes it.
#[derive(Debug)]
struct Waiter {
    ready: Mutex<bool>,
    cv: Condvar,
}

impl Waiter {
    fn new() -> Self {
        Self {
            ready: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    fn wait(&self) {
        let mut ready = self.ready.lock();
        while !*ready {
            self.cv.wait(&mut ready);
        }
    }

    fn signal(&self) {
        let mut ready = self.ready.lock();
        *ready = true;
        drop(ready);
        self.cv.notify_one();
    }
}

// ---------------------------------------------------------------------------
// Queue entry
// ---------------------------------------------------------------------------

/// A queued scheduling request. Orders by `(priority, submission)` so that
/// equal priorities release in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueEntry {
    priority: Priority,
    submission: u64,
    lib_id: TrxLibId,
}

// ---------------------------------------------------------------------------
// Release log
// ---------------------------------------------------------------------------

/// One granted release, recorded under the scheduler-global mutex at the
/// moment the waiter is detached from the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReleaseEvent {
    /// Epoch batch this release belonged to (1-based).
    pub epoch: u64,
    /// The released transaction.
    pub lib_id: TrxLibId,
    /// The priority it drew.
    pub priority: Priority,
}

/// Fixed-capacity ring of recent releases; oldest entries overwritten.
#[derive(Debug)]
struct ReleaseLog {
    buf: Vec<ReleaseEvent>,
    capacity: usize,
    head: usize,
    len: usize,
}

impl ReleaseLog {
    fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, event: ReleaseEvent) {
        if self.capacity == 0 {
            return;
        }
        let idx = (self.head + self.len) % self.capacity;
        if self.buf.len() < self.capacity {
            self.buf.push(event);
        } else {
            self.buf[idx] = event;
        }
        if self.len == self.capacity {
            self.head = (self.head + 1) % self.capacity;
        } else {
            self.len += 1;
        }
    }

    fn snapshot_ordered(&self) -> Vec<ReleaseEvent> {
        let mut out = Vec::with_capacity(self.len);
        for i in 0..self.len {
            out.push(self.buf[(self.head + i) % self.capacity]);
        }
        out
    }

    fn clear(&mut self) {
        self.buf.clear();
        self.head = 0;
        self.len = 0;
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SchedulerMetrics {
    requests_total: AtomicU64,
    released_total: AtomicU64,
    force_released_total: AtomicU64,
    epochs_total: AtomicU64,
}

/// Serializable point-in-time view of scheduler counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerMetricsSnapshot {
    /// Requests accepted into the pending FIFO.
    pub requests_total: u64,
    /// Workers released by the drain path.
    pub released_total: u64,
    /// Workers released by the shutdown sweep.
    pub force_released_total: u64,
    /// Non-empty epoch batches drained.
    pub epochs_total: u64,
}

impl std::fmt::Display for SchedulerMetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "scheduler(requests={} released={} forced={} epochs={})",
            self.requests_total, self.released_total, self.force_released_total, self.epochs_total
        )
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// State behind the scheduler-global mutex: the priority heap, the waiter
/// map, the shared PRNG, the epoch index, and the release log. Drawing a
/// priority and publishing the waiter happen under one acquisition so
/// submission needs no second lock.
#[derive(Debug)]
struct SchedulerCore {
    heap: BinaryHeap<Reverse<QueueEntry>>,
    waiters: HashMap<u64, Arc<Waiter>>,
    rng: StdRng,
    next_submission: u64,
    epoch_index: u64,
    releases: ReleaseLog,
    /// Whether new requests may enter. Cleared under this mutex during the
    /// shutdown sweep, so a submission that raced shutdown either lands
    /// before the sweep (and is force-released) or observes the flag and
    /// returns without parking.
    accepting: bool,
}

#[derive(Debug)]
struct Shared {
    running: AtomicBool,
    phase: AtomicU8,
    core: Mutex<SchedulerCore>,
    /// Pending FIFO; its own mutex so submission never contends with the
    /// drain path.
    pending: Mutex<VecDeque<QueueEntry>>,
    /// Shutdown-wakeable sleep for the COLLECTING phase.
    stop: Mutex<bool>,
    stop_cv: Condvar,
    metrics: SchedulerMetrics,
}

/// The epoch scheduler. One instance per runtime; restartable.
#[derive(Debug)]
pub struct EpochScheduler {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
    seed: u64,
    epoch: Duration,
}

impl EpochScheduler {
    /// A stopped scheduler. `start` spawns the background thread.
    #[must_use]
    pub fn new(seed: u64, epoch: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                phase: AtomicU8::new(PHASE_COLLECTING),
                core: Mutex::new(SchedulerCore {
                    heap: BinaryHeap::new(),
                    waiters: HashMap::new(),
                    rng: StdRng::seed_from_u64(seed),
                    next_submission: 0,
                    epoch_index: 0,
                    releases: ReleaseLog::new(RELEASE_LOG_CAPACITY),
                    accepting: false,
                }),
                pending: Mutex::new(VecDeque::new()),
                stop: Mutex::new(false),
                stop_cv: Condvar::new(),
                metrics: SchedulerMetrics::default(),
            }),
            thread: Mutex::new(None),
            seed,
            epoch,
        }
    }

    /// Spawn the scheduler thread. A second call without an intervening
    /// `shutdown` is a no-op. Restarting reseeds the PRNG so the priority
    /// stream is identical across init/shutdown cycles.
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut core = self.shared.core.lock();
            core.rng = StdRng::seed_from_u64(self.seed);
            core.heap.clear();
            core.accepting = true;
        }
        *self.shared.stop.lock() = false;
        self.shared.phase.store(PHASE_COLLECTING, Ordering::Relaxed);

        let shared = Arc::clone(&self.shared);
        let epoch = self.epoch;
        let handle = std::thread::Builder::new()
            .name("isofuzz-scheduler".to_owned())
            .spawn(move || run(&shared, epoch))
            .expect("spawn scheduler thread");
        *self.thread.lock() = Some(handle);
        tracing::info!(
            target: "isofuzz.scheduler",
            seed = self.seed,
            epoch_ms = self.epoch.as_millis() as u64,
            "scheduler started"
        );
    }

    /// Stop the scheduler thread, join it, then force-release every waiter
    /// still in the map so no worker stays parked. Idempotent.
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        {
            let mut stop = self.shared.stop.lock();
            *stop = true;
        }
        self.shared.stop_cv.notify_one();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }

        let leftover: Vec<Arc<Waiter>> = {
            let mut core = self.shared.core.lock();
            core.accepting = false;
            core.heap.clear();
            core.waiters.drain().map(|(_, waiter)| waiter).collect()
        };
        self.shared.pending.lock().clear();
        for waiter in &leftover {
            waiter.signal();
        }
        self.shared
            .metrics
            .force_released_total
            .fetch_add(leftover.len() as u64, Ordering::Relaxed);
        self.shared.phase.store(PHASE_COLLECTING, Ordering::Relaxed);
        tracing::info!(
            target: "isofuzz.scheduler",
            force_released = leftover.len(),
            "scheduler stopped"
        );
    }

    /// Park the calling worker until the scheduler grants its turn.
    ///
    /// `intent` is accepted for the contract but not yet consulted;
    /// priorities are uniform.
    pub fn request(&self, lib_id: TrxLibId, intent: SchedulerIntent) {
        let _ = intent;
        self.submit(lib_id, None);
    }

    /// Like [`request`](Self::request) but with a caller-chosen priority.
    ///
    /// Deterministic-order tests inject priorities here instead of mocking
    /// the generator.
    pub fn request_with_priority(&self, lib_id: TrxLibId, priority: Priority) {
        self.submit(lib_id, Some(priority));
    }

    fn submit(&self, lib_id: TrxLibId, forced: Option<Priority>) {
        let waiter = Arc::new(Waiter::new());
        let entry = {
            let mut core = self.shared.core.lock();
            if !core.accepting {
                tracing::debug!(
                    target: "isofuzz.scheduler",
                    lib_id = lib_id.get(),
                    "request while stopped; returning without parking"
                );
                return;
            }
            let priority = forced
                .unwrap_or_else(|| Priority::new(core.rng.gen_range(0..=PRIORITY_MAX)));
            let submission = core.next_submission;
            core.next_submission += 1;
            core.waiters.insert(lib_id.get(), Arc::clone(&waiter));
            QueueEntry {
                priority,
                submission,
                lib_id,
            }
        };
        self.shared.pending.lock().push_back(entry);
        self.shared
            .metrics
            .requests_total
            .fetch_add(1, Ordering::Relaxed);

        waiter.wait();
        // The map clone was removed before the signal, so this drop is the
        // waiter's destruction, on the thread that observed the flag.
        drop(waiter);
    }

    /// Whether the background thread is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Requests sitting in the pending FIFO (not yet drained into a batch).
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Workers currently published in the waiter map.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.shared.core.lock().waiters.len()
    }

    /// Recent releases, oldest first.
    #[must_use]
    pub fn release_log(&self) -> Vec<ReleaseEvent> {
        self.shared.core.lock().releases.snapshot_ordered()
    }

    /// Clear the release log (tests/diagnostics).
    pub fn clear_release_log(&self) {
        self.shared.core.lock().releases.clear();
    }

    /// Point-in-time counter snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SchedulerMetricsSnapshot {
        SchedulerMetricsSnapshot {
            requests_total: self.shared.metrics.requests_total.load(Ordering::Relaxed),
            released_total: self.shared.metrics.released_total.load(Ordering::Relaxed),
            force_released_total: self
                .shared
                .metrics
                .force_released_total
                .load(Ordering::Relaxed),
            epochs_total: self.shared.metrics.epochs_total.load(Ordering::Relaxed),
        }
    }
}

impl Drop for EpochScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Scheduler thread
// ---------------------------------------------------------------------------

fn run(shared: &Shared, epoch: Duration) {
    tracing::debug!(target: "isofuzz.scheduler", "scheduler thread running");
    while shared.running.load(Ordering::Acquire) {
        if shared.phase.load(Ordering::Relaxed) == PHASE_COLLECTING {
            collect(shared, epoch);
        } else {
            drain_one(shared);
        }
    }
    tracing::debug!(target: "isofuzz.scheduler", "scheduler thread exiting");
}

/// COLLECTING: wait out the epoch window, then move the pending FIFO into
/// the heap. No release ever happens in this phase.
fn collect(shared: &Shared, epoch: Duration) {
    {
        let mut stop = shared.stop.lock();
        if !*stop {
            let _ = shared.stop_cv.wait_for(&mut stop, epoch);
        }
        if *stop {
            return;
        }
    }

    let batch: Vec<QueueEntry> = {
        let mut pending = shared.pending.lock();
        if pending.is_empty() {
            return;
        }
        pending.drain(..).collect()
    };

    let mut core = shared.core.lock();
    let batch_len = batch.len();
    for entry in batch {
        core.heap.push(Reverse(entry));
    }
    core.epoch_index += 1;
    let epoch_index = core.epoch_index;
    // The phase write pairs with this mutex acquisition; relaxed is enough.
    shared.phase.store(PHASE_DRAINING, Ordering::Relaxed);
    drop(core);

    shared.metrics.epochs_total.fetch_add(1, Ordering::Relaxed);
    tracing::debug!(
        target: "isofuzz.scheduler",
        epoch = epoch_index,
        batch = batch_len,
        "epoch batch collected"
    );
}

/// DRAINING: release the minimum-priority entry, or flip back to
/// COLLECTING when the batch is exhausted.
fn drain_one(shared: &Shared) {
    let mut core = shared.core.lock();
    let Some(Reverse(entry)) = core.heap.pop() else {
        shared.phase.store(PHASE_COLLECTING, Ordering::Relaxed);
        return;
    };

    let waiter = core.waiters.remove(&entry.lib_id.get());
    if waiter.is_some() {
        let event = ReleaseEvent {
            epoch: core.epoch_index,
            lib_id: entry.lib_id,
            priority: entry.priority,
        };
        core.releases.push(event);
    }
    drop(core);

    match waiter {
        Some(waiter) => {
            // Count first: the signal below is what lets the worker return,
            // so a worker that reads the counter right after `request` must
            // already see its own release.
            shared.metrics.released_total.fetch_add(1, Ordering::Relaxed);
            waiter.signal();
        }
        None => {
            // Every queued entry is supposed to have a published waiter.
            tracing::error!(
                target: "isofuzz.scheduler",
                lib_id = entry.lib_id.get(),
                "queued request has no waiter"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
