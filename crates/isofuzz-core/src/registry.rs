//! Transaction registry: library-id allocation and handle resolution.
//!
//! The registry owns a transaction record from `begin` to `end`. Handles
//! are shared references to the record, so an operation that resolved its
//! handle just before a racing `end` still reads a live record; the record
//! is freed when the last in-flight reference drops. The contract stays
//! the one the trace consumers rely on: a handle is valid exactly while its
//! `lib_id` is present in the registry, and using it after `end` is
//! undefined.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use isofuzz_types::{DbmsTrxId, TrxLibId};

/// Process-wide label sequence for trace attribution.
static THREAD_LABEL_SEQUENCE: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_LABEL: u64 = THREAD_LABEL_SEQUENCE.fetch_add(1, Ordering::Relaxed);
}

/// Library-assigned label of the calling thread.
///
/// Stable for the thread's lifetime, compact in the trace, and independent
/// of how the platform formats `std::thread::ThreadId`.
#[must_use]
pub fn current_thread_label() -> u64 {
    THREAD_LABEL.with(|label| *label)
}

// ---------------------------------------------------------------------------
// Transaction record
// ---------------------------------------------------------------------------

/// Per-transaction state owned by the registry.
#[derive(Debug)]
pub struct TrxRecord {
    lib_id: TrxLibId,
    /// DBMS-assigned id; 0 until promotion. Written once by `promote`,
    /// read concurrently by the logger — relaxed suffices, the value is
    /// self-contained.
    dbms_id: AtomicU64,
    thread_label: u64,
}

impl TrxRecord {
    /// The immutable library id.
    #[must_use]
    pub fn lib_id(&self) -> TrxLibId {
        self.lib_id
    }

    /// Label of the thread that began the transaction.
    #[must_use]
    pub fn thread_label(&self) -> u64 {
        self.thread_label
    }

    /// The DBMS id; unassigned until promotion.
    #[must_use]
    pub fn dbms_id(&self) -> DbmsTrxId {
        DbmsTrxId::new(self.dbms_id.load(Ordering::Relaxed))
    }

    /// The id the trace should attribute this transaction to: the DBMS id
    /// once promoted, the library id before that.
    #[must_use]
    pub fn effective_id(&self) -> u64 {
        let dbms_id = self.dbms_id();
        if dbms_id.is_assigned() {
            dbms_id.get()
        } else {
            self.lib_id.get()
        }
    }

    fn promote(&self, new_dbms_id: DbmsTrxId) {
        self.dbms_id.store(new_dbms_id.get(), Ordering::Relaxed);
    }
}

/// A resolved reference to a live transaction record.
///
/// Cheap to clone; the C-ABI layer boxes one of these behind the opaque
/// handle pointer.
#[derive(Debug, Clone)]
pub struct TrxHandle {
    record: Arc<TrxRecord>,
}

impl TrxHandle {
    /// Access the underlying record.
    #[must_use]
    pub fn record(&self) -> &TrxRecord {
        &self.record
    }

    /// Shorthand for the record's library id.
    #[must_use]
    pub fn lib_id(&self) -> TrxLibId {
        self.record.lib_id
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Serializable registry counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryMetricsSnapshot {
    /// Transactions begun.
    pub begun_total: u64,
    /// Transactions ended.
    pub ended_total: u64,
    /// Currently registered transactions.
    pub active: u64,
}

impl std::fmt::Display for RegistryMetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "registry(begun={} ended={} active={})",
            self.begun_total, self.ended_total, self.active
        )
    }
}

/// The transaction registry for one runtime instance.
#[derive(Debug)]
pub struct TrxRegistry {
    records: Mutex<HashMap<u64, Arc<TrxRecord>>>,
    next_lib_id: AtomicU64,
    begun_total: AtomicU64,
    ended_total: AtomicU64,
}

impl TrxRegistry {
    /// An empty registry; library ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            next_lib_id: AtomicU64::new(1),
            begun_total: AtomicU64::new(0),
            ended_total: AtomicU64::new(0),
        }
    }

    /// Register a new transaction and hand out its handle.
    pub fn begin(&self) -> TrxHandle {
        let raw = self.next_lib_id.fetch_add(1, Ordering::Relaxed);
        let lib_id = TrxLibId::new(raw).expect("lib id sequence starts at 1");
        let record = Arc::new(TrxRecord {
            lib_id,
            dbms_id: AtomicU64::new(0),
            thread_label: current_thread_label(),
        });
        self.records.lock().insert(raw, Arc::clone(&record));
        self.begun_total.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            target: "isofuzz.registry",
            lib_id = raw,
            "transaction registered"
        );
        TrxHandle { record }
    }

    /// Unregister a transaction. The handle must not be used afterwards.
    pub fn end(&self, handle: &TrxHandle) {
        let removed = self.records.lock().remove(&handle.lib_id().get());
        if removed.is_some() {
            self.ended_total.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                target: "isofuzz.registry",
                lib_id = handle.lib_id().get(),
                "transaction unregistered"
            );
        }
    }

    /// Store the permanent DBMS id on the record and return the old
    /// library id for trace correlation.
    pub fn promote(&self, handle: &TrxHandle, new_dbms_id: DbmsTrxId) -> TrxLibId {
        handle.record().promote(new_dbms_id);
        tracing::debug!(
            target: "isofuzz.registry",
            lib_id = handle.lib_id().get(),
            dbms_id = new_dbms_id.get(),
            "transaction promoted"
        );
        handle.lib_id()
    }

    /// Whether a library id is currently registered.
    #[must_use]
    pub fn is_registered(&self, lib_id: TrxLibId) -> bool {
        self.records.lock().contains_key(&lib_id.get())
    }

    /// Number of currently registered transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.records.lock().len()
    }

    /// Point-in-time counter snapshot.
    #[must_use]
    pub fn snapshot(&self) -> RegistryMetricsSnapshot {
        RegistryMetricsSnapshot {
            begun_total: self.begun_total.load(Ordering::Relaxed),
            ended_total: self.ended_total.load(Ordering::Relaxed),
            active: self.active_count() as u64,
        }
    }
}

impl Default for TrxRegistry {
    fn default() -> Self {
        Self::new()
    }
}
