//! C-ABI entry points for the IsoFuzz sidecar.
//!
//! The host DBMS adapter sees only an opaque transaction pointer and eight
//! functions. Every function is a silent no-op on a null handle and on a
//! missing runtime — instrumentation points must never crash the host.
//!
//! The process-global runtime is created by `isofuzz_init` from the
//! environment (`RANDOM_SEED`, `OUT_FILE`, `ISOFUZZ_EPOCH_MS`) and torn
//! down by `isofuzz_shutdown`; a second `init` without a `shutdown` is a
//! no-op. Handles returned by `isofuzz_trx_begin` stay valid until the
//! matching `isofuzz_trx_end`, which consumes them.
//!
//! Tracing: span `capi` with field `api_func`; call counters per function.

#![allow(unsafe_code, unsafe_op_in_unsafe_fn)]

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use isofuzz_core::{DataObject, DbmsTrxId, IsoFuzz, OpType, SchedulerIntent, TrxHandle};

// ── Global runtime ──────────────────────────────────────────────────

static RUNTIME: Mutex<Option<Arc<IsoFuzz>>> = Mutex::new(None);

fn runtime() -> Option<Arc<IsoFuzz>> {
    RUNTIME.lock().as_ref().map(Arc::clone)
}

// ── Metrics ─────────────────────────────────────────────────────────

static CAPI_INIT: AtomicU64 = AtomicU64::new(0);
static CAPI_SHUTDOWN: AtomicU64 = AtomicU64::new(0);
static CAPI_TRX_BEGIN: AtomicU64 = AtomicU64::new(0);
static CAPI_TRX_COMMIT: AtomicU64 = AtomicU64::new(0);
static CAPI_TRX_PROMOTE: AtomicU64 = AtomicU64::new(0);
static CAPI_TRX_END: AtomicU64 = AtomicU64::new(0);
static CAPI_SCHEDULE_OP: AtomicU64 = AtomicU64::new(0);
static CAPI_LOG_OP: AtomicU64 = AtomicU64::new(0);

/// Per-function call counts across the C surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapiMetricsSnapshot {
    pub init: u64,
    pub shutdown: u64,
    pub trx_begin: u64,
    pub trx_commit: u64,
    pub trx_promote: u64,
    pub trx_end: u64,
    pub schedule_op: u64,
    pub log_op: u64,
}

impl CapiMetricsSnapshot {
    /// Total calls across all entry points.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.init
            + self.shutdown
            + self.trx_begin
            + self.trx_commit
            + self.trx_promote
            + self.trx_end
            + self.schedule_op
            + self.log_op
    }
}

/// Read the per-function call counters.
#[must_use]
pub fn capi_metrics_snapshot() -> CapiMetricsSnapshot {
    CapiMetricsSnapshot {
        init: CAPI_INIT.load(Ordering::Relaxed),
        shutdown: CAPI_SHUTDOWN.load(Ordering::Relaxed),
        trx_begin: CAPI_TRX_BEGIN.load(Ordering::Relaxed),
        trx_commit: CAPI_TRX_COMMIT.load(Ordering::Relaxed),
        trx_promote: CAPI_TRX_PROMOTE.load(Ordering::Relaxed),
        trx_end: CAPI_TRX_END.load(Ordering::Relaxed),
        schedule_op: CAPI_SCHEDULE_OP.load(Ordering::Relaxed),
        log_op: CAPI_LOG_OP.load(Ordering::Relaxed),
    }
}

/// Reset the call counters (tests/diagnostics).
pub fn reset_capi_metrics() {
    CAPI_INIT.store(0, Ordering::Relaxed);
    CAPI_SHUTDOWN.store(0, Ordering::Relaxed);
    CAPI_TRX_BEGIN.store(0, Ordering::Relaxed);
    CAPI_TRX_COMMIT.store(0, Ordering::Relaxed);
    CAPI_TRX_PROMOTE.store(0, Ordering::Relaxed);
    CAPI_TRX_END.store(0, Ordering::Relaxed);
    CAPI_SCHEDULE_OP.store(0, Ordering::Relaxed);
    CAPI_LOG_OP.store(0, Ordering::Relaxed);
}

// ── Opaque handle and object descriptor ─────────────────────────────

/// Opaque transaction handle exposed via C FFI.
///
/// Owns a resolved registry handle plus a reference to the runtime it was
/// begun on, so operations on it survive a concurrent global `shutdown`.
pub struct IsofuzzTrx {
    runtime: Arc<IsoFuzz>,
    handle: TrxHandle,
}

/// C-side description of the database object an operation touched.
#[repr(C)]
pub struct IsofuzzObject {
    /// Table name; must be a valid null-terminated string.
    pub table: *const c_char,
    /// Column name; may be null for whole-row operations.
    pub column: *const c_char,
    /// Row identifier.
    pub row_id: u64,
}

unsafe fn object_from_raw(object: *const IsofuzzObject) -> Option<DataObject> {
    if object.is_null() {
        return None;
    }
    let object = &*object;
    let table = if object.table.is_null() {
        String::new()
    } else {
        CStr::from_ptr(object.table).to_string_lossy().into_owned()
    };
    let column = if object.column.is_null() {
        None
    } else {
        Some(CStr::from_ptr(object.column).to_string_lossy().into_owned())
    };
    Some(DataObject {
        table,
        column,
        row_id: object.row_id,
    })
}

// ── Lifecycle ───────────────────────────────────────────────────────

/// Initialize the sidecar: read the environment, open the trace sink,
/// start the scheduler thread. A second call without an intervening
/// `isofuzz_shutdown` is a no-op.
#[unsafe(no_mangle)]
pub extern "C" fn isofuzz_init() {
    CAPI_INIT.fetch_add(1, Ordering::Relaxed);
    let _span = tracing::info_span!("capi", api_func = "init").entered();

    let mut slot = RUNTIME.lock();
    if slot.is_some() {
        tracing::debug!(target: "isofuzz.capi", "isofuzz_init: already initialized");
        return;
    }
    let runtime = Arc::new(IsoFuzz::from_env());
    runtime.init();
    *slot = Some(runtime);
}

/// Shut down the sidecar: stop the scheduler (waking any parked workers),
/// flush and close the trace sink. Idempotent.
#[unsafe(no_mangle)]
pub extern "C" fn isofuzz_shutdown() {
    CAPI_SHUTDOWN.fetch_add(1, Ordering::Relaxed);
    let _span = tracing::info_span!("capi", api_func = "shutdown").entered();

    let taken = RUNTIME.lock().take();
    match taken {
        Some(runtime) => runtime.shutdown(),
        None => tracing::debug!(target: "isofuzz.capi", "isofuzz_shutdown: not initialized"),
    }
}

// ── Transaction management ──────────────────────────────────────────

/// Register a new transaction and return its opaque handle.
///
/// Returns null when the library is not initialized. The handle is valid
/// until passed to `isofuzz_trx_end`.
#[unsafe(no_mangle)]
pub extern "C" fn isofuzz_trx_begin() -> *mut IsofuzzTrx {
    CAPI_TRX_BEGIN.fetch_add(1, Ordering::Relaxed);
    let _span = tracing::info_span!("capi", api_func = "trx_begin").entered();

    let Some(runtime) = runtime() else {
        return std::ptr::null_mut();
    };
    let handle = runtime.trx_begin();
    Box::into_raw(Box::new(IsofuzzTrx { runtime, handle }))
}

/// Log a COMMIT record for the transaction. Never parks.
///
/// # Safety
/// `trx` must be null or a handle from `isofuzz_trx_begin` that has not
/// been passed to `isofuzz_trx_end`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn isofuzz_trx_commit(trx: *mut IsofuzzTrx) {
    CAPI_TRX_COMMIT.fetch_add(1, Ordering::Relaxed);
    let _span = tracing::info_span!("capi", api_func = "trx_commit").entered();

    if trx.is_null() {
        return;
    }
    let trx = &*trx;
    trx.runtime.trx_commit(&trx.handle);
}

/// Record the permanent DBMS-assigned transaction id and log a PROMOTE
/// record correlating it with the library-local id.
///
/// # Safety
/// `trx` must be null or a live handle from `isofuzz_trx_begin`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn isofuzz_trx_promote(trx: *mut IsofuzzTrx, new_dbms_id: u64) {
    CAPI_TRX_PROMOTE.fetch_add(1, Ordering::Relaxed);
    let _span = tracing::info_span!("capi", api_func = "trx_promote").entered();

    if trx.is_null() {
        return;
    }
    let trx = &*trx;
    trx.runtime.trx_promote(&trx.handle, DbmsTrxId::new(new_dbms_id));
}

/// Unregister the transaction and free the handle. The handle must not be
/// used after this call.
///
/// # Safety
/// `trx` must be null or a handle from `isofuzz_trx_begin` not previously
/// passed to this function.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn isofuzz_trx_end(trx: *mut IsofuzzTrx) {
    CAPI_TRX_END.fetch_add(1, Ordering::Relaxed);
    let _span = tracing::info_span!("capi", api_func = "trx_end").entered();

    if trx.is_null() {
        return;
    }
    let trx = Box::from_raw(trx);
    trx.runtime.trx_end(&trx.handle);
}

// ── Scheduling and logging ──────────────────────────────────────────

/// Submit a scheduling request and park the calling thread until the
/// scheduler grants its turn (or the library shuts down).
///
/// `intent` values follow the header enum: 0 begin, 1 commit, 2 abort,
/// 3 read, 4 write. Unknown values schedule as a read — the intent is
/// informational and not yet consulted.
///
/// # Safety
/// `trx` must be null or a live handle from `isofuzz_trx_begin`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn isofuzz_schedule_op(trx: *mut IsofuzzTrx, intent: c_int) {
    CAPI_SCHEDULE_OP.fetch_add(1, Ordering::Relaxed);
    let _span = tracing::info_span!("capi", api_func = "schedule_op").entered();

    if trx.is_null() {
        return;
    }
    let trx = &*trx;
    let intent = SchedulerIntent::from_raw(intent).unwrap_or(SchedulerIntent::OpRead);
    trx.runtime.schedule_op(&trx.handle, intent);
}

/// Emit one data-operation trace record. Never parks.
///
/// `op_type` values follow the header enum: 0 read, 1 update, 2 insert,
/// 3 delete, 4 promote, 5 begin, 6 commit; anything else logs `UNKNOWN`.
/// `object` may be null for operations with no object attribution.
///
/// # Safety
/// `trx` must be null or a live handle from `isofuzz_trx_begin`. If
/// non-null, `object` must point to a valid `IsofuzzObject` whose string
/// fields are null-terminated (column may be null).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn isofuzz_log_op(
    trx: *mut IsofuzzTrx,
    op_type: c_int,
    object: *const IsofuzzObject,
    last_writer_trx_id: u64,
) {
    CAPI_LOG_OP.fetch_add(1, Ordering::Relaxed);
    let _span = tracing::info_span!("capi", api_func = "log_op").entered();

    if trx.is_null() {
        return;
    }
    let trx = &*trx;
    let op = OpType::from_raw(op_type);
    let object = object_from_raw(object);
    trx.runtime.log_op(&trx.handle, op, object, last_writer_trx_id);
}
