//! The `IsoFuzz` runtime facade: lifecycle plus the eight entry points.
//!
//! One instance owns a trace sink, a transaction registry, and an epoch
//! scheduler. The C-ABI crate holds a process-global instance; tests build
//! their own so suites run isolated runtimes in parallel.
//!
//! Transaction-lifecycle events (begin, commit, promote, end) only log —
//! they never enter the scheduler. Parking those calls can deadlock
//! against the host DBMS's own transaction-management locks, so only the
//! explicit `schedule_op` entry point parks.

use std::sync::atomic::{AtomicBool, Ordering};

use isofuzz_types::{DataObject, DbmsTrxId, OpType, SchedulerIntent, TraceRecord};

use crate::config::Config;
use crate::registry::{TrxHandle, TrxRegistry};
use crate::scheduler::EpochScheduler;
use crate::sink::TraceSink;

/// One embedded fuzzing runtime.
#[derive(Debug)]
pub struct IsoFuzz {
    config: Config,
    sink: TraceSink,
    registry: TrxRegistry,
    scheduler: EpochScheduler,
    running: AtomicBool,
}

impl IsoFuzz {
    /// Build a stopped runtime from explicit configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let scheduler = EpochScheduler::new(config.seed, config.epoch);
        Self {
            config,
            sink: TraceSink::new(),
            registry: TrxRegistry::new(),
            scheduler,
            running: AtomicBool::new(false),
        }
    }

    /// Build a stopped runtime from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(Config::from_env())
    }

    /// Open the sink and start the scheduler. A second call without an
    /// intervening [`shutdown`](Self::shutdown) is a no-op.
    pub fn init(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            tracing::debug!(target: "isofuzz.runtime", "init while running; ignored");
            return;
        }
        self.sink.open(self.config.out_file.as_deref());
        self.scheduler.start();
        tracing::info!(target: "isofuzz.runtime", "isofuzz initialized");
    }

    /// Stop the scheduler (force-releasing parked workers), then flush and
    /// close the sink. Idempotent.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            tracing::debug!(target: "isofuzz.runtime", "shutdown while stopped; ignored");
            return;
        }
        self.scheduler.shutdown();
        self.sink.close();
        tracing::info!(target: "isofuzz.runtime", "isofuzz shut down");
    }

    /// Whether `init` has run without a matching `shutdown`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    // -- transaction lifecycle --------------------------------------------

    /// Register a new transaction and log its BEGIN record.
    pub fn trx_begin(&self) -> TrxHandle {
        let handle = self.registry.begin();
        self.log_record(&handle, OpType::TxnBegin, None, 0);
        handle
    }

    /// Log a COMMIT record. Resource cleanup stays with
    /// [`trx_end`](Self::trx_end), which the host calls after its own
    /// commit or abort completes.
    pub fn trx_commit(&self, handle: &TrxHandle) {
        self.log_record(handle, OpType::TxnCommit, None, 0);
    }

    /// Store the permanent DBMS id and log a PROMOTE record carrying the
    /// old library id in the final field.
    pub fn trx_promote(&self, handle: &TrxHandle, new_dbms_id: DbmsTrxId) {
        let old = self.registry.promote(handle, new_dbms_id);
        self.log_record(handle, OpType::TxnPromote, None, old.get());
    }

    /// Unregister the transaction. The handle must not be used afterwards.
    pub fn trx_end(&self, handle: &TrxHandle) {
        self.registry.end(handle);
    }

    // -- scheduling and logging -------------------------------------------

    /// Park the calling worker until the scheduler grants its turn.
    pub fn schedule_op(&self, handle: &TrxHandle, intent: SchedulerIntent) {
        self.scheduler.request(handle.lib_id(), intent);
    }

    /// Emit one data-operation trace record.
    pub fn log_op(
        &self,
        handle: &TrxHandle,
        op: OpType,
        object: Option<DataObject>,
        last_writer: u64,
    ) {
        self.log_record(handle, op, object, last_writer);
    }

    fn log_record(
        &self,
        handle: &TrxHandle,
        op: OpType,
        object: Option<DataObject>,
        last_writer: u64,
    ) {
        let record = TraceRecord::new(
            handle.record().thread_label(),
            handle.record().effective_id(),
            op,
            object,
            last_writer,
        );
        self.sink.write_line(&record.render());
    }

    // -- diagnostics -------------------------------------------------------

    /// The configuration this runtime was built with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The trace sink (counters, destination).
    #[must_use]
    pub fn sink(&self) -> &TraceSink {
        &self.sink
    }

    /// The transaction registry (counters, active set).
    #[must_use]
    pub fn registry(&self) -> &TrxRegistry {
        &self.registry
    }

    /// The epoch scheduler (counters, release log).
    #[must_use]
    pub fn scheduler(&self) -> &EpochScheduler {
        &self.scheduler
    }
}

impl Drop for IsoFuzz {
    fn drop(&mut self) {
        self.shutdown();
    }
}
