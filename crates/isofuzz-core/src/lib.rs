//! Core of the IsoFuzz concurrency-fuzzing sidecar.
//!
//! A host DBMS instruments its transaction lifecycle and per-row operation
//! points and calls into this library. The library deliberately reorders
//! concurrent requests through an epoch-based centralized scheduler and
//! emits a tab-separated execution trace for an external isolation
//! verifier. It enforces no concurrency control of its own and surfaces no
//! errors to the host: a degraded trace always beats a crashed DBMS.

pub mod config;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod sink;

pub use config::{
    Config, DEFAULT_EPOCH, DEFAULT_SEED, ENV_EPOCH_MS, ENV_OUT_FILE, ENV_RANDOM_SEED,
};
pub use registry::{
    RegistryMetricsSnapshot, TrxHandle, TrxRecord, TrxRegistry, current_thread_label,
};
pub use runtime::IsoFuzz;
pub use scheduler::{
    EpochScheduler, RELEASE_LOG_CAPACITY, ReleaseEvent, SchedulerMetricsSnapshot,
};
pub use sink::{SinkDestination, SinkMetricsSnapshot, TraceSink};

pub use isofuzz_types::{
    DataObject, DbmsTrxId, FIELD_ABSENT, OpType, PRIORITY_MAX, Priority, SchedulerIntent,
    TraceRecord, TrxLibId,
};
