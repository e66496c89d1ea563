//! Shared vocabulary for the IsoFuzz concurrency-fuzzing sidecar.
//!
//! The sidecar emits a line-oriented, tab-separated trace consumed by an
//! external isolation verifier. Every record is one line:
//!
//! ```text
//! <thread>\t<effective_trx_id>\t<op>\t<table|N/A>\t<column|N/A>\t<row|N/A>\t<writer>
//! ```
//!
//! `effective_trx_id` is the DBMS-assigned transaction id once the
//! transaction has been promoted, and the library-local id before that.
//! The final field carries the version-writer id for `READ`/`UPDATE`/
//! `DELETE`, the pre-promotion library id for `PROMOTE`, and `0` otherwise.

use std::fmt;
use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Transaction identifiers
// ---------------------------------------------------------------------------

/// Library-local transaction identifier.
///
/// Assigned at transaction begin, starting at 1, strictly increasing, never
/// reused. Identifies a transaction in scheduler queues and in the trace
/// until the host DBMS promotes it to a permanent id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct TrxLibId(NonZeroU64);

impl TrxLibId {
    /// Create a library id from a raw u64.
    ///
    /// Returns `None` for 0 — id 0 is reserved as the "not yet promoted"
    /// sentinel on the DBMS side and is never a valid library id.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Get the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for TrxLibId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// DBMS-assigned permanent transaction identifier.
///
/// Zero until the host promotes the transaction; the trace attributes
/// records to this id once it is assigned, and to the library id before.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct DbmsTrxId(u64);

impl DbmsTrxId {
    /// The "not yet promoted" sentinel.
    pub const UNASSIGNED: Self = Self(0);

    /// Wrap a raw id. Zero is the unassigned sentinel, not an error.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether the host has assigned a permanent id.
    #[inline]
    #[must_use]
    pub const fn is_assigned(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for DbmsTrxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Scheduler intent
// ---------------------------------------------------------------------------

/// The caller's declared purpose for a scheduling request.
///
/// Accepted by the scheduler but not currently consulted; reserved for
/// feedback-driven priority shaping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchedulerIntent {
    /// About to begin a transaction.
    TxnBegin,
    /// About to commit.
    TxnCommit,
    /// About to abort.
    TxnAbort,
    /// About to read a row.
    OpRead,
    /// About to write a row (covers insert, update, delete).
    OpWrite,
}

impl SchedulerIntent {
    /// Map a C-side discriminant to an intent. Unknown values return `None`.
    #[must_use]
    pub const fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::TxnBegin),
            1 => Some(Self::TxnCommit),
            2 => Some(Self::TxnAbort),
            3 => Some(Self::OpRead),
            4 => Some(Self::OpWrite),
            _ => None,
        }
    }

    /// Human-readable name for diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::TxnBegin => "txn_begin",
            Self::TxnCommit => "txn_commit",
            Self::TxnAbort => "txn_abort",
            Self::OpRead => "op_read",
            Self::OpWrite => "op_write",
        }
    }
}

// ---------------------------------------------------------------------------
// Operation type
// ---------------------------------------------------------------------------

/// The specific operation type recorded in the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpType {
    /// Row read.
    Read,
    /// Row update.
    WriteUpdate,
    /// Row insert.
    WriteInsert,
    /// Row delete.
    WriteDelete,
    /// Promotion of a read-only transaction to a permanent DBMS id.
    TxnPromote,
    /// Transaction begin.
    TxnBegin,
    /// Transaction commit.
    TxnCommit,
    /// Unrecognized discriminant from the C boundary.
    Unknown,
}

impl OpType {
    /// Map a C-side discriminant to an op type. Unknown values map to
    /// [`OpType::Unknown`] so a misbehaving adapter degrades the trace
    /// rather than the host process.
    #[must_use]
    pub const fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Self::Read,
            1 => Self::WriteUpdate,
            2 => Self::WriteInsert,
            3 => Self::WriteDelete,
            4 => Self::TxnPromote,
            5 => Self::TxnBegin,
            6 => Self::TxnCommit,
            _ => Self::Unknown,
        }
    }

    /// Trace spelling of this operation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::WriteUpdate => "UPDATE",
            Self::WriteInsert => "INSERT",
            Self::WriteDelete => "DELETE",
            Self::TxnPromote => "PROMOTE",
            Self::TxnBegin => "BEGIN",
            Self::TxnCommit => "COMMIT",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Whether the final trace field carries a meaningful id for this op:
    /// the version-writer id for reads/updates/deletes, the old library id
    /// for promotions. Inserts create the version they touch, so they
    /// carry `0`.
    #[must_use]
    pub const fn carries_writer(self) -> bool {
        matches!(
            self,
            Self::Read | Self::WriteUpdate | Self::WriteDelete | Self::TxnPromote
        )
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Data object descriptor
// ---------------------------------------------------------------------------

/// The database object a row operation touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataObject {
    /// Table name.
    pub table: String,
    /// Column name; absent for whole-row operations.
    pub column: Option<String>,
    /// Row identifier.
    pub row_id: u64,
}

impl DataObject {
    /// Convenience constructor for a fully-specified object.
    #[must_use]
    pub fn new(table: impl Into<String>, column: impl Into<String>, row_id: u64) -> Self {
        Self {
            table: table.into(),
            column: Some(column.into()),
            row_id,
        }
    }

    /// An object with no column attribution.
    #[must_use]
    pub fn whole_row(table: impl Into<String>, row_id: u64) -> Self {
        Self {
            table: table.into(),
            column: None,
            row_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Inclusive upper bound of the scheduler priority range.
pub const PRIORITY_MAX: u32 = 1_000_000;

/// A scheduler priority drawn uniformly from `[0, PRIORITY_MAX]`.
///
/// Lower priorities release earlier within a drain batch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct Priority(u32);

impl Priority {
    /// Wrap a raw priority value. Values above [`PRIORITY_MAX`] are clamped.
    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        if raw > PRIORITY_MAX {
            Self(PRIORITY_MAX)
        } else {
            Self(raw)
        }
    }

    /// Get the raw value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Trace record
// ---------------------------------------------------------------------------

/// Placeholder for absent object fields in the trace.
pub const FIELD_ABSENT: &str = "N/A";

/// One fully-resolved trace line.
///
/// Construction resolves the final-field policy (`writer`): the caller
/// always passes the raw `last_writer` it received, and the record decides
/// whether the op carries it or logs `0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Library-assigned label of the thread that began the transaction.
    pub thread: u64,
    /// DBMS id if promoted, library id otherwise.
    pub effective_trx_id: u64,
    /// Operation type.
    pub op: OpType,
    /// Object touched; `None` for transaction-lifecycle records.
    pub object: Option<DataObject>,
    /// Final field: writer id, old library id for PROMOTE, else 0.
    pub writer: u64,
}

impl TraceRecord {
    /// Build a record, applying the final-field policy for `op`.
    #[must_use]
    pub fn new(
        thread: u64,
        effective_trx_id: u64,
        op: OpType,
        object: Option<DataObject>,
        last_writer: u64,
    ) -> Self {
        let writer = if op.carries_writer() { last_writer } else { 0 };
        Self {
            thread,
            effective_trx_id,
            op,
            object,
            writer,
        }
    }

    /// Render the tab-separated wire form (no trailing newline).
    #[must_use]
    pub fn render(&self) -> String {
        let mut line = String::with_capacity(64);
        line.push_str(&self.thread.to_string());
        line.push('\t');
        line.push_str(&self.effective_trx_id.to_string());
        line.push('\t');
        line.push_str(self.op.as_str());
        line.push('\t');
        match &self.object {
            Some(obj) => {
                line.push_str(&obj.table);
                line.push('\t');
                line.push_str(obj.column.as_deref().unwrap_or(FIELD_ABSENT));
                line.push('\t');
                line.push_str(&obj.row_id.to_string());
            }
            None => {
                line.push_str(FIELD_ABSENT);
                line.push('\t');
                line.push_str(FIELD_ABSENT);
                line.push('\t');
                line.push_str(FIELD_ABSENT);
            }
        }
        line.push('\t');
        line.push_str(&self.writer.to_string());
        line
    }
}

impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
