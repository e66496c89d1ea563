//! Lifecycle through the C surface.
//!
//! The C API fronts one process-global runtime, so the whole sequence runs
//! as a single staged test: parallel test threads would race the global.

use std::ffi::CString;

use isofuzz_capi::{
    IsofuzzObject, capi_metrics_snapshot, isofuzz_init, isofuzz_log_op, isofuzz_schedule_op,
    isofuzz_shutdown, isofuzz_trx_begin, isofuzz_trx_commit, isofuzz_trx_end, isofuzz_trx_promote,
    reset_capi_metrics,
};

#[test]
fn c_surface_lifecycle() {
    reset_capi_metrics();

    // -- before init: begin yields null, everything else no-ops ---------
    assert!(isofuzz_trx_begin().is_null());
    unsafe {
        isofuzz_trx_commit(std::ptr::null_mut());
        isofuzz_trx_promote(std::ptr::null_mut(), 5);
        isofuzz_schedule_op(std::ptr::null_mut(), 3);
        isofuzz_log_op(std::ptr::null_mut(), 0, std::ptr::null(), 0);
        isofuzz_trx_end(std::ptr::null_mut());
    }
    isofuzz_shutdown(); // not initialized: no-op

    // -- configure via the environment, as the host adapter would -------
    let dir = tempfile::tempdir().unwrap();
    let trace_path = dir.path().join("trace.tsv");
    // SAFETY: single-test binary; nothing else reads these variables.
    unsafe {
        std::env::set_var("OUT_FILE", &trace_path);
        std::env::set_var("ISOFUZZ_EPOCH_MS", "2");
        std::env::set_var("RANDOM_SEED", "42");
    }

    isofuzz_init();
    isofuzz_init(); // second call is a no-op

    // -- one full transaction -------------------------------------------
    let trx = isofuzz_trx_begin();
    assert!(!trx.is_null());

    let table = CString::new("accounts").unwrap();
    let column = CString::new("balance").unwrap();
    let object = IsofuzzObject {
        table: table.as_ptr(),
        column: column.as_ptr(),
        row_id: 42,
    };
    unsafe {
        isofuzz_schedule_op(trx, 3); // OP_READ
        isofuzz_log_op(trx, 0, &object, 7); // READ
        isofuzz_trx_promote(trx, 9999);

        // Whole-row write with no column attribution.
        let row_object = IsofuzzObject {
            table: table.as_ptr(),
            column: std::ptr::null(),
            row_id: 43,
        };
        isofuzz_schedule_op(trx, 4); // OP_WRITE
        isofuzz_log_op(trx, 1, &row_object, 0); // UPDATE

        // Unknown discriminants degrade, never crash.
        isofuzz_log_op(trx, 99, std::ptr::null(), 0);
        isofuzz_schedule_op(trx, 99);

        isofuzz_trx_commit(trx);
        isofuzz_trx_end(trx);
    }

    isofuzz_shutdown();
    isofuzz_shutdown(); // idempotent
    unsafe {
        std::env::remove_var("OUT_FILE");
        std::env::remove_var("ISOFUZZ_EPOCH_MS");
        std::env::remove_var("RANDOM_SEED");
    }

    // -- trace content ---------------------------------------------------
    let content = std::fs::read_to_string(&trace_path).unwrap();
    let lines: Vec<Vec<&str>> = content.lines().map(|l| l.split('\t').collect()).collect();
    assert_eq!(lines.len(), 6, "BEGIN READ PROMOTE UPDATE UNKNOWN COMMIT");

    assert_eq!(&lines[0][1..], &["1", "BEGIN", "N/A", "N/A", "N/A", "0"]);
    assert_eq!(&lines[1][1..], &["1", "READ", "accounts", "balance", "42", "7"]);
    assert_eq!(&lines[2][1..], &["9999", "PROMOTE", "N/A", "N/A", "N/A", "1"]);
    assert_eq!(&lines[3][1..], &["9999", "UPDATE", "accounts", "N/A", "43", "0"]);
    assert_eq!(&lines[4][1..], &["9999", "UNKNOWN", "N/A", "N/A", "N/A", "0"]);
    assert_eq!(&lines[5][1..], &["9999", "COMMIT", "N/A", "N/A", "N/A", "0"]);

    // -- counters ---------------------------------------------------------
    let snap = capi_metrics_snapshot();
    assert_eq!(snap.init, 2);
    assert_eq!(snap.shutdown, 3);
    assert_eq!(snap.trx_begin, 2);
    assert_eq!(snap.schedule_op, 4);
    assert_eq!(snap.log_op, 4);
    assert_eq!(snap.trx_end, 2);
    assert!(snap.total() >= 17);
}
