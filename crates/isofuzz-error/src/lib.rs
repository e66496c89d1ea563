use std::path::PathBuf;

use thiserror::Error;

/// Internal error type for IsoFuzz operations.
///
/// Instrumentation must never crash the host DBMS, so none of these cross
/// the public entry points: every boundary function swallows its error and
/// degrades the trace instead. Internal plumbing still propagates `Result`
/// so failure sites stay visible in one place.
#[derive(Error, Debug)]
pub enum IsoFuzzError {
    /// The configured trace destination could not be opened.
    #[error("cannot open trace destination '{path}'")]
    SinkUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A write to the trace destination failed.
    #[error("trace write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, IsoFuzzError>;
