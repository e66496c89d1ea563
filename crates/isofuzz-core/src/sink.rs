//! Serialized append-only trace sink.
//!
//! One mutex serializes every line against concurrent writers and also
//! guards open/close transitions, so the total order of trace lines equals
//! the order in which callers acquired the sink. Write failures are counted
//! and swallowed — losing trace lines is preferable to aborting the host
//! DBMS mid-transaction.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use isofuzz_error::IsoFuzzError;

/// Which destination the sink is currently writing to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SinkDestination {
    /// Standard output (no `OUT_FILE` configured).
    Stdout,
    /// Standard error (fallback after a failed `OUT_FILE` open).
    Stderr,
    /// The configured trace file, opened for append.
    File,
}

impl SinkDestination {
    /// Diagnostic name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::File => "file",
        }
    }
}

#[derive(Debug)]
enum SinkState {
    Stdout,
    Stderr,
    File(File),
}

impl SinkState {
    const fn destination(&self) -> SinkDestination {
        match self {
            Self::Stdout => SinkDestination::Stdout,
            Self::Stderr => SinkDestination::Stderr,
            Self::File(_) => SinkDestination::File,
        }
    }

    fn write_line(&mut self, line: &str) -> isofuzz_error::Result<()> {
        match self {
            Self::Stdout => writeln!(std::io::stdout(), "{line}")?,
            Self::Stderr => writeln!(std::io::stderr(), "{line}")?,
            Self::File(file) => writeln!(file, "{line}")?,
        }
        Ok(())
    }
}

fn open_append(path: &Path) -> isofuzz_error::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| IsoFuzzError::SinkUnavailable {
            path: path.to_path_buf(),
            source,
        })
}

/// Serializable point-in-time view of sink counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SinkMetricsSnapshot {
    /// Lines successfully appended.
    pub lines_total: u64,
    /// Writes that failed and were swallowed.
    pub write_errors_total: u64,
    /// Whether any `open` has fallen back to stderr. Sticky: `close`
    /// resets the destination but not this flag, so the evidence of a
    /// misconfigured `OUT_FILE` survives teardown.
    pub fallback_engaged: bool,
    /// Current destination.
    pub destination: SinkDestination,
}

impl std::fmt::Display for SinkMetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sink(lines={} errors={} fallback={} dest={})",
            self.lines_total,
            self.write_errors_total,
            self.fallback_engaged,
            self.destination.name()
        )
    }
}

/// The serialized trace sink.
///
/// Counters are relaxed atomics outside the state mutex: readers may
/// observe a stale count but never a torn one.
#[derive(Debug)]
pub struct TraceSink {
    state: Mutex<SinkState>,
    lines_total: AtomicU64,
    write_errors_total: AtomicU64,
    fallback_engaged: AtomicBool,
}

impl TraceSink {
    /// A closed sink pointing at stdout. `open` selects the real
    /// destination.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SinkState::Stdout),
            lines_total: AtomicU64::new(0),
            write_errors_total: AtomicU64::new(0),
            fallback_engaged: AtomicBool::new(false),
        }
    }

    /// Select the destination for subsequent writes.
    ///
    /// `path` set: open for append, falling back to stderr with a one-line
    /// warning on failure. `path` unset: stdout. Re-opening replaces the
    /// previous destination, closing any held file.
    pub fn open(&self, path: Option<&Path>) {
        let mut state = self.state.lock();
        *state = match path {
            None => SinkState::Stdout,
            Some(path) => match open_append(path) {
                Ok(file) => {
                    tracing::debug!(
                        target: "isofuzz.sink",
                        path = %path.display(),
                        "trace sink opened"
                    );
                    SinkState::File(file)
                }
                Err(e) => {
                    // The warning itself goes to stderr: the host may not
                    // have a tracing subscriber installed, and the operator
                    // needs to know the trace moved.
                    eprintln!("isofuzz warning: {e}; logging to stderr");
                    tracing::warn!(
                        target: "isofuzz.sink",
                        error = %e,
                        "trace sink falling back to stderr"
                    );
                    self.fallback_engaged.store(true, Ordering::Relaxed);
                    SinkState::Stderr
                }
            },
        };
    }

    /// Flush and close any held file and reset the destination to stdout.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if let SinkState::File(file) = &mut *state {
            let _ = file.flush();
        }
        *state = SinkState::Stdout;
    }

    /// Append one line (a trailing newline is added), atomically with
    /// respect to concurrent callers. Failures are counted and swallowed.
    pub fn write_line(&self, line: &str) {
        let mut state = self.state.lock();
        let result = state.write_line(line);
        drop(state);
        match result {
            Ok(()) => {
                self.lines_total.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.write_errors_total.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Current destination kind.
    #[must_use]
    pub fn destination(&self) -> SinkDestination {
        self.state.lock().destination()
    }

    /// Point-in-time counter snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SinkMetricsSnapshot {
        SinkMetricsSnapshot {
            lines_total: self.lines_total.load(Ordering::Relaxed),
            write_errors_total: self.write_errors_total.load(Ordering::Relaxed),
            fallback_engaged: self.fallback_engaged.load(Ordering::Relaxed),
            destination: self.destination(),
        }
    }
}

impl Default for TraceSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn starts_on_stdout() {
        let sink = TraceSink::new();
        assert_eq!(sink.destination(), SinkDestination::Stdout);
    }

    #[test]
    fn open_with_path_appends_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.tsv");
        let sink = TraceSink::new();
        sink.open(Some(&path));
        assert_eq!(sink.destination(), SinkDestination::File);

        sink.write_line("a\tb");
        sink.write_line("c\td");
        sink.close();
        assert_eq!(sink.destination(), SinkDestination::Stdout);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "a\tb\nc\td\n");
        assert_eq!(sink.snapshot().lines_total, 2);
    }

    #[test]
    fn reopen_appends_rather_than_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.tsv");
        let sink = TraceSink::new();
        sink.open(Some(&path));
        sink.write_line("first");
        sink.close();
        sink.open(Some(&path));
        sink.write_line("second");
        sink.close();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }

    #[test]
    fn unopenable_path_falls_back_to_stderr() {
        let sink = TraceSink::new();
        assert!(!sink.snapshot().fallback_engaged);
        sink.open(Some(Path::new("/nonexistent-dir/for-sure/trace.tsv")));
        assert_eq!(sink.destination(), SinkDestination::Stderr);
        // Still functional: the write is counted, not lost to a panic.
        sink.write_line("still\talive");
        let snap = sink.snapshot();
        assert_eq!(snap.lines_total, 1);
        assert!(snap.fallback_engaged);

        // The flag is sticky across close, unlike the destination.
        sink.close();
        assert_eq!(sink.destination(), SinkDestination::Stdout);
        assert!(sink.snapshot().fallback_engaged);
    }

    #[test]
    fn concurrent_writers_emit_whole_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.tsv");
        let sink = Arc::new(TraceSink::new());
        sink.open(Some(&path));

        let threads: Vec<_> = (0..8)
            .map(|t| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        sink.write_line(&format!("{t}\t{i}"));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        sink.close();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 400);
        // No interleaved fragments: every line has exactly two fields.
        assert!(lines.iter().all(|l| l.split('\t').count() == 2));
    }
}
