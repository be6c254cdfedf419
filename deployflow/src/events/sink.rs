//! Progress sink trait and implementations.

use parking_lot::RwLock;
use std::io::Write;
use tracing::{debug, info, Level};

/// Receives the human-readable progress stream of a run.
///
/// Implementations must never fail the caller: write errors are swallowed.
pub trait ProgressSink: Send + Sync {
    /// Emits one progress line (without trailing newline).
    fn line(&self, line: &str);

    /// Emits a block of text verbatim, such as pod logs.
    fn block(&self, text: &str) {
        for line in text.lines() {
            self.line(line);
        }
    }
}

/// Writes progress lines to standard output.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl ProgressSink for StdoutSink {
    fn line(&self, line: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{line}");
    }

    fn block(&self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        if !text.ends_with('\n') {
            let _ = writeln!(stdout);
        }
    }
}

/// Forwards progress lines to the tracing framework.
#[derive(Debug, Clone)]
pub struct TracingSink {
    level: Level,
}

impl Default for TracingSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl TracingSink {
    /// Creates a sink logging at `level`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }
}

impl ProgressSink for TracingSink {
    fn line(&self, line: &str) {
        if self.level == Level::DEBUG {
            debug!(target: "deployflow::progress", "{}", line);
        } else {
            info!(target: "deployflow::progress", "{}", line);
        }
    }
}

/// A sink that keeps every line, for tests.
#[derive(Debug, Default)]
pub struct CollectingSink {
    lines: RwLock<Vec<String>>,
}

impl CollectingSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected lines.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.read().clone()
    }

    /// Returns everything collected as one newline-joined string.
    #[must_use]
    pub fn output(&self) -> String {
        self.lines.read().join("\n")
    }

    /// Returns true if any line contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.read().iter().any(|l| l.contains(needle))
    }

    /// Position of the first line containing `needle`.
    #[must_use]
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.lines.read().iter().position(|l| l.contains(needle))
    }

    /// Clears all collected lines.
    pub fn clear(&self) {
        self.lines.write().clear();
    }
}

impl ProgressSink for CollectingSink {
    fn line(&self, line: &str) {
        self.lines.write().push(line.to_string());
    }
}
