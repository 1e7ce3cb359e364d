//! Logging collaborator
//!
//! Operator-facing lines leave the core through [`LogSink`]. Delivery may be
//! queued (e.g. onto a UI thread); the core never waits for it.

use parking_lot::Mutex;
use std::fmt;

/// What produced a log line.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Console output written by guest code.
    GuestOutput,
    /// Context creation, swaps and teardown.
    Lifecycle,
    /// Any failure surfaced by the host.
    Error,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tag::GuestOutput => "guest",
            Tag::Lifecycle => "lifecycle",
            Tag::Error => "error",
        };
        f.write_str(name)
    }
}

pub trait LogSink: Send + Sync {
    fn log_line(&self, text: &str, tag: Tag);
}

impl<F> LogSink for F
where
    F: Fn(&str, Tag) + Send + Sync,
{
    fn log_line(&self, text: &str, tag: Tag) {
        self(text, tag)
    }
}

/// Forwards every line to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl LogSink for TracingLog {
    fn log_line(&self, text: &str, tag: Tag) {
        match tag {
            Tag::GuestOutput => tracing::info!(target: "hotswap::guest", "{text}"),
            Tag::Lifecycle => tracing::info!(target: "hotswap::lifecycle", "{text}"),
            Tag::Error => tracing::error!(target: "hotswap::error", "{text}"),
        }
    }
}

/// One recorded line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub text: String,
    pub tag: Tag,
}

/// Keeps every line in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemoryLog {
    lines: Mutex<Vec<LogLine>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.lock().clone()
    }

    /// Texts of all lines carrying `tag`.
    pub fn texts(&self, tag: Tag) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter(|line| line.tag == tag)
            .map(|line| line.text.clone())
            .collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|line| line.text.contains(needle))
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl LogSink for MemoryLog {
    fn log_line(&self, text: &str, tag: Tag) {
        self.lines.lock().push(LogLine {
            text: text.to_string(),
            tag,
        });
    }
}
