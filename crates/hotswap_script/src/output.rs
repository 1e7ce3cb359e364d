//! Line buffering of guest console output
//!
//! Every [`ExecutionContext`](crate::ExecutionContext) owns exactly one sink,
//! so output from two generations can never end up in the same buffer.

use crate::log::{LogSink, Tag};
use std::sync::Arc;

/// Turns a raw append-only byte stream into labelled log lines.
///
/// Buffering is byte-wise, so a multi-byte UTF-8 character split across two
/// writes is reassembled before decoding.
pub struct OutputSink {
    label: String,
    buffer: Vec<u8>,
    log: Arc<dyn LogSink>,
}

impl OutputSink {
    pub fn new(label: impl Into<String>, log: Arc<dyn LogSink>) -> Self {
        Self {
            label: label.into(),
            buffer: Vec::new(),
            log,
        }
    }

    pub fn write(&mut self, chunk: &[u8]) {
        let mut rest = chunk;
        while let Some(end) = rest.iter().position(|&b| b == b'\n') {
            self.buffer.extend_from_slice(&rest[..end]);
            self.emit();
            rest = &rest[end + 1..];
        }
        self.buffer.extend_from_slice(rest);
    }

    pub fn write_str(&mut self, chunk: &str) {
        self.write(chunk.as_bytes());
    }

    /// Emit a trailing unterminated line, if any.
    pub fn flush(&mut self) {
        if !self.buffer.is_empty() {
            self.emit();
        }
    }

    /// Bytes written since the last emitted line.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn emit(&mut self) {
        if self.buffer.last() == Some(&b'\r') {
            self.buffer.pop();
        }
        let line = String::from_utf8_lossy(&self.buffer);
        self.log
            .log_line(&format!("{}: {}", self.label, line), Tag::GuestOutput);
        self.buffer.clear();
    }
}

impl Drop for OutputSink {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemoryLog;

    fn sink(label: &str) -> (OutputSink, Arc<MemoryLog>) {
        let log = Arc::new(MemoryLog::new());
        (OutputSink::new(label, log.clone()), log)
    }

    #[test]
    fn test_lines_split_on_newline() {
        let (mut out, log) = sink("JS Console");
        out.write_str("Script loaded");
        assert!(log.lines().is_empty());

        out.write_str(" and ready!\nsecond\r\nthi");
        assert_eq!(
            log.texts(Tag::GuestOutput),
            vec!["JS Console: Script loaded and ready!", "JS Console: second"]
        );
        assert_eq!(out.pending(), 3);
    }

    #[test]
    fn test_flush_emits_partial_line_once() {
        let (mut out, log) = sink("guest");
        out.write_str("tail");
        out.flush();
        out.flush();

        assert_eq!(log.texts(Tag::GuestOutput), vec!["guest: tail"]);
    }

    #[test]
    fn test_empty_lines_are_kept() {
        let (mut out, log) = sink("g");
        out.write_str("\n\n");
        assert_eq!(log.texts(Tag::GuestOutput), vec!["g: ", "g: "]);
    }

    #[test]
    fn test_split_utf8_sequence() {
        let (mut out, log) = sink("g");
        let bytes = "héllo\n".as_bytes();
        out.write(&bytes[..2]);
        out.write(&bytes[2..]);
        assert_eq!(log.texts(Tag::GuestOutput), vec!["g: héllo"]);
    }

    #[test]
    fn test_drop_flushes() {
        let (mut out, log) = sink("g");
        out.write_str("unterminated");
        drop(out);
        assert_eq!(log.texts(Tag::GuestOutput), vec!["g: unterminated"]);
    }

    #[test]
    fn test_concurrent_sinks_never_merge() {
        let log = Arc::new(MemoryLog::new());
        let handles: Vec<_> = ["old", "new"]
            .into_iter()
            .map(|label| {
                let log: Arc<dyn LogSink> = log.clone();
                std::thread::spawn(move || {
                    let mut out = OutputSink::new(label, log);
                    for i in 0..200 {
                        // Two writes per line so partial lines are in flight
                        out.write_str(&format!("{label}-"));
                        out.write_str(&format!("{i}\n"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let lines = log.texts(Tag::GuestOutput);
        assert_eq!(lines.len(), 400);
        for line in lines {
            let (label, body) = line.split_once(": ").unwrap();
            let (prefix, number) = body.split_once('-').unwrap();
            assert_eq!(label, prefix, "merged line: {line}");
            assert!(number.parse::<u32>().is_ok(), "merged line: {line}");
        }
    }
}
