//! Log Multiplexer (C6).
//!
//! Bollard already demultiplexes a container's framed log stream into
//! stdout/stderr chunks for us (and collapses to a single channel for TTY
//! containers), so this module's job is purely: buffer arbitrary byte
//! chunks per category, split on `\r?\n`, drop empty lines, and guarantee
//! the derived line-stream is closed exactly once even if multiple error
//! paths fire concurrently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::sandbox::types::LogCategory;

/// Accumulates partial lines per category until a newline completes them.
#[derive(Default)]
pub struct LineSplitter {
    partial: HashMap<LogCategory, String>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw chunk for `category`, returning any complete, non-empty
    /// lines it produced. Incomplete trailing data is buffered for the next
    /// call.
    pub fn feed(&mut self, category: LogCategory, chunk: &[u8]) -> Vec<String> {
        let text = String::from_utf8_lossy(chunk);
        let buf = self.partial.entry(category).or_default();
        buf.push_str(&text);

        let mut lines = Vec::new();
        loop {
            let Some(idx) = buf.find('\n') else { break };
            let mut line: String = buf.drain(..=idx).collect();
            line.pop(); // trailing '\n'
            if line.ends_with('\r') {
                line.pop();
            }
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// Flush whatever partial line remains for `category` (used on stream
    /// end, where a final line may lack a trailing newline).
    pub fn flush(&mut self, category: LogCategory) -> Option<String> {
        let remainder = self.partial.remove(&category)?;
        let trimmed = remainder.trim_end_matches('\r');
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

/// Idempotent one-shot cleanup guard: the first caller to fire wins, every
/// subsequent call is a no-op, regardless of how many error paths race.
#[derive(Clone, Default)]
pub struct CleanupOnce {
    fired: Arc<AtomicBool>,
}

impl CleanupOnce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time it is called, `false` every time after.
    pub fn fire(&self) -> bool {
        self.fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_lf() {
        let mut splitter = LineSplitter::new();
        let lines = splitter.feed(LogCategory::Stdout, b"hello\nworld\n");
        assert_eq!(lines, vec!["hello".to_string(), "world".to_string()]);
    }

    #[test]
    fn splits_on_crlf() {
        let mut splitter = LineSplitter::new();
        let lines = splitter.feed(LogCategory::Stdout, b"hello\r\nworld\r\n");
        assert_eq!(lines, vec!["hello".to_string(), "world".to_string()]);
    }

    #[test]
    fn drops_empty_lines() {
        let mut splitter = LineSplitter::new();
        let lines = splitter.feed(LogCategory::Stdout, b"a\n\n\nb\n");
        assert_eq!(lines, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn buffers_partial_line_across_calls() {
        let mut splitter = LineSplitter::new();
        assert!(splitter.feed(LogCategory::Stdout, b"par").is_empty());
        let lines = splitter.feed(LogCategory::Stdout, b"tial\n");
        assert_eq!(lines, vec!["partial".to_string()]);
    }

    #[test]
    fn categories_are_independent() {
        let mut splitter = LineSplitter::new();
        splitter.feed(LogCategory::Stdout, b"out-partial");
        let err_lines = splitter.feed(LogCategory::Stderr, b"err\n");
        assert_eq!(err_lines, vec!["err".to_string()]);
        assert_eq!(
            splitter.flush(LogCategory::Stdout),
            Some("out-partial".to_string())
        );
    }

    #[test]
    fn cleanup_fires_exactly_once() {
        let cleanup = CleanupOnce::new();
        assert!(cleanup.fire());
        assert!(!cleanup.fire());
        assert!(!cleanup.fire());
    }
}
