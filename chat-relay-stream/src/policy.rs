//! When buffered text is released to the client
//!
//! Text is flushed as soon as it holds a sentence boundary, or once it has
//! waited longer than the flush interval. Punctuation keeps chunks readable;
//! the interval bounds latency on long runs without punctuation.

use std::time::{Duration, Instant};

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(300);

fn is_boundary(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '\n')
}

/// Hybrid time/punctuation flush rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    interval: Duration,
}

impl FlushPolicy {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Whether `buffer` should be emitted now
    pub fn should_flush(&self, buffer: &str, now: Instant, last_flush: Instant) -> bool {
        self.flush_len(buffer, now, last_flush).is_some()
    }

    /// How many bytes of `buffer` to emit now, if any.
    ///
    /// An expired interval releases the whole buffer. Otherwise the buffer is
    /// cut just after its last sentence boundary, keeping the unfinished
    /// sentence for the next flush.
    pub fn flush_len(&self, buffer: &str, now: Instant, last_flush: Instant) -> Option<usize> {
        if buffer.is_empty() {
            return None;
        }
        if now.saturating_duration_since(last_flush) > self.interval {
            return Some(buffer.len());
        }
        buffer
            .char_indices()
            .filter(|(_, c)| is_boundary(*c))
            .last()
            .map(|(idx, c)| idx + c.len_utf8())
    }
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_FLUSH_INTERVAL)
    }
}
