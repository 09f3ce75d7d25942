//! Time-ordered request log.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

/// Append-only sequence of timestamps, oldest first.
///
/// Callers must push non-decreasing instants; pruning relies on that order
/// and only ever inspects the front.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeLog {
    entries: VecDeque<DateTime<Utc>>,
}

impl TimeLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a timestamp at the back.
    pub fn push(&mut self, at: DateTime<Utc>) {
        self.entries.push_back(at);
    }

    /// The oldest timestamp, if any.
    pub fn peek(&self) -> Option<DateTime<Utc>> {
        self.entries.front().copied()
    }

    /// Remove and return the oldest timestamp.
    pub fn pop(&mut self) -> Option<DateTime<Utc>> {
        self.entries.pop_front()
    }

    /// Drop every entry older than `window` relative to `now`.
    /// Returns how many were dropped.
    pub fn prune(&mut self, now: DateTime<Utc>, window: Duration) -> usize {
        let mut dropped = 0;
        while let Some(oldest) = self.peek() {
            if now - oldest <= window {
                break;
            }
            self.pop();
            dropped += 1;
        }
        dropped
    }

    /// Number of logged timestamps.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
