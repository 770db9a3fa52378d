//! Retry queue for readings the broker has not yet accepted
//!
//! Entries are kept oldest first. The monitor takes the whole queue at the top
//! of a cycle, republishes it in order, and puts back whatever still failed.
//! Growth is bounded by a [`QueuePolicy`].

use crate::reading::Reading;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default upper bound on queued readings
pub const DEFAULT_MAX_QUEUE_DEPTH: usize = 10_000;

/// What to discard when the queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued reading to make room for the new one
    #[default]
    DropOldest,
    /// Keep the queue as is and discard the reading being appended
    DropNewest,
}

/// Bounding policy for the retry queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuePolicy {
    /// Maximum number of queued readings, `None` for unbounded
    #[serde(default = "default_max_depth")]
    pub max_depth: Option<usize>,
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

fn default_max_depth() -> Option<usize> {
    Some(DEFAULT_MAX_QUEUE_DEPTH)
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            max_depth: Some(DEFAULT_MAX_QUEUE_DEPTH),
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

impl QueuePolicy {
    pub fn unbounded() -> Self {
        Self {
            max_depth: None,
            overflow: OverflowPolicy::DropOldest,
        }
    }

    pub fn bounded(max_depth: usize, overflow: OverflowPolicy) -> Self {
        Self {
            max_depth: Some(max_depth),
            overflow,
        }
    }
}

/// Ordered readings awaiting a successful publish, oldest first
#[derive(Debug, Clone, Default)]
pub struct RetryQueue {
    entries: VecDeque<Reading>,
    policy: QueuePolicy,
}

impl RetryQueue {
    pub fn new(policy: QueuePolicy) -> Self {
        Self {
            entries: VecDeque::new(),
            policy,
        }
    }

    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    /// Change the bounding policy, trimming immediately if needed.
    /// Returns the readings that no longer fit.
    pub fn set_policy(&mut self, policy: QueuePolicy) -> Vec<Reading> {
        self.policy = policy;
        self.trim()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a reading at the tail, returning any reading the policy discarded
    pub fn push(&mut self, reading: Reading) -> Option<Reading> {
        match self.policy.max_depth {
            Some(0) => Some(reading),
            Some(max) if self.entries.len() >= max => match self.policy.overflow {
                OverflowPolicy::DropOldest => {
                    let dropped = self.entries.pop_front();
                    self.entries.push_back(reading);
                    dropped
                }
                OverflowPolicy::DropNewest => Some(reading),
            },
            _ => {
                self.entries.push_back(reading);
                None
            }
        }
    }

    /// Remove and return every queued reading, oldest first
    pub fn take_all(&mut self) -> Vec<Reading> {
        self.entries.drain(..).collect()
    }

    /// Put readings back in front of anything queued since they were taken.
    /// Returns the readings that no longer fit.
    pub fn restore(&mut self, readings: Vec<Reading>) -> Vec<Reading> {
        for reading in readings.into_iter().rev() {
            self.entries.push_front(reading);
        }
        self.trim()
    }

    /// Replace the contents wholesale. Returns the readings that did not fit.
    pub fn replace<I: IntoIterator<Item = Reading>>(&mut self, readings: I) -> Vec<Reading> {
        self.entries = readings.into_iter().collect();
        self.trim()
    }

    /// Owned copy of the queue, oldest first
    pub fn snapshot(&self) -> Vec<Reading> {
        self.entries.iter().cloned().collect()
    }

    fn trim(&mut self) -> Vec<Reading> {
        let Some(max) = self.policy.max_depth else {
            return Vec::new();
        };
        if self.entries.len() <= max {
            return Vec::new();
        }

        let excess = self.entries.len() - max;
        match self.policy.overflow {
            OverflowPolicy::DropOldest => self.entries.drain(..excess).collect(),
            OverflowPolicy::DropNewest => self.entries.drain(max..).collect(),
        }
    }
}
