//! Thread-safe monitor metrics
//!
//! Atomic counters updated by the monitoring loop and read by the health
//! server. Shared through an `Arc`; there is no global instance.

use crate::monitor::MonitorState;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug)]
pub struct MonitorMetrics {
    cycles: AtomicU64,
    readings_taken: AtomicU64,
    read_failures: AtomicU64,
    publishes_succeeded: AtomicU64,
    publish_failures: AtomicU64,
    readings_dropped: AtomicU64,
    queue_depth: AtomicU64,
    last_reading_time: AtomicI64,
    connection_attempts: AtomicU64,
    broker_connected: AtomicBool,
    state: AtomicU8,
    started_at: AtomicU64,
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    pub fn new() -> Self {
        Self {
            cycles: AtomicU64::new(0),
            readings_taken: AtomicU64::new(0),
            read_failures: AtomicU64::new(0),
            publishes_succeeded: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            readings_dropped: AtomicU64::new(0),
            queue_depth: AtomicU64::new(0),
            last_reading_time: AtomicI64::new(0),
            connection_attempts: AtomicU64::new(0),
            broker_connected: AtomicBool::new(false),
            state: AtomicU8::new(encode_state(MonitorState::NotStarted)),
            started_at: AtomicU64::new(current_timestamp()),
        }
    }

    pub fn cycle_started(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reading_taken(&self, time_ms: i64) {
        self.readings_taken.fetch_add(1, Ordering::Relaxed);
        self.last_reading_time.store(time_ms, Ordering::Relaxed);
    }

    pub fn read_failed(&self) {
        self.read_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_succeeded(&self) {
        self.publishes_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn readings_dropped(&self, count: u64) {
        self.readings_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.store(depth as u64, Ordering::Relaxed);
    }

    pub fn connection_attempted(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_broker_connected(&self, connected: bool) {
        self.broker_connected.store(connected, Ordering::Relaxed);
    }

    pub fn set_state(&self, state: MonitorState) {
        self.state.store(encode_state(state), Ordering::Release);
    }

    pub fn state(&self) -> MonitorState {
        decode_state(self.state.load(Ordering::Acquire))
    }

    pub fn is_broker_connected(&self) -> bool {
        self.broker_connected.load(Ordering::Relaxed)
    }

    /// Running and able to publish
    pub fn is_healthy(&self) -> bool {
        self.state() == MonitorState::Running && self.is_broker_connected()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        MetricsSnapshot {
            timestamp: now,
            uptime_seconds: now.saturating_sub(self.started_at.load(Ordering::Relaxed)),
            state: self.state().as_str().to_string(),
            broker_connected: self.is_broker_connected(),
            cycles: self.cycles.load(Ordering::Relaxed),
            readings_taken: self.readings_taken.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            publishes_succeeded: self.publishes_succeeded.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            readings_dropped: self.readings_dropped.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            last_reading_time: match self.last_reading_time.load(Ordering::Relaxed) {
                0 => None,
                time => Some(time),
            },
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`MonitorMetrics`], served at `/metrics`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub state: String,
    pub broker_connected: bool,
    pub cycles: u64,
    pub readings_taken: u64,
    pub read_failures: u64,
    pub publishes_succeeded: u64,
    pub publish_failures: u64,
    pub readings_dropped: u64,
    pub queue_depth: u64,
    pub last_reading_time: Option<i64>,
    pub connection_attempts: u64,
}

fn encode_state(state: MonitorState) -> u8 {
    match state {
        MonitorState::NotStarted => 0,
        MonitorState::Running => 1,
        MonitorState::Stopped => 2,
    }
}

fn decode_state(value: u8) -> MonitorState {
    match value {
        1 => MonitorState::Running,
        2 => MonitorState::Stopped,
        _ => MonitorState::NotStarted,
    }
}

/// Seconds since the Unix epoch
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = MonitorMetrics::new();
        metrics.cycle_started();
        metrics.cycle_started();
        metrics.reading_taken(1_700_000_000_000);
        metrics.read_failed();
        metrics.publish_succeeded();
        metrics.publish_failed();
        metrics.publish_failed();
        metrics.readings_dropped(3);
        metrics.set_queue_depth(7);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cycles, 2);
        assert_eq!(snapshot.readings_taken, 1);
        assert_eq!(snapshot.read_failures, 1);
        assert_eq!(snapshot.publishes_succeeded, 1);
        assert_eq!(snapshot.publish_failures, 2);
        assert_eq!(snapshot.readings_dropped, 3);
        assert_eq!(snapshot.queue_depth, 7);
        assert_eq!(snapshot.last_reading_time, Some(1_700_000_000_000));
    }

    #[test]
    fn test_state_round_trips_through_atomic() {
        let metrics = MonitorMetrics::new();
        assert_eq!(metrics.state(), MonitorState::NotStarted);
        metrics.set_state(MonitorState::Running);
        assert_eq!(metrics.state(), MonitorState::Running);
        assert_eq!(metrics.snapshot().state, "running");
    }

    #[test]
    fn test_health_requires_running_and_connected() {
        let metrics = MonitorMetrics::new();
        metrics.set_state(MonitorState::Running);
        assert!(!metrics.is_healthy());

        metrics.set_broker_connected(true);
        assert!(metrics.is_healthy());

        metrics.set_state(MonitorState::Stopped);
        assert!(!metrics.is_healthy());
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(MonitorMetrics::new().snapshot()).unwrap();
        assert_eq!(json["state"], "not started");
        assert!(json["last_reading_time"].is_null());
    }
}
