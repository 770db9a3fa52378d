//! Time source for the monitoring loop
//!
//! The monitor never calls the system clock or `tokio::time::sleep` directly,
//! so tests can drive cycles with a fake clock.

use async_trait::async_trait;
use std::time::Duration;

/// Supplies timestamps and the end-of-cycle delay
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current wall-clock time in milliseconds since the Unix epoch
    fn now(&self) -> i64;

    /// Suspend the caller for `period`.
    ///
    /// The monitor races this against its stop signal, so implementations do
    /// not need to watch for cancellation themselves.
    async fn sleep(&self, period: Duration);
}

/// Production clock backed by `chrono` and the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    async fn sleep(&self, period: Duration) {
        tokio::time::sleep(period).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_now_is_epoch_millis() {
        let before = chrono::Utc::now().timestamp_millis();
        let now = SystemClock.now();
        let after = chrono::Utc::now().timestamp_millis();

        assert!(now >= before && now <= after);
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_clock_sleep_waits_for_period() {
        let start = tokio::time::Instant::now();
        SystemClock.sleep(Duration::from_millis(250)).await;

        assert!(start.elapsed() >= Duration::from_millis(250));
    }
}
