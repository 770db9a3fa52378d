//! Test doubles for the broker, sensor and clock capabilities
//!
//! Every double is `Clone` and shares its state between clones, so a test can
//! hand one clone to the monitor and inspect another afterwards.

use crate::broker::Broker;
use crate::clock::Clock;
use crate::monitor::StopHandle;
use crate::reading::Reading;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// Timestamp returned by [`FakeClock::now`] unless overridden
pub const FAKE_NOW: i64 = 1_234_567_890;

pub const CONNECT_FAILURE_MESSAGE: &str = "Failing broker connection for test reasons";
pub const PUBLISH_FAILURE_MESSAGE: &str = "Failing publish for test reasons";
pub const READ_FAILURE_MESSAGE: &str = "Failing read for test purposes";

/// Error raised by the doubles
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{0}")]
pub struct SpyError(pub String);

/// One capability call, as seen by a [`CallJournal`]
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Connect,
    Publish { topic: String, reading: Reading },
    Read,
    Now,
    Sleep(Duration),
}

impl Call {
    pub fn name(&self) -> &'static str {
        match self {
            Call::Connect => "connect",
            Call::Publish { .. } => "publish",
            Call::Read => "read",
            Call::Now => "now",
            Call::Sleep(_) => "sleep",
        }
    }
}

/// Ordered record of calls made across several doubles
#[derive(Debug, Clone, Default)]
pub struct CallJournal {
    calls: Arc<StdMutex<Vec<Call>>>,
}

impl CallJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call: Call) {
        self.entries().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.entries().clone()
    }

    /// Call names in order, e.g. `["connect", "read", "now", "publish", "sleep"]`
    pub fn names(&self) -> Vec<&'static str> {
        self.entries().iter().map(Call::name).collect()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Call>> {
        lock(&self.calls)
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Broker double with switchable failures
#[derive(Debug, Clone, Default)]
pub struct BrokerSpy {
    journal: CallJournal,
    connect_calls: Arc<AtomicUsize>,
    connected: Arc<AtomicBool>,
    fail_connect: bool,
    fail_publish: Arc<AtomicBool>,
    fail_publish_keys: Arc<StdMutex<Vec<String>>>,
    publish_delay: Option<Duration>,
    attempts: Arc<Mutex<Vec<(String, Reading)>>>,
    published: Arc<Mutex<Vec<(String, Reading)>>>,
}

impl BrokerSpy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(mut self, journal: CallJournal) -> Self {
        self.journal = journal;
        self
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Fail every publish until [`set_fail_publish(false)`](Self::set_fail_publish)
    pub fn failing_publish(self) -> Self {
        self.set_fail_publish(true);
        self
    }

    /// Fail publishes of readings containing `key`
    pub fn failing_publish_for_key<S: Into<String>>(self, key: S) -> Self {
        lock(&self.fail_publish_keys).push(key.into());
        self
    }

    /// Sleep this long inside every publish
    pub fn with_publish_delay(mut self, delay: Duration) -> Self {
        self.publish_delay = Some(delay);
        self
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Every publish call, successful or not
    pub async fn publish_attempts(&self) -> Vec<(String, Reading)> {
        self.attempts.lock().await.clone()
    }

    /// Publishes that succeeded, in order
    pub async fn published(&self) -> Vec<(String, Reading)> {
        self.published.lock().await.clone()
    }

    pub async fn published_readings(&self) -> Vec<Reading> {
        self.published
            .lock()
            .await
            .iter()
            .map(|(_, reading)| reading.clone())
            .collect()
    }

    fn should_fail(&self, reading: &Reading) -> bool {
        self.fail_publish.load(Ordering::SeqCst)
            || lock(&self.fail_publish_keys)
                .iter()
                .any(|key| reading.contains_key(key))
    }
}

#[async_trait]
impl Broker for BrokerSpy {
    type Error = SpyError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        self.journal.record(Call::Connect);
        self.connect_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_connect {
            return Err(SpyError(CONNECT_FAILURE_MESSAGE.to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, topic: &str, reading: &Reading) -> Result<(), Self::Error> {
        self.journal.record(Call::Publish {
            topic: topic.to_string(),
            reading: reading.clone(),
        });
        self.attempts
            .lock()
            .await
            .push((topic.to_string(), reading.clone()));

        if let Some(delay) = self.publish_delay {
            tokio::time::sleep(delay).await;
        }

        if self.should_fail(reading) {
            return Err(SpyError(PUBLISH_FAILURE_MESSAGE.to_string()));
        }

        self.published
            .lock()
            .await
            .push((topic.to_string(), reading.clone()));
        Ok(())
    }

    fn id(&self) -> &'static str {
        "spy"
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Sensor double returning `{"num": n}` with n counting reads from 1
#[derive(Debug, Clone, Default)]
pub struct SensorSpy {
    journal: CallJournal,
    reads: Arc<AtomicU64>,
    fail_reads: Arc<AtomicBool>,
    read_delay: Option<Duration>,
    results: Arc<Mutex<Vec<Result<Reading, String>>>>,
}

impl SensorSpy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(mut self, journal: CallJournal) -> Self {
        self.journal = journal;
        self
    }

    pub fn failing_reads(self) -> Self {
        self.set_fail_reads(true);
        self
    }

    /// Sleep this long inside every read
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// What each read returned, in order
    pub async fn all_readings(&self) -> Vec<Result<Reading, String>> {
        self.results.lock().await.clone()
    }
}

#[async_trait]
impl crate::sensor::Sensor for SensorSpy {
    type Error = SpyError;

    async fn read(&self) -> Result<Reading, Self::Error> {
        self.journal.record(Call::Read);
        let num = self.reads.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }

        let result = if self.fail_reads.load(Ordering::SeqCst) {
            Err(READ_FAILURE_MESSAGE.to_string())
        } else {
            Ok(Reading::new().with("num", num))
        };

        self.results.lock().await.push(result.clone());
        result.map_err(SpyError)
    }

    fn id(&self) -> &'static str {
        "spy"
    }
}

/// Clock double: fixed `now`, delays return immediately and are recorded
#[derive(Debug, Clone)]
pub struct FakeClock {
    journal: CallJournal,
    now: i64,
    sleeps: Arc<StdMutex<Vec<Duration>>>,
    stop_after: Arc<StdMutex<Option<(usize, StopHandle)>>>,
}

impl Default for FakeClock {
    fn default() -> Self {
        Self {
            journal: CallJournal::default(),
            now: FAKE_NOW,
            sleeps: Arc::default(),
            stop_after: Arc::default(),
        }
    }
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(mut self, journal: CallJournal) -> Self {
        self.journal = journal;
        self
    }

    pub fn with_now(mut self, now: i64) -> Self {
        self.now = now;
        self
    }

    /// Stop the monitor from inside the `cycles`-th delay
    pub fn stop_after(&self, cycles: usize, handle: StopHandle) {
        *lock(&self.stop_after) = Some((cycles, handle));
    }

    /// Every delay requested so far
    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.sleeps).clone()
    }
}

#[async_trait]
impl Clock for FakeClock {
    fn now(&self) -> i64 {
        self.journal.record(Call::Now);
        self.now
    }

    async fn sleep(&self, period: Duration) {
        self.journal.record(Call::Sleep(period));
        let count = {
            let mut sleeps = lock(&self.sleeps);
            sleeps.push(period);
            sleeps.len()
        };

        if let Some((cycles, handle)) = lock(&self.stop_after).as_ref() {
            if count >= *cycles {
                handle.stop();
            }
        }

        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::Sensor;
    use serde_json::json;

    #[tokio::test]
    async fn test_sensor_spy_counts_reads() {
        let sensor = SensorSpy::new();
        assert_eq!(sensor.read().await.unwrap().get("num"), Some(&json!(1)));
        assert_eq!(sensor.read().await.unwrap().get("num"), Some(&json!(2)));

        sensor.set_fail_reads(true);
        let err = sensor.read().await.unwrap_err();
        assert_eq!(err.to_string(), READ_FAILURE_MESSAGE);
        assert_eq!(sensor.read_count(), 3);
        assert_eq!(sensor.all_readings().await.len(), 3);
    }

    #[tokio::test]
    async fn test_broker_spy_key_failures() {
        let mut broker = BrokerSpy::new().failing_publish_for_key("bad");
        broker.connect().await.unwrap();

        let good = Reading::new().with("good", 1);
        let bad = Reading::new().with("bad", 1);
        broker.publish("t", &good).await.unwrap();
        assert!(broker.publish("t", &bad).await.is_err());

        assert_eq!(broker.published_readings().await, vec![good]);
        assert_eq!(broker.publish_attempts().await.len(), 2);
    }

    #[tokio::test]
    async fn test_broker_spy_clones_share_state() {
        let spy = BrokerSpy::new().failing_connect();
        let mut handed_out = spy.clone();
        let err = handed_out.connect().await.unwrap_err();
        assert_eq!(err.to_string(), CONNECT_FAILURE_MESSAGE);
        assert_eq!(spy.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_journal_orders_calls_across_doubles() {
        let journal = CallJournal::new();
        let mut broker = BrokerSpy::new().with_journal(journal.clone());
        let sensor = SensorSpy::new().with_journal(journal.clone());
        let clock = FakeClock::new().with_journal(journal.clone());

        broker.connect().await.unwrap();
        let reading = sensor.read().await.unwrap();
        clock.now();
        broker.publish("t", &reading).await.unwrap();
        clock.sleep(Duration::from_millis(5)).await;

        assert_eq!(
            journal.names(),
            vec!["connect", "read", "now", "publish", "sleep"]
        );
        journal.clear();
        assert!(journal.calls().is_empty());
    }

    #[tokio::test]
    async fn test_fake_clock_records_sleeps() {
        let clock = FakeClock::new().with_now(42);
        assert_eq!(clock.now(), 42);
        clock.sleep(Duration::from_secs(60)).await;
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(60)]);
    }
}
