//! The monitoring loop
//!
//! A [`Monitor`] owns one broker, one sensor and one clock. `start()` connects
//! once, then repeats drain-queue, read, publish, delay until stopped.
//!
//! The retry queue is only touched from inside the loop, so no locking is
//! needed. The only cross-task interaction is the stop flag, carried on a
//! `tokio::sync::watch` channel and exposed through [`StopHandle`].

use crate::broker::Broker;
use crate::clock::{Clock, SystemClock};
use crate::error::{MonitorError, MonitorResult};
use crate::observability::metrics::MonitorMetrics;
use crate::reading::{enrich, Reading};
use crate::sensor::Sensor;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

pub mod options;
pub mod queue;

pub use options::{MonitorOptions, OperationTimeouts};
pub use queue::{OverflowPolicy, QueuePolicy, RetryQueue};

use options::RunOptions;

/// Lifecycle of a monitor instance. There is no way back to `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    NotStarted,
    Running,
    Stopped,
}

impl MonitorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorState::NotStarted => "not started",
            MonitorState::Running => "running",
            MonitorState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cloneable handle that asks a monitor to stop.
///
/// Safe to use from signal handlers and other tasks. It only sets a flag; the
/// loop notices it at the top of the next iteration, so the current cycle and
/// its delay finish first unless the delay is interruptible.
#[derive(Debug, Clone)]
pub struct StopHandle {
    stop_tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_stop_requested(&self) -> bool {
        *self.stop_tx.borrow()
    }
}

/// Polls a sensor and publishes every reading with at-least-once delivery
pub struct Monitor<B, S, C = SystemClock>
where
    B: Broker,
    S: Sensor,
    C: Clock,
{
    broker: B,
    sensor: S,
    clock: C,
    queue: RetryQueue,
    state: MonitorState,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
    metrics: Arc<MonitorMetrics>,
}

impl<B, S> Monitor<B, S, SystemClock>
where
    B: Broker,
    S: Sensor,
{
    /// Create a monitor that uses the system clock
    pub fn new(broker: B, sensor: S) -> Self {
        Self::with_clock(broker, sensor, SystemClock)
    }
}

impl<B, S, C> Monitor<B, S, C>
where
    B: Broker,
    S: Sensor,
    C: Clock,
{
    pub fn with_clock(broker: B, sensor: S, clock: C) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            broker,
            sensor,
            clock,
            queue: RetryQueue::default(),
            state: MonitorState::NotStarted,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
            metrics: Arc::new(MonitorMetrics::new()),
        }
    }

    /// Share a metrics collector with the health server
    pub fn with_metrics(mut self, metrics: Arc<MonitorMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<MonitorMetrics> {
        &self.metrics
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop_tx: self.stop_tx.clone(),
        }
    }

    /// Request loop termination; see [`StopHandle::stop`]
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Snapshot of readings still awaiting a successful publish, oldest first
    pub fn queued_readings(&self) -> Vec<Reading> {
        self.queue.snapshot()
    }

    /// Seed the retry queue before `start()`, replacing its contents
    pub fn preload_readings_queue<I>(&mut self, readings: I)
    where
        I: IntoIterator<Item = Reading>,
    {
        let dropped = self.queue.replace(readings);
        self.record_dropped(dropped);
    }

    /// Validate options, connect once, then run the loop until stopped.
    ///
    /// Resolves only after the loop has exited. Fails without connecting when
    /// an option is missing, and without reading when the connect fails.
    pub async fn start(&mut self, options: MonitorOptions) -> MonitorResult<()> {
        if self.state != MonitorState::NotStarted {
            return Err(MonitorError::AlreadyStarted { state: self.state });
        }

        let options = options.validate().map_err(|e| {
            error!(error = %e, "Invalid monitor options");
            e
        })?;

        let dropped = self.queue.set_policy(options.queue_policy);
        self.record_dropped(dropped);

        let span = crate::lifecycle_span!(
            "connect",
            broker = self.broker.id(),
            thing_name = %options.thing_name
        );
        self.connect(&options).instrument(span).await?;

        self.set_state(MonitorState::Running);
        info!(
            thing_name = %options.thing_name,
            topic = %options.topic_name,
            sensor_period_ms = options.sensor_period.as_millis() as u64,
            broker = self.broker.id(),
            sensor = self.sensor.id(),
            queued = self.queue.len(),
            "Monitor running"
        );

        let mut cycle: u64 = 0;
        while !self.stop_requested() {
            cycle += 1;
            let span = crate::cycle_span!(cycle, thing_name = %options.thing_name);
            self.run_cycle(&options).instrument(span).await;
        }

        self.set_state(MonitorState::Stopped);
        info!(cycles = cycle, queued = self.queue.len(), "Monitor stopped");
        Ok(())
    }

    async fn connect(&mut self, options: &RunOptions) -> MonitorResult<()> {
        self.metrics.connection_attempted();
        let limit = options.timeouts.connect;

        let result = match within(limit, self.broker.connect()).await {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(MonitorError::connect_failed(e)),
            None => Err(MonitorError::connect_failed(timeout_message(
                "broker connection",
                limit,
            ))),
        };

        match &result {
            Ok(()) => {
                self.metrics.set_broker_connected(true);
                info!(broker = self.broker.id(), "Broker connected");
            }
            Err(e) => {
                self.metrics.set_broker_connected(false);
                error!(error = %e, "Monitor failed to start");
            }
        }
        result
    }

    async fn run_cycle(&mut self, options: &RunOptions) {
        self.metrics.cycle_started();

        self.drain_queue(options).await;

        let reading = self.take_reading(options).await;
        self.publish_or_enqueue(options, reading).await;

        self.metrics.set_broker_connected(self.broker.is_connected());
        self.wait_for_next_cycle(options).await;
    }

    /// One republish pass over the whole queue, oldest first
    async fn drain_queue(&mut self, options: &RunOptions) {
        if self.queue.is_empty() {
            return;
        }

        let pending = self.queue.take_all();
        let attempted = pending.len();
        let mut requeue = Vec::new();

        for reading in pending {
            if let Err(cause) = self.try_publish(options, &reading).await {
                debug!(%cause, "Queued reading still not accepted by broker");
                requeue.push(reading);
            }
        }

        let remaining = requeue.len();
        let dropped = self.queue.restore(requeue);
        self.record_dropped(dropped);
        self.metrics.set_queue_depth(self.queue.len());

        if remaining == 0 {
            info!(republished = attempted, "Retry queue drained");
        } else {
            warn!(
                republished = attempted - remaining,
                remaining, "Retry queue partially drained"
            );
        }
    }

    async fn take_reading(&self, options: &RunOptions) -> Reading {
        let limit = options.timeouts.read;
        let result = match within(limit, self.sensor.read()).await {
            Some(Ok(reading)) => Ok(reading),
            Some(Err(e)) => Err(e.to_string()),
            None => Err(timeout_message("sensor read", limit)),
        };

        if let Err(cause) = &result {
            warn!(sensor = self.sensor.id(), %cause, "Sensor read failed");
            self.metrics.read_failed();
        }

        let reading = enrich(result, &options.thing_name, self.clock.now());
        self.metrics.reading_taken(reading.time().unwrap_or_default());
        reading
    }

    async fn publish_or_enqueue(&mut self, options: &RunOptions, reading: Reading) {
        match self.try_publish(options, &reading).await {
            Ok(()) => debug!(topic = %options.topic_name, "Reading published"),
            Err(cause) => {
                warn!(%cause, "Publish failed, reading queued for retry");
                if let Some(dropped) = self.queue.push(reading) {
                    self.record_dropped(vec![dropped]);
                }
                self.metrics.set_queue_depth(self.queue.len());
            }
        }
    }

    async fn try_publish(&self, options: &RunOptions, reading: &Reading) -> Result<(), String> {
        let limit = options.timeouts.publish;
        let result = match within(limit, self.broker.publish(&options.topic_name, reading)).await
        {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(e.to_string()),
            None => Err(timeout_message("publish", limit)),
        };

        match result {
            Ok(()) => self.metrics.publish_succeeded(),
            Err(_) => self.metrics.publish_failed(),
        }
        result
    }

    /// End-of-cycle delay. A stop request is honoured at the top of the next
    /// iteration unless the delay was configured as interruptible.
    async fn wait_for_next_cycle(&self, options: &RunOptions) {
        if !options.interruptible_delay {
            self.clock.sleep(options.sensor_period).await;
            return;
        }

        let mut stop_rx = self.stop_rx.clone();
        tokio::select! {
            _ = self.clock.sleep(options.sensor_period) => {}
            _ = stop_rx.changed() => {
                debug!("Stop requested during cycle delay");
            }
        }
    }

    fn stop_requested(&self) -> bool {
        *self.stop_rx.borrow()
    }

    fn set_state(&mut self, state: MonitorState) {
        self.state = state;
        self.metrics.set_state(state);
    }

    fn record_dropped(&self, dropped: Vec<Reading>) {
        if dropped.is_empty() {
            return;
        }
        warn!(
            dropped = dropped.len(),
            max_depth = ?self.queue.policy().max_depth,
            overflow = ?self.queue.policy().overflow,
            "Retry queue full, readings discarded"
        );
        self.metrics.readings_dropped(dropped.len() as u64);
        self.metrics.set_queue_depth(self.queue.len());
    }
}

impl<B, S, C> fmt::Debug for Monitor<B, S, C>
where
    B: Broker,
    S: Sensor,
    C: Clock,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("state", &self.state)
            .field("broker", &self.broker.id())
            .field("sensor", &self.sensor.id())
            .field("queued", &self.queue.len())
            .field("stop_requested", &self.stop_requested())
            .finish()
    }
}

/// Await `future`, giving up after `limit` if one is set
async fn within<F, T>(limit: Option<Duration>, future: F) -> Option<T>
where
    F: Future<Output = T>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, future).await.ok(),
        None => Some(future.await),
    }
}

fn timeout_message(operation: &str, limit: Option<Duration>) -> String {
    let millis = limit.map(|l| l.as_millis()).unwrap_or_default();
    format!("{operation} timed out after {millis}ms")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(MonitorState::NotStarted.to_string(), "not started");
        assert_eq!(MonitorState::Running.to_string(), "running");
        assert_eq!(MonitorState::Stopped.to_string(), "stopped");
    }

    #[test]
    fn test_timeout_message() {
        assert_eq!(
            timeout_message("publish", Some(Duration::from_millis(1500))),
            "publish timed out after 1500ms"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_within_times_out() {
        let result = within(Some(Duration::from_millis(10)), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            1
        })
        .await;
        assert_eq!(result, None);

        let result = within(None, async { 2 }).await;
        assert_eq!(result, Some(2));
    }

    #[test]
    fn test_debug_shows_state_and_adapters() {
        use crate::testing::{BrokerSpy, SensorSpy};

        let monitor = Monitor::new(BrokerSpy::new(), SensorSpy::new());
        let debug = format!("{monitor:?}");

        assert!(debug.contains("NotStarted"));
        assert!(debug.contains("\"spy\""));
        assert!(debug.contains("queued: 0"));
    }

    #[test]
    fn test_stop_handle_sets_flag() {
        let (tx, _rx) = watch::channel(false);
        let handle = StopHandle {
            stop_tx: Arc::new(tx),
        };
        assert!(!handle.is_stop_requested());

        handle.stop();
        handle.stop();
        assert!(handle.is_stop_requested());
    }
}
