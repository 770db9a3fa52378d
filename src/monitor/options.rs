//! Per-run monitor configuration and its validation

use super::queue::QueuePolicy;
use crate::error::MonitorError;
use std::time::Duration;

/// Option key for the delay between readings
pub const SENSOR_PERIOD_OPTION: &str = "sensorPeriod";
/// Option key for the thing identifier
pub const THING_NAME_OPTION: &str = "thingName";
/// Option key for the publication topic
pub const TOPIC_NAME_OPTION: &str = "topicName";

/// Optional deadlines for the three external calls the loop makes.
///
/// `None` means wait indefinitely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationTimeouts {
    pub connect: Option<Duration>,
    pub read: Option<Duration>,
    pub publish: Option<Duration>,
}

/// Options handed to [`Monitor::start`](super::Monitor::start).
///
/// The three mandatory values are `Option`s so a partially filled set (from a
/// config file or CLI merge) can be passed through and rejected by `start()`
/// with the name of the missing key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorOptions {
    pub sensor_period: Option<Duration>,
    pub thing_name: Option<String>,
    pub topic_name: Option<String>,
    pub queue_policy: QueuePolicy,
    pub timeouts: OperationTimeouts,
    /// Let `stop()` cut the end-of-cycle delay short instead of waiting it out
    pub interruptible_delay: bool,
}

impl MonitorOptions {
    pub fn new<N: Into<String>, T: Into<String>>(
        sensor_period: Duration,
        thing_name: N,
        topic_name: T,
    ) -> Self {
        Self {
            sensor_period: Some(sensor_period),
            thing_name: Some(thing_name.into()),
            topic_name: Some(topic_name.into()),
            ..Default::default()
        }
    }

    pub fn with_queue_policy(mut self, queue_policy: QueuePolicy) -> Self {
        self.queue_policy = queue_policy;
        self
    }

    pub fn with_timeouts(mut self, timeouts: OperationTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_interruptible_delay(mut self, interruptible: bool) -> Self {
        self.interruptible_delay = interruptible;
        self
    }

    /// Check the mandatory keys in order; zero periods and empty strings count as missing
    pub(crate) fn validate(&self) -> Result<RunOptions, MonitorError> {
        let sensor_period = self
            .sensor_period
            .filter(|period| !period.is_zero())
            .ok_or_else(|| MonitorError::missing_option(SENSOR_PERIOD_OPTION))?;
        let thing_name = non_empty(&self.thing_name)
            .ok_or_else(|| MonitorError::missing_option(THING_NAME_OPTION))?;
        let topic_name = non_empty(&self.topic_name)
            .ok_or_else(|| MonitorError::missing_option(TOPIC_NAME_OPTION))?;

        Ok(RunOptions {
            sensor_period,
            thing_name,
            topic_name,
            queue_policy: self.queue_policy,
            timeouts: self.timeouts,
            interruptible_delay: self.interruptible_delay,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|s| !s.is_empty()).cloned()
}

/// Validated options used by the running loop
#[derive(Debug, Clone)]
pub(crate) struct RunOptions {
    pub sensor_period: Duration,
    pub thing_name: String,
    pub topic_name: String,
    pub queue_policy: QueuePolicy,
    pub timeouts: OperationTimeouts,
    pub interruptible_delay: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> MonitorOptions {
        MonitorOptions::new(Duration::from_millis(10), "thing", "topic")
    }

    #[test]
    fn test_valid_options() {
        let run = valid().validate().unwrap();
        assert_eq!(run.sensor_period, Duration::from_millis(10));
        assert_eq!(run.thing_name, "thing");
        assert_eq!(run.topic_name, "topic");
        assert_eq!(run.timeouts, OperationTimeouts::default());
        assert!(!run.interruptible_delay);
    }

    #[test]
    fn test_each_missing_key_is_named() {
        let cases = [
            (
                MonitorOptions {
                    sensor_period: None,
                    ..valid()
                },
                SENSOR_PERIOD_OPTION,
            ),
            (
                MonitorOptions {
                    thing_name: None,
                    ..valid()
                },
                THING_NAME_OPTION,
            ),
            (
                MonitorOptions {
                    topic_name: None,
                    ..valid()
                },
                TOPIC_NAME_OPTION,
            ),
        ];

        for (options, key) in cases {
            let err = options.validate().unwrap_err();
            assert_eq!(err.to_string(), format!("Required option '{key}' is missing"));
        }
    }

    #[test]
    fn test_zero_period_and_empty_strings_count_as_missing() {
        let zero = MonitorOptions {
            sensor_period: Some(Duration::ZERO),
            ..valid()
        };
        assert!(zero.validate().unwrap_err().to_string().contains("sensorPeriod"));

        let empty = MonitorOptions {
            topic_name: Some(String::new()),
            ..valid()
        };
        assert!(empty.validate().unwrap_err().to_string().contains("topicName"));
    }

    #[test]
    fn test_first_missing_key_wins() {
        let err = MonitorOptions::default().validate().unwrap_err();
        assert!(err.to_string().contains("sensorPeriod"));
    }
}
