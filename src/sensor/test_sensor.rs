//! Fixed-value sensor for running the monitor without hardware

use super::{Sensor, SensorError};
use crate::reading::Reading;
use async_trait::async_trait;

/// Humidity reported by [`TestSensor`]
pub const TEST_HUMIDITY: f64 = 54.3;

#[derive(Debug, Default, Clone)]
pub struct TestSensor;

impl TestSensor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Sensor for TestSensor {
    type Error = SensorError;

    async fn read(&self) -> Result<Reading, Self::Error> {
        Ok(Reading::new().with("humidity", TEST_HUMIDITY))
    }

    fn id(&self) -> &'static str {
        "test"
    }
}
