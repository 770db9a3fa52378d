//! Sensor capability and its adapters

use crate::reading::{Reading, ReadingError};
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

pub mod script;
pub mod test_sensor;

pub use script::ScriptSensor;
pub use test_sensor::TestSensor;

/// Sensor trait consumed by the monitor
#[async_trait]
pub trait Sensor: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Take one measurement. The returned reading carries measurement fields
    /// only; the monitor adds the status fields.
    async fn read(&self) -> Result<Reading, Self::Error>;

    /// Short identifier of the adapter variant (`test`, `dht22`)
    fn id(&self) -> &'static str;
}

/// Errors from the built-in sensor adapters
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("Sensor reading script path is required")]
    ScriptPathRequired,

    #[error("Sensor reading script file {} does not exist", .0.display())]
    ScriptNotFound(PathBuf),

    #[error("Sensor reading script file {} is not readable", .0.display())]
    ScriptNotReadable(PathBuf),

    #[error("Failed to run sensor script: {0}")]
    Spawn(#[source] std::io::Error),

    /// Non-zero exit; carries the (truncated) stderr text
    #[error("{0}")]
    ScriptFailed(String),

    #[error("Python script did not return json. Return value was '{0}'")]
    InvalidOutput(String),

    #[error("Sensor output is not a reading: {0}")]
    NotAReading(#[from] ReadingError),

    #[error("Sensor read failed: {0}")]
    Failed(String),
}

impl SensorError {
    pub fn failed<S: Into<String>>(message: S) -> Self {
        Self::Failed(message.into())
    }
}

/// One of the built-in sensor adapters, chosen at startup by the factory
#[derive(Debug)]
pub enum SensorAdapter {
    Test(TestSensor),
    Script(ScriptSensor),
}

#[async_trait]
impl Sensor for SensorAdapter {
    type Error = SensorError;

    async fn read(&self) -> Result<Reading, Self::Error> {
        match self {
            SensorAdapter::Test(sensor) => sensor.read().await,
            SensorAdapter::Script(sensor) => sensor.read().await,
        }
    }

    fn id(&self) -> &'static str {
        match self {
            SensorAdapter::Test(sensor) => sensor.id(),
            SensorAdapter::Script(sensor) => sensor.id(),
        }
    }
}
