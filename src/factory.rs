//! Adapter registry: builds monitors from broker and sensor identifiers
//!
//! The set of adapters is closed. Identifiers come from the CLI or the config
//! file, so parsing them is where unknown values are rejected.

use crate::broker::mqtt::MqttBrokerOptions;
use crate::broker::{BrokerAdapter, BrokerError, MqttBroker, TestBroker};
use crate::monitor::Monitor;
use crate::sensor::script::DEFAULT_INTERPRETER;
use crate::sensor::{ScriptSensor, SensorAdapter, SensorError, TestSensor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

/// Option key for the broker URL, required by the mqtt broker
pub const BROKER_ADDRESS_OPTION: &str = "brokerAddress";
/// Option key for the client id, required by the mqtt broker
pub const THING_NAME_OPTION: &str = "thingName";

/// Monitor built by [`AdapterFactory::create_monitor`]
pub type AdapterMonitor = Monitor<BrokerAdapter, SensorAdapter>;

#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("Invalid Broker Id '{0}'")]
    InvalidBrokerId(String),

    #[error("Invalid Sensor Id '{0}'")]
    InvalidSensorId(String),

    #[error("Required option '{0}' is missing")]
    MissingOption(&'static str),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Sensor(#[from] SensorError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    Test,
    Mqtt,
}

impl BrokerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerKind::Test => "test",
            BrokerKind::Mqtt => "mqtt",
        }
    }
}

impl FromStr for BrokerKind {
    type Err = FactoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "test" => Ok(BrokerKind::Test),
            "mqtt" => Ok(BrokerKind::Mqtt),
            other => Err(FactoryError::InvalidBrokerId(other.to_string())),
        }
    }
}

impl fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Test,
    Dht22,
}

impl SensorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Test => "test",
            SensorKind::Dht22 => "dht22",
        }
    }
}

impl FromStr for SensorKind {
    type Err = FactoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "test" => Ok(SensorKind::Test),
            "dht22" => Ok(SensorKind::Dht22),
            other => Err(FactoryError::InvalidSensorId(other.to_string())),
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-adapter settings; each adapter reads only the fields it needs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterOptions {
    pub thing_name: Option<String>,
    pub broker_address: Option<String>,
    pub log_file: Option<PathBuf>,
    pub tls_ca_path: Option<PathBuf>,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
    pub sensor_script_path: Option<PathBuf>,
    pub sensor_interpreter: Option<String>,
}

/// One `create_monitor` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FactoryJournalEntry {
    pub command: &'static str,
    pub broker: BrokerKind,
    pub sensor: SensorKind,
}

/// Caller-owned adapter registry
#[derive(Debug, Default)]
pub struct AdapterFactory {
    journal: Vec<FactoryJournalEntry>,
}

impl AdapterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_broker(
        &self,
        kind: BrokerKind,
        options: &AdapterOptions,
    ) -> Result<BrokerAdapter, FactoryError> {
        match kind {
            BrokerKind::Test => {
                let broker = match &options.log_file {
                    Some(path) => TestBroker::with_log_file(path.clone()),
                    None => TestBroker::new(),
                };
                Ok(BrokerAdapter::Test(broker))
            }
            BrokerKind::Mqtt => {
                let address = non_empty(options.broker_address.as_deref())
                    .ok_or(FactoryError::MissingOption(BROKER_ADDRESS_OPTION))?;
                let thing_name = non_empty(options.thing_name.as_deref())
                    .ok_or(FactoryError::MissingOption(THING_NAME_OPTION))?;

                let mut mqtt_options = MqttBrokerOptions::new(thing_name);
                mqtt_options.ca_path = options.tls_ca_path.clone();
                mqtt_options.cert_path = options.tls_cert_path.clone();
                mqtt_options.key_path = options.tls_key_path.clone();

                let broker = MqttBroker::new(address, mqtt_options).map_err(BrokerError::from)?;
                Ok(BrokerAdapter::Mqtt(broker))
            }
        }
    }

    pub async fn create_sensor(
        &self,
        kind: SensorKind,
        options: &AdapterOptions,
    ) -> Result<SensorAdapter, FactoryError> {
        match kind {
            SensorKind::Test => Ok(SensorAdapter::Test(TestSensor::new())),
            SensorKind::Dht22 => {
                let script_path = options.sensor_script_path.clone().unwrap_or_default();
                let interpreter = options
                    .sensor_interpreter
                    .clone()
                    .unwrap_or_else(|| DEFAULT_INTERPRETER.to_string());
                let sensor = ScriptSensor::with_interpreter(script_path, interpreter).await?;
                Ok(SensorAdapter::Script(sensor))
            }
        }
    }

    /// Build both adapters and wrap them in a fresh, not yet started monitor
    pub async fn create_monitor(
        &mut self,
        broker: BrokerKind,
        sensor: SensorKind,
        options: &AdapterOptions,
    ) -> Result<AdapterMonitor, FactoryError> {
        self.journal.push(FactoryJournalEntry {
            command: "create",
            broker,
            sensor,
        });

        let broker_adapter = self.create_broker(broker, options).await?;
        let sensor_adapter = self.create_sensor(sensor, options).await?;

        info!(%broker, %sensor, "Monitor created");
        Ok(Monitor::new(broker_adapter, sensor_adapter))
    }

    pub fn journal(&self) -> &[FactoryJournalEntry] {
        &self.journal
    }

    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
