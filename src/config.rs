//! Configuration file and command line merging
//!
//! Precedence is command line flag, then config file, then built-in default.
//! Every section of the TOML file is optional.

use crate::factory::{AdapterOptions, BrokerKind, SensorKind};
use crate::monitor::{MonitorOptions, OperationTimeouts, QueuePolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default delay between readings, in milliseconds
pub const DEFAULT_SENSOR_PERIOD_MS: u64 = 60_000;
/// Default location of the sensor reading script
pub const DEFAULT_SENSOR_SCRIPT_PATH: &str = "/usr/local/etc/sensor/sensor.py";

/// Full thing configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ThingConfig {
    #[serde(default)]
    pub thing: ThingSection,
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub sensor: SensorSection,
    #[serde(default)]
    pub queue: QueuePolicy,
    #[serde(default)]
    pub timeouts: TimeoutsSection,
    #[serde(default)]
    pub health: HealthSection,
}

/// `[thing]` - identity and publication target
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThingSection {
    /// Thing identifier (must match [a-zA-Z0-9._-]+); also the MQTT client id
    pub name: Option<String>,
    /// Topic readings are published to
    pub topic: Option<String>,
    #[serde(default = "default_sensor_period_ms")]
    pub sensor_period_ms: u64,
    /// Stop without waiting out the current sensor period
    #[serde(default)]
    pub interruptible_delay: bool,
}

impl Default for ThingSection {
    fn default() -> Self {
        Self {
            name: None,
            topic: None,
            sensor_period_ms: DEFAULT_SENSOR_PERIOD_MS,
            interruptible_delay: false,
        }
    }
}

fn default_sensor_period_ms() -> u64 {
    DEFAULT_SENSOR_PERIOD_MS
}

/// `[broker]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    #[serde(default = "default_broker_kind")]
    pub kind: BrokerKind,
    /// `mqtt://host[:port]` or `mqtts://host[:port]`
    pub address: Option<String>,
    pub tls_ca_path: Option<PathBuf>,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
    /// Publication log for the test broker
    pub log_file: Option<PathBuf>,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            kind: default_broker_kind(),
            address: None,
            tls_ca_path: None,
            tls_cert_path: None,
            tls_key_path: None,
            log_file: None,
        }
    }
}

fn default_broker_kind() -> BrokerKind {
    BrokerKind::Mqtt
}

/// `[sensor]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorSection {
    #[serde(default = "default_sensor_kind")]
    pub kind: SensorKind,
    #[serde(default = "default_script_path")]
    pub script_path: PathBuf,
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
}

impl Default for SensorSection {
    fn default() -> Self {
        Self {
            kind: default_sensor_kind(),
            script_path: default_script_path(),
            interpreter: default_interpreter(),
        }
    }
}

fn default_sensor_kind() -> SensorKind {
    SensorKind::Dht22
}

fn default_script_path() -> PathBuf {
    PathBuf::from(DEFAULT_SENSOR_SCRIPT_PATH)
}

fn default_interpreter() -> String {
    crate::sensor::script::DEFAULT_INTERPRETER.to_string()
}

/// `[timeouts]` - all optional; absent means wait indefinitely
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeoutsSection {
    pub connect_ms: Option<u64>,
    pub read_ms: Option<u64>,
    pub publish_ms: Option<u64>,
}

impl From<&TimeoutsSection> for OperationTimeouts {
    fn from(section: &TimeoutsSection) -> Self {
        OperationTimeouts {
            connect: section.connect_ms.map(Duration::from_millis),
            read: section.read_ms.map(Duration::from_millis),
            publish: section.publish_ms.map(Duration::from_millis),
        }
    }
}

/// `[health]`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthSection {
    /// Port for the HTTP health server; disabled when absent
    pub port: Option<u16>,
}

/// Values from the command line that override the file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub thing_name: Option<String>,
    pub topic_name: Option<String>,
    pub sensor_period_ms: Option<u64>,
    pub broker: Option<BrokerKind>,
    pub broker_address: Option<String>,
    pub log_publications_file: Option<PathBuf>,
    pub tls_ca_path: Option<PathBuf>,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
    pub sensor: Option<SensorKind>,
    pub sensor_script_path: Option<PathBuf>,
    pub health_port: Option<u16>,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid thing name: {0}")]
    InvalidThingName(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ThingConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ThingConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(name) = &self.thing.name {
            validate_thing_name(name)?;
        }

        if self.thing.sensor_period_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "sensor_period_ms must be greater than 0".to_string(),
            ));
        }

        if self.thing.topic.as_deref() == Some("") {
            return Err(ConfigError::InvalidConfig(
                "topic must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Merge command line values over the file, then revalidate
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) -> Result<(), ConfigError> {
        fn set<T>(target: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *target = value;
            }
        }
        fn set_opt<T>(target: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *target = value;
            }
        }

        set_opt(&mut self.thing.name, overrides.thing_name);
        set_opt(&mut self.thing.topic, overrides.topic_name);
        set(&mut self.thing.sensor_period_ms, overrides.sensor_period_ms);
        set(&mut self.broker.kind, overrides.broker);
        set_opt(&mut self.broker.address, overrides.broker_address);
        set_opt(&mut self.broker.log_file, overrides.log_publications_file);
        set_opt(&mut self.broker.tls_ca_path, overrides.tls_ca_path);
        set_opt(&mut self.broker.tls_cert_path, overrides.tls_cert_path);
        set_opt(&mut self.broker.tls_key_path, overrides.tls_key_path);
        set(&mut self.sensor.kind, overrides.sensor);
        set(&mut self.sensor.script_path, overrides.sensor_script_path);
        set_opt(&mut self.health.port, overrides.health_port);

        self.validate()
    }

    pub fn to_monitor_options(&self) -> MonitorOptions {
        MonitorOptions {
            sensor_period: Some(Duration::from_millis(self.thing.sensor_period_ms)),
            thing_name: self.thing.name.clone(),
            topic_name: self.thing.topic.clone(),
            queue_policy: self.queue,
            timeouts: OperationTimeouts::from(&self.timeouts),
            interruptible_delay: self.thing.interruptible_delay,
        }
    }

    pub fn to_adapter_options(&self) -> AdapterOptions {
        AdapterOptions {
            thing_name: self.thing.name.clone(),
            broker_address: self.broker.address.clone(),
            log_file: self.broker.log_file.clone(),
            tls_ca_path: self.broker.tls_ca_path.clone(),
            tls_cert_path: self.broker.tls_cert_path.clone(),
            tls_key_path: self.broker.tls_key_path.clone(),
            sensor_script_path: Some(self.sensor.script_path.clone()),
            sensor_interpreter: Some(self.sensor.interpreter.clone()),
        }
    }
}

/// Thing names double as MQTT client ids
pub fn validate_thing_name(name: &str) -> Result<(), ConfigError> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if name.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidThingName(format!(
            "Thing name '{name}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::OverflowPolicy;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = ThingConfig::from_toml_str("").unwrap();
        assert_eq!(config.thing.sensor_period_ms, 60_000);
        assert_eq!(config.broker.kind, BrokerKind::Mqtt);
        assert_eq!(config.sensor.kind, SensorKind::Dht22);
        assert_eq!(
            config.sensor.script_path,
            PathBuf::from("/usr/local/etc/sensor/sensor.py")
        );
        assert_eq!(config.queue, QueuePolicy::default());
        assert_eq!(config.health.port, None);
    }

    #[test]
    fn test_full_config() {
        let config = ThingConfig::from_toml_str(
            r#"
[thing]
name = "greenhouse-1"
topic = "sensors/humidity"
sensor_period_ms = 5000

[broker]
kind = "mqtt"
address = "mqtts://iot.example.com"
tls_ca_path = "/etc/thing/ca.pem"
tls_cert_path = "/etc/thing/cert.pem"
tls_key_path = "/etc/thing/key.pem"

[sensor]
kind = "test"

[queue]
max_depth = 100
overflow = "drop_newest"

[timeouts]
publish_ms = 2000

[health]
port = 8080
"#,
        )
        .unwrap();

        let options = config.to_monitor_options();
        assert_eq!(options.sensor_period, Some(Duration::from_millis(5000)));
        assert_eq!(options.thing_name.as_deref(), Some("greenhouse-1"));
        assert_eq!(
            options.queue_policy,
            QueuePolicy::bounded(100, OverflowPolicy::DropNewest)
        );
        assert_eq!(options.timeouts.publish, Some(Duration::from_secs(2)));
        assert_eq!(options.timeouts.connect, None);

        let adapters = config.to_adapter_options();
        assert_eq!(
            adapters.tls_key_path,
            Some(PathBuf::from("/etc/thing/key.pem"))
        );
    }

    #[test]
    fn test_invalid_thing_name() {
        let err = ThingConfig::from_toml_str("[thing]\nname = \"green house\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThingName(_)));
    }

    #[test]
    fn test_zero_period_rejected() {
        let err = ThingConfig::from_toml_str("[thing]\nsensor_period_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConfig(_)));
    }

    #[test]
    fn test_unknown_broker_kind_is_a_parse_error() {
        let err = ThingConfig::from_toml_str("[broker]\nkind = \"kafka\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::TomlParse(_)));
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut config =
            ThingConfig::from_toml_str("[thing]\nname = \"from-file\"\nsensor_period_ms = 1000\n")
                .unwrap();

        config
            .apply_overrides(ConfigOverrides {
                thing_name: Some("from-cli".into()),
                topic_name: Some("t".into()),
                broker: Some(BrokerKind::Test),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(config.thing.name.as_deref(), Some("from-cli"));
        assert_eq!(config.thing.sensor_period_ms, 1000);
        assert_eq!(config.broker.kind, BrokerKind::Test);
    }

    #[test]
    fn test_overrides_are_validated() {
        let mut config = ThingConfig::default();
        let result = config.apply_overrides(ConfigOverrides {
            thing_name: Some("bad/name".into()),
            ..Default::default()
        });
        assert!(result.is_err());
    }
}
