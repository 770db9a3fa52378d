//! Pure connection state management for the MQTT broker adapter
//!
//! Connection states, reconnection backoff, errors and option building live
//! here. Everything in this module is free of network I/O.

use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

const DEFAULT_PORT: u16 = 1883;
const DEFAULT_TLS_PORT: u16 = 8883;

/// Connection state for the MQTT event loop
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial state, waiting for ConnAck
    Connecting,
    /// ConnAck received, publishing allowed
    Connected,
    /// Disconnected with reason
    Disconnected(String),
    /// Attempting to reconnect (attempt count)
    Reconnecting(u32),
    /// Max reconnection attempts exceeded or shut down
    PermanentlyDisconnected(String),
}

/// Reconnection backoff after the initial connection succeeded
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Backoff pattern in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay used once the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![250, 500, 1000, 2500, 5000],
            sustained_delay: 10_000,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay in milliseconds for the given attempt (1-based)
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// MQTT adapter errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Publishing failed: {0}")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Serialization error: {0}")]
    SerializationError(#[source] serde_json::Error),

    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),

    #[error("MQTT option '{0}' is required for TLS connections")]
    MissingTlsOption(&'static str),

    #[error("Failed to read TLS file {}: {source}", path.display())]
    TlsFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },

    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
}

/// Adapter options taken from the CLI or config file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MqttBrokerOptions {
    /// Used as the MQTT client id
    pub thing_name: String,
    pub ca_path: Option<PathBuf>,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    /// Keep alive interval in seconds
    pub keep_alive_secs: u64,
}

impl MqttBrokerOptions {
    pub fn new<S: Into<String>>(thing_name: S) -> Self {
        Self {
            thing_name: thing_name.into(),
            keep_alive_secs: 60,
            ..Default::default()
        }
    }

    pub fn with_tls<P: Into<PathBuf>>(mut self, ca: P, cert: P, key: P) -> Self {
        self.ca_path = Some(ca.into());
        self.cert_path = Some(cert.into());
        self.key_path = Some(key.into());
        self
    }
}

/// PEM material for mutual TLS
#[derive(Clone)]
pub struct TlsMaterial {
    pub ca: Vec<u8>,
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca_bytes", &self.ca.len())
            .field("cert_bytes", &self.cert.len())
            .finish_non_exhaustive()
    }
}

/// Parsed broker endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Parse `mqtt://host[:port]` or `mqtts://host[:port]`
pub fn parse_broker_address(address: &str) -> Result<BrokerEndpoint, MqttError> {
    let url = Url::parse(address).map_err(|_| MqttError::InvalidBrokerUrl(address.to_string()))?;

    let tls = match url.scheme() {
        "mqtt" | "tcp" => false,
        "mqtts" | "ssl" => true,
        _ => return Err(MqttError::InvalidBrokerUrl(address.to_string())),
    };

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| MqttError::InvalidBrokerUrl(address.to_string()))?;
    let port = url
        .port()
        .unwrap_or(if tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT });

    Ok(BrokerEndpoint {
        host: host.to_string(),
        port,
        tls,
    })
}

/// Read CA, certificate and key for a TLS endpoint
pub async fn load_tls_material(options: &MqttBrokerOptions) -> Result<TlsMaterial, MqttError> {
    let ca = read_pem(options.ca_path.as_deref(), "ca").await?;
    let cert = read_pem(options.cert_path.as_deref(), "cert").await?;
    let key = read_pem(options.key_path.as_deref(), "key").await?;
    Ok(TlsMaterial { ca, cert, key })
}

async fn read_pem(path: Option<&Path>, option: &'static str) -> Result<Vec<u8>, MqttError> {
    let path = path.ok_or(MqttError::MissingTlsOption(option))?;
    tokio::fs::read(path).await.map_err(|source| MqttError::TlsFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Build rumqttc options for one connection attempt
pub fn configure_mqtt_options(
    endpoint: &BrokerEndpoint,
    options: &MqttBrokerOptions,
    tls: Option<&TlsMaterial>,
) -> Result<MqttOptions, MqttError> {
    if options.thing_name.is_empty() {
        return Err(MqttError::ConnectionFailedStr(
            "thing name is required as MQTT client id".to_string(),
        ));
    }

    let mut mqtt_options =
        MqttOptions::new(options.thing_name.clone(), endpoint.host.clone(), endpoint.port);

    if endpoint.tls {
        let material = tls.ok_or(MqttError::MissingTlsOption("ca"))?;
        let transport = RumqttcTransport::tls(
            material.ca.clone(),
            Some((material.cert.clone(), material.key.clone())),
            None,
        );
        mqtt_options.set_transport(transport);
    }

    let keep_alive = options.keep_alive_secs.max(5);
    mqtt_options.set_keep_alive(Duration::from_secs(keep_alive));
    mqtt_options.set_clean_start(true);

    Ok(mqtt_options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_config_default() {
        let config = ReconnectConfig::default();
        assert_eq!(config.max_attempts, None);
        assert_eq!(config.calculate_backoff_delay(1), 250);
        assert_eq!(config.calculate_backoff_delay(5), 5000);
        assert_eq!(config.calculate_backoff_delay(6), 10_000);
        assert_eq!(config.calculate_backoff_delay(100), 10_000);
    }

    #[test]
    fn test_empty_pattern_uses_sustained_delay() {
        let config = ReconnectConfig {
            max_attempts: Some(3),
            backoff_pattern: vec![],
            sustained_delay: 42,
        };
        assert_eq!(config.calculate_backoff_delay(1), 42);
    }

    #[test]
    fn test_parse_broker_address_defaults() {
        assert_eq!(
            parse_broker_address("mqtt://localhost").unwrap(),
            BrokerEndpoint {
                host: "localhost".to_string(),
                port: 1883,
                tls: false
            }
        );

        let tls = parse_broker_address("mqtts://iot.example.com").unwrap();
        assert_eq!(tls.port, 8883);
        assert!(tls.tls);

        let explicit = parse_broker_address("mqtt://10.0.0.5:1884").unwrap();
        assert_eq!(explicit.port, 1884);
    }

    #[test]
    fn test_invalid_broker_address() {
        for address in ["invalid-url", "http://localhost", "mqtt://"] {
            assert!(
                matches!(
                    parse_broker_address(address),
                    Err(MqttError::InvalidBrokerUrl(_))
                ),
                "{address} should be rejected"
            );
        }
    }

    #[test]
    fn test_configure_plain_options() {
        let endpoint = parse_broker_address("mqtt://localhost:1883").unwrap();
        let options = configure_mqtt_options(&endpoint, &MqttBrokerOptions::new("thing-1"), None)
            .unwrap();
        assert_eq!(options.client_id(), "thing-1");
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
    }

    #[test]
    fn test_configure_tls_without_material_fails() {
        let endpoint = parse_broker_address("mqtts://localhost").unwrap();
        let result = configure_mqtt_options(&endpoint, &MqttBrokerOptions::new("thing-1"), None);
        assert!(matches!(result, Err(MqttError::MissingTlsOption("ca"))));
    }

    #[test]
    fn test_configure_requires_thing_name() {
        let endpoint = parse_broker_address("mqtt://localhost").unwrap();
        let result = configure_mqtt_options(&endpoint, &MqttBrokerOptions::new(""), None);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_load_tls_material_reports_missing_option() {
        let options = MqttBrokerOptions::new("thing-1");
        let err = load_tls_material(&options).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "MQTT option 'ca' is required for TLS connections"
        );
    }

    #[tokio::test]
    async fn test_load_tls_material_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let ca = dir.path().join("ca.pem");
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        std::fs::write(&ca, "CA").unwrap();
        std::fs::write(&cert, "CERT").unwrap();
        std::fs::write(&key, "KEY").unwrap();

        let options = MqttBrokerOptions::new("thing-1").with_tls(ca, cert, key);
        let material = load_tls_material(&options).await.unwrap();
        assert_eq!(material.ca, b"CA");
        assert_eq!(material.key, b"KEY");
    }

    #[tokio::test]
    async fn test_load_tls_material_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.pem");
        let options =
            MqttBrokerOptions::new("thing-1").with_tls(missing.clone(), missing.clone(), missing);
        let err = load_tls_material(&options).await.unwrap_err();
        assert!(matches!(err, MqttError::TlsFile { .. }));
    }
}
