//! MQTT broker adapter
//!
//! Split the same way as the rest of the transport code: pure pieces first,
//! I/O last.
//!
//! - [`connection`] - connection states, backoff, address parsing and option building
//! - [`message_handler`] - event routing and payload formatting
//! - [`health_monitor`] - reconnection decisions
//! - [`client`] - the [`MqttBroker`] itself and its event loop supervisor
//!
//! # Usage
//!
//! ```rust,no_run
//! use humidity_thing::broker::{Broker, MqttBroker};
//! use humidity_thing::broker::mqtt::MqttBrokerOptions;
//!
//! # tokio_test::block_on(async {
//! let options = MqttBrokerOptions::new("greenhouse-1")
//!     .with_tls("/etc/thing/ca.pem", "/etc/thing/cert.pem", "/etc/thing/key.pem");
//! let mut broker = MqttBroker::new("mqtts://iot.example.com", options)?;
//! broker.connect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::MqttBroker;
pub use connection::{ConnectionState, MqttBrokerOptions, MqttError, ReconnectConfig};
pub use health_monitor::{HealthMonitor, ReconnectionDecision};
pub use message_handler::{EventRoute, MessageHandler};
