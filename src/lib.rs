//! Humidity Thing
//!
//! Polls a sensor on a fixed period and publishes every reading to a message
//! broker with at-least-once delivery. Readings the broker refuses are kept in
//! a retry queue and republished, oldest first, at the start of each cycle.
//!
//! # Overview
//!
//! - [`monitor`] - the polling loop, its options and the retry queue
//! - [`broker`] / [`sensor`] / [`clock`] - capability traits and their adapters
//! - [`factory`] - builds a monitor from broker and sensor identifiers
//! - [`config`] - TOML configuration with command line overrides
//! - [`observability`] - logging, metrics and the health endpoint
//! - [`testing`] - spies and a fake clock for driving a monitor in tests
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use humidity_thing::broker::TestBroker;
//! use humidity_thing::monitor::{Monitor, MonitorOptions};
//! use humidity_thing::sensor::TestSensor;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let mut monitor = Monitor::new(TestBroker::new(), TestSensor::new());
//! let stop = monitor.stop_handle();
//!
//! tokio::spawn(async move {
//!     tokio::time::sleep(Duration::from_secs(5)).await;
//!     stop.stop();
//! });
//!
//! monitor
//!     .start(MonitorOptions::new(Duration::from_secs(1), "greenhouse-1", "sensors/humidity"))
//!     .await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod broker;
pub mod clock;
pub mod config;
pub mod error;
pub mod factory;
pub mod monitor;
pub mod observability;
pub mod reading;
pub mod sensor;
pub mod testing;

pub use broker::{Broker, BrokerAdapter};
pub use clock::{Clock, SystemClock};
pub use config::ThingConfig;
pub use error::{MonitorError, MonitorResult};
pub use factory::{AdapterFactory, AdapterOptions, BrokerKind, SensorKind};
pub use monitor::{Monitor, MonitorOptions, MonitorState, StopHandle};
pub use reading::{Reading, StatusCode};
pub use sensor::{Sensor, SensorAdapter};
