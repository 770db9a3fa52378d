//! Broker capability and its adapters
//!
//! The monitor only ever calls [`Broker::connect`] once and
//! [`Broker::publish`] once per reading attempt. A failed publish must mean
//! the reading was not delivered; the monitor requeues it.

use crate::reading::Reading;
use async_trait::async_trait;
use thiserror::Error;

pub mod mqtt;
pub mod test_broker;

pub use mqtt::{MqttBroker, MqttError};
pub use test_broker::TestBroker;

/// Broker trait consumed by the monitor
///
/// Implemented by the closed set of adapters in this module and by the test
/// doubles in [`crate::testing`].
#[async_trait]
pub trait Broker: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Establish the broker connection
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Publish one reading to `topic`
    async fn publish(&self, topic: &str, reading: &Reading) -> Result<(), Self::Error>;

    /// Short identifier of the adapter variant (`test`, `mqtt`)
    fn id(&self) -> &'static str;

    /// Whether the adapter currently believes it can publish
    fn is_connected(&self) -> bool;
}

/// Errors from the built-in broker adapters
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("MQTT broker error: {0}")]
    Mqtt(#[from] MqttError),

    #[error("Publication log error: {0}")]
    PublicationLog(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Broker rejected operation: {0}")]
    Rejected(String),
}

impl BrokerError {
    pub fn rejected<S: Into<String>>(message: S) -> Self {
        Self::Rejected(message.into())
    }
}

/// One of the built-in broker adapters, chosen at startup by the factory
pub enum BrokerAdapter {
    Test(TestBroker),
    Mqtt(MqttBroker),
}

#[async_trait]
impl Broker for BrokerAdapter {
    type Error = BrokerError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        match self {
            BrokerAdapter::Test(broker) => broker.connect().await,
            BrokerAdapter::Mqtt(broker) => Ok(broker.connect().await?),
        }
    }

    async fn publish(&self, topic: &str, reading: &Reading) -> Result<(), Self::Error> {
        match self {
            BrokerAdapter::Test(broker) => broker.publish(topic, reading).await,
            BrokerAdapter::Mqtt(broker) => Ok(broker.publish(topic, reading).await?),
        }
    }

    fn id(&self) -> &'static str {
        match self {
            BrokerAdapter::Test(broker) => broker.id(),
            BrokerAdapter::Mqtt(broker) => broker.id(),
        }
    }

    fn is_connected(&self) -> bool {
        match self {
            BrokerAdapter::Test(broker) => broker.is_connected(),
            BrokerAdapter::Mqtt(broker) => Broker::is_connected(broker),
        }
    }
}

impl std::fmt::Debug for BrokerAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BrokerAdapter").field(&self.id()).finish()
    }
}
