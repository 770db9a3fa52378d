//! Impure I/O for the MQTT broker adapter
//!
//! Owns the rumqttc client and a supervisor task that polls the event loop.
//! `connect()` resolves only once the broker has sent ConnAck. After that the
//! supervisor keeps the connection alive with backoff; publishes made while
//! it is down fail fast so the monitor can requeue them.

use super::connection::{
    configure_mqtt_options, load_tls_material, parse_broker_address, BrokerEndpoint,
    ConnectionState, MqttBrokerOptions, MqttError, ReconnectConfig,
};
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use super::message_handler::{EventRoute, MessageHandler};
use crate::broker::Broker;
use crate::reading::Reading;
use async_trait::async_trait;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Capacity of the rumqttc request channel
const REQUEST_CHANNEL_CAPACITY: usize = 64;
const DEFAULT_CONNACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Broker adapter publishing readings over MQTT v5 with QoS 1
pub struct MqttBroker {
    address: String,
    endpoint: BrokerEndpoint,
    options: MqttBrokerOptions,
    reconnect_config: ReconnectConfig,
    connack_timeout: Duration,
    client: Option<AsyncClient>,
    state_rx: Option<watch::Receiver<ConnectionState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    event_loop_handle: Option<JoinHandle<()>>,
}

impl MqttBroker {
    /// Validate the address; no network activity happens until `connect()`
    pub fn new<S: Into<String>>(address: S, options: MqttBrokerOptions) -> Result<Self, MqttError> {
        let address = address.into();
        let endpoint = parse_broker_address(&address)?;

        Ok(Self {
            address,
            endpoint,
            options,
            reconnect_config: ReconnectConfig::default(),
            connack_timeout: DEFAULT_CONNACK_TIMEOUT,
            client: None,
            state_rx: None,
            shutdown_tx: None,
            event_loop_handle: None,
        })
    }

    pub fn with_reconnect_config(mut self, reconnect_config: ReconnectConfig) -> Self {
        self.reconnect_config = reconnect_config;
        self
    }

    pub fn with_connack_timeout(mut self, timeout: Duration) -> Self {
        self.connack_timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    /// None until `connect()` has been called
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    async fn establish(&mut self) -> Result<(), MqttError> {
        if self.event_loop_handle.is_some() {
            return Err(MqttError::ConnectionFailedStr(
                "Event loop already started".to_string(),
            ));
        }

        let tls = if self.endpoint.tls {
            Some(load_tls_material(&self.options).await?)
        } else {
            None
        };
        let mqtt_options = configure_mqtt_options(&self.endpoint, &self.options, tls.as_ref())?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            host = %self.endpoint.host,
            port = self.endpoint.port,
            tls = self.endpoint.tls,
            client_id = %self.options.thing_name,
            "Connecting to MQTT broker"
        );

        let supervisor = Supervisor {
            state_tx,
            shutdown_rx,
            reconnect_config: self.reconnect_config.clone(),
        };
        let handle = tokio::spawn(supervisor.run(event_loop));

        self.client = Some(client);
        self.state_rx = Some(state_rx.clone());
        self.shutdown_tx = Some(shutdown_tx);
        self.event_loop_handle = Some(handle);

        if let Err(e) = Self::wait_for_connection_confirmation(state_rx, self.connack_timeout).await
        {
            self.shutdown();
            return Err(e);
        }
        Ok(())
    }

    /// Wait until the supervisor reports ConnAck, a failure, or the timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let confirmation = tokio::time::timeout(timeout, async {
            loop {
                let closed = state_rx.changed().await.is_err();
                match &*state_rx.borrow_and_update() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(reason)
                    | ConnectionState::PermanentlyDisconnected(reason) => {
                        return Err(MqttError::ConnectionFailedStr(reason.clone()));
                    }
                    ConnectionState::Connecting | ConnectionState::Reconnecting(_) => {}
                }
                if closed {
                    return Err(MqttError::ConnectionFailedStr(
                        "Event loop stopped before ConnAck".to_string(),
                    ));
                }
            }
        })
        .await;

        match confirmation {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnectionFailedStr(format!(
                "ConnAck timeout after {}s",
                timeout.as_secs()
            ))),
        }
    }

    fn check_connection_state(&self) -> Result<&AsyncClient, MqttError> {
        let (client, state_rx) = match (&self.client, &self.state_rx) {
            (Some(client), Some(state_rx)) => (client, state_rx),
            _ => {
                return Err(MqttError::ConnectionFailedStr(
                    "Client not connected".to_string(),
                ))
            }
        };

        let current_state = state_rx.borrow().clone();
        if !HealthMonitor::can_publish(&current_state) {
            return Err(MqttError::NotConnected {
                state: current_state,
            });
        }
        Ok(client)
    }

    fn shutdown(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            shutdown_tx.send_replace(true);
        }
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
        self.client = None;
    }
}

#[async_trait]
impl Broker for MqttBroker {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        let span = crate::mqtt_span!("connect", address = %self.address);
        self.establish().instrument(span).await
    }

    /// Hand the reading to the client as QoS 1, not retained.
    ///
    /// Success means the request was queued to a connected session; the
    /// PubAck is tracked by rumqttc.
    async fn publish(&self, topic: &str, reading: &Reading) -> Result<(), Self::Error> {
        let client = self.check_connection_state()?;
        let payload =
            MessageHandler::format_reading_payload(reading).map_err(MqttError::SerializationError)?;

        client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;

        debug!(topic, "Reading handed to MQTT client");
        Ok(())
    }

    fn id(&self) -> &'static str {
        "mqtt"
    }

    fn is_connected(&self) -> bool {
        self.connection_state()
            .map(|state| HealthMonitor::can_publish(&state))
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for MqttBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttBroker")
            .field("address", &self.address)
            .field("client_id", &self.options.thing_name)
            .field("state", &self.connection_state())
            .finish()
    }
}

impl Drop for MqttBroker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Background task driving the rumqttc event loop
struct Supervisor {
    state_tx: watch::Sender<ConnectionState>,
    shutdown_rx: watch::Receiver<bool>,
    reconnect_config: ReconnectConfig,
}

impl Supervisor {
    async fn run(mut self, mut event_loop: EventLoop) {
        let mut ever_connected = false;
        let mut reconnect_attempts = 0u32;

        loop {
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping MQTT event loop");
                        break;
                    }
                }

                polled = event_loop.poll() => match polled {
                    Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                        EventRoute::ConnectionAcknowledged => {
                            if reconnect_attempts > 0 {
                                info!(attempts = reconnect_attempts, "MQTT reconnection successful");
                            }
                            ever_connected = true;
                            reconnect_attempts = 0;
                            self.transition(ConnectionEvent::ConnAckReceived);
                        }
                        EventRoute::PublishAcknowledged { packet_id } => {
                            debug!(packet_id, "Broker acknowledged reading");
                        }
                        EventRoute::Disconnected => {
                            self.transition(ConnectionEvent::DisconnectedByBroker);
                        }
                        EventRoute::InfrastructureEvent(event) => {
                            tracing::trace!(target: "mqtt_transport", %event, "MQTT event");
                        }
                        EventRoute::OutgoingEvent => {}
                    },
                    Err(e) => {
                        self.transition(ConnectionEvent::NetworkError(e.to_string()));
                        if !ever_connected {
                            // connect() reports this failure to the caller
                            break;
                        }
                        if !self.backoff(&mut reconnect_attempts).await {
                            break;
                        }
                    }
                }
            }
        }
        debug!("MQTT event loop stopped");
    }

    /// Returns false when the supervisor should stop
    async fn backoff(&mut self, reconnect_attempts: &mut u32) -> bool {
        let decision = HealthMonitor::should_attempt_reconnection(
            *reconnect_attempts,
            &self.reconnect_config,
            *self.shutdown_rx.borrow(),
        );

        match decision {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                *reconnect_attempts = attempt;
                self.transition(ConnectionEvent::ReconnectionStarted(attempt));
                warn!(attempt, delay_ms, "MQTT connection lost, reconnecting");
                self.interruptible_sleep(delay_ms).await
            }
            ReconnectionDecision::AbortShutdownRequested => false,
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                let reason = format!(
                    "Max reconnection attempts ({}) exceeded",
                    *reconnect_attempts
                );
                error!(%reason, "Giving up on MQTT broker");
                self.transition(ConnectionEvent::PermanentFailure(reason));
                false
            }
        }
    }

    /// Returns true if the sleep completed, false if shutdown was requested
    async fn interruptible_sleep(&mut self, delay_ms: u64) -> bool {
        tokio::select! {
            changed = self.shutdown_rx.changed() => {
                changed.is_ok() && !*self.shutdown_rx.borrow()
            }
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }

    fn transition(&self, event: ConnectionEvent) {
        self.state_tx
            .send_replace(HealthMonitor::determine_next_state(event));
    }
}
