//! Pure routing of MQTT event loop events and payload formatting

use crate::reading::Reading;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::Event;

/// Routing decisions for events polled from the rumqttc event loop
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// ConnAck received, publishing allowed
    ConnectionAcknowledged,
    /// Broker acknowledged a QoS 1 publish
    PublishAcknowledged { packet_id: u16 },
    /// Broker sent a Disconnect
    Disconnected,
    /// PingResp and other packets with no effect on state
    InfrastructureEvent(String),
    /// Outgoing packets, handled by rumqttc
    OutgoingEvent,
}

pub struct MessageHandler;

impl MessageHandler {
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::PubAck(puback) => EventRoute::PublishAcknowledged {
                    packet_id: puback.pkid,
                },
                Packet::Disconnect(_) => EventRoute::Disconnected,
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Serialize a reading into the JSON payload sent on the wire
    pub fn format_reading_payload(reading: &Reading) -> Result<Vec<u8>, serde_json::Error> {
        reading.to_payload()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::v5::mqttbytes::v5::{ConnAck, ConnectReturnCode, Disconnect};
    use serde_json::json;

    #[test]
    fn test_route_connack_and_disconnect() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&connack),
            EventRoute::ConnectionAcknowledged
        );

        let disconnect = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: rumqttc::v5::mqttbytes::v5::DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&disconnect),
            EventRoute::Disconnected
        );
    }

    #[test]
    fn test_format_reading_payload() {
        let reading = Reading::from_value(json!({"humidity": 54.3, "thingName": "t"})).unwrap();
        let payload = MessageHandler::format_reading_payload(&reading).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(parsed["humidity"], json!(54.3));
        assert_eq!(parsed["thingName"], json!("t"));
    }
}
