//! Pure routing of `rumqttc` events
//!
//! The event-loop pump in [`super::client`] polls `rumqttc` and asks this
//! module what each event means. Only the routes that matter to the node
//! become [`BusEvent`]s; everything else is logged at debug level.

use crate::transport::{BusEvent, UNSPECIFIED_DISCONNECT};
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::{ConnectionError, Event};
use rumqttc::Outgoing;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.to_vec(),
                    retain: publish.retain,
                },
                Packet::Disconnect(disconnect) => EventRoute::Disconnected {
                    reason_code: disconnect.reason_code as u8,
                },
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    filters: suback.return_codes.len(),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Reason code reported for an event-loop error
    ///
    /// Errors after a requested disconnect are the normal end of the session.
    pub fn disconnect_reason(error: &ConnectionError, closing: bool) -> u8 {
        match error {
            _ if closing => crate::transport::NORMAL_DISCONNECT,
            ConnectionError::RequestsDone => crate::transport::NORMAL_DISCONNECT,
            _ => UNSPECIFIED_DISCONNECT,
        }
    }

    /// Translate a route into the event forwarded to the node, if any
    pub fn bus_event(route: &EventRoute) -> Option<BusEvent> {
        match route {
            EventRoute::MessageReceived { topic, payload, .. } => Some(BusEvent::Message {
                topic: topic.clone(),
                payload: payload.clone(),
            }),
            EventRoute::Disconnected { reason_code } => Some(BusEvent::Disconnected {
                reason_code: *reason_code,
            }),
            EventRoute::DisconnectSent => Some(BusEvent::Disconnected {
                reason_code: crate::transport::NORMAL_DISCONNECT,
            }),
            _ => None,
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on subscribed topic
    MessageReceived {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    /// Broker ended the session
    Disconnected { reason_code: u8 },
    /// Our own disconnect request went out
    DisconnectSent,
    /// Subscription confirmed
    SubscriptionConfirmed { packet_id: u16, filters: usize },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

impl EventRoute {
    /// Whether the pump must stop after this route
    pub fn ends_session(&self) -> bool {
        matches!(
            self,
            EventRoute::Disconnected { .. } | EventRoute::DisconnectSent
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::{
        ConnAck, ConnectReturnCode, Disconnect, DisconnectReasonCode, Publish,
    };
    use rumqttc::v5::mqttbytes::QoS;

    fn publish_event(topic: &str, payload: &str, retain: bool) -> Event {
        Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain,
            topic: Bytes::from(topic.to_string()),
            pkid: 0,
            payload: Bytes::from(payload.to_string()),
            properties: None,
        }))
    }

    #[test]
    fn test_route_connack() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&connack),
            EventRoute::ConnectionAcknowledged
        );
    }

    #[test]
    fn test_route_publish_becomes_bus_message() {
        let route = MessageHandler::route_mqtt_event(&publish_event("dev1/valves/A", "1", false));
        assert_eq!(
            MessageHandler::bus_event(&route),
            Some(BusEvent::Message {
                topic: "dev1/valves/A".to_string(),
                payload: b"1".to_vec(),
            })
        );
        assert!(!route.ends_session());
    }

    #[test]
    fn test_retained_commands_are_forwarded() {
        let route = MessageHandler::route_mqtt_event(&publish_event("dev1/valves/B", "0", true));
        assert!(matches!(
            route,
            EventRoute::MessageReceived { retain: true, .. }
        ));
        assert!(MessageHandler::bus_event(&route).is_some());
    }

    #[test]
    fn test_route_broker_disconnect() {
        let normal = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        let route = MessageHandler::route_mqtt_event(&normal);
        assert_eq!(route, EventRoute::Disconnected { reason_code: 0 });
        assert!(route.ends_session());

        let kicked = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::SessionTakenOver,
            properties: None,
        }));
        let event = MessageHandler::bus_event(&MessageHandler::route_mqtt_event(&kicked)).unwrap();
        assert!(event.is_abnormal_disconnect());
    }

    #[test]
    fn test_route_own_disconnect() {
        let route = MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Disconnect));
        assert_eq!(route, EventRoute::DisconnectSent);
        assert_eq!(
            MessageHandler::bus_event(&route),
            Some(BusEvent::Disconnected { reason_code: 0 })
        );
    }

    #[test]
    fn test_outgoing_events_are_not_forwarded() {
        let outgoing = MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::PingReq));
        assert_eq!(outgoing, EventRoute::OutgoingEvent);
        assert_eq!(MessageHandler::bus_event(&outgoing), None);
    }

    #[test]
    fn test_disconnect_reason_for_errors() {
        let io = ConnectionError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert_eq!(
            MessageHandler::disconnect_reason(&io, false),
            UNSPECIFIED_DISCONNECT
        );
        assert_eq!(MessageHandler::disconnect_reason(&io, true), 0);
    }
}
