//! mqttdeck — interactive MQTT client core
//!
//! Connect to a broker, publish one-shot or periodically from a template
//! list, subscribe to topics and observe incoming messages. The crate is the
//! concurrent core behind whatever presentation layer polls it; see
//! [`session::MqttSession`] for the write boundary and the snapshot reads.

pub mod config;
pub mod csv_io;
pub mod session;

pub use config::{AppConfig, ConnectionConfig};
pub use rumqttc::QoS;
pub use session::{
    ConnectionState, MqttSession, OutboundMessage, ReceivedMessage, SchedulerState, SessionError,
    SessionStatus, Subscription,
};
