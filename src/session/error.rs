//! Error definitions for the session module

use thiserror::Error;

/// Errors surfaced by session operations
///
/// Every fallible operation on [`MqttSession`](super::MqttSession) returns one
/// of these variants. Unexpected connection loss is not an error value; it is
/// observed as a [`ConnectionState`](super::connection::ConnectionState)
/// transition on the next poll.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Handshake, timeout or authentication failure while connecting
    #[error("connection failed: {0}")]
    Connection(String),

    /// Operation requires an established broker connection
    #[error("not connected to broker")]
    NotConnected,

    /// The transport rejected a publish request
    #[error("publish rejected: {0}")]
    Publish(String),

    /// The transport rejected a subscribe or unsubscribe request
    #[error("subscription request rejected: {0}")]
    Subscribe(String),

    /// Bad parameters for the periodic publisher
    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),

    /// A periodic run is already active (or its stop is still in flight)
    #[error("periodic publisher already running")]
    AlreadyRunning,

    /// Unsubscribe for a filter that was never subscribed
    #[error("no subscription for topic filter '{0}'")]
    NoSuchSubscription(String),
}
