//! Session-level behavior that needs no live broker
//!
//! Connectivity failures use a closed local port; everything else exercises
//! the fail-fast paths and the read boundary of a fresh session.

use std::time::Duration;

use mqttdeck::{
    ConnectionConfig, ConnectionState, MqttSession, OutboundMessage, QoS, SchedulerState,
    SessionError,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Accepts one connection, answers the CONNECT with a successful CONNACK and
/// then swallows everything else until the client hangs up.
async fn spawn_stub_broker() -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let mut buf = [0u8; 4096];
        if stream.read(&mut buf).await.is_ok() {
            let _ = stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await;
        }
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });
    (port, handle)
}

fn unreachable_config() -> ConnectionConfig {
    // Port 1 (tcpmux) is essentially never bound; connection is refused fast.
    ConnectionConfig {
        host: "127.0.0.1".to_string(),
        port: 1,
        ..ConnectionConfig::default()
    }
}

#[tokio::test]
async fn connect_to_unreachable_host_fails_and_marks_state_failed() {
    let mut session = MqttSession::new();

    let err = session.connect(&unreachable_config()).await.unwrap_err();
    assert!(matches!(err, SessionError::Connection(_)));
    assert!(matches!(
        session.connection_state(),
        ConnectionState::Failed(_)
    ));

    // A failed connection never requires a restart; retrying is allowed and
    // fails the same way against the same endpoint.
    let err = session.connect(&unreachable_config()).await.unwrap_err();
    assert!(matches!(err, SessionError::Connection(_)));

    session.disconnect().await;
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn connect_rejects_invalid_config() {
    let mut session = MqttSession::new();
    let config = ConnectionConfig {
        host: String::new(),
        ..ConnectionConfig::default()
    };
    let err = session.connect(&config).await.unwrap_err();
    assert!(matches!(err, SessionError::Connection(_)));
}

#[tokio::test]
async fn operations_fail_fast_while_disconnected() {
    let mut session = MqttSession::new();

    let err = session
        .publish(&OutboundMessage::new("t", "p"))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NotConnected));

    let err = session.subscribe("t/#", QoS::AtMostOnce).await.unwrap_err();
    assert!(matches!(err, SessionError::NotConnected));

    let err = session.unsubscribe("t/#").await.unwrap_err();
    assert!(matches!(err, SessionError::NotConnected));

    let err = session
        .start_periodic(vec![OutboundMessage::new("t", "p")], Duration::from_secs(1))
        .unwrap_err();
    assert!(matches!(err, SessionError::NotConnected));
}

#[tokio::test]
async fn scheduler_parameters_are_validated_before_connectivity() {
    let mut session = MqttSession::new();

    let err = session
        .start_periodic(Vec::new(), Duration::from_secs(1))
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidConfig(_)));

    let err = session
        .start_periodic(vec![OutboundMessage::new("t", "p")], Duration::ZERO)
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidConfig(_)));
}

#[tokio::test]
async fn disconnect_when_disconnected_is_a_no_op() {
    let mut session = MqttSession::new();
    session.disconnect().await;
    session.disconnect().await;
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn fresh_session_snapshots_are_empty() {
    let session = MqttSession::new();

    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    assert_eq!(session.scheduler_state(), SchedulerState::Stopped);
    assert!(session.subscriptions().is_empty());
    assert!(session.message_log_snapshot().is_empty());

    let status = session.status();
    assert_eq!(status.messages_received, 0);
    assert_eq!(status.messages_sent, 0);
    assert_eq!(status.publish_failures, 0);
    assert!(status.last_error.is_none());
    assert!(status.last_activity.is_none());
}

#[tokio::test]
async fn clean_disconnect_drains_scheduled_publishes_without_failures() {
    let (port, broker) = spawn_stub_broker().await;
    let mut session = MqttSession::new();
    let config = ConnectionConfig {
        host: "127.0.0.1".to_string(),
        port,
        ..ConnectionConfig::default()
    };
    session.connect(&config).await.unwrap();
    assert_eq!(session.connection_state(), ConnectionState::Connected);

    // Enough bulky templates per cycle that some are still queued when the
    // teardown starts.
    let templates: Vec<OutboundMessage> = (0..16)
        .map(|i| OutboundMessage::new(format!("bench/{i}"), "x".repeat(4096)))
        .collect();
    session
        .start_periodic(templates, Duration::from_millis(5))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    session.disconnect().await;
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);

    // Queued publishes drained on the live connection; none was recorded as
    // a failure against a dead one.
    let status = session.status();
    assert_eq!(
        status.publish_failures, 0,
        "unexpected failure: {:?}",
        status.last_error
    );
    assert!(status.last_error.is_none());
    assert!(status.messages_sent > 0);

    broker.abort();
}

#[tokio::test]
async fn clear_log_on_empty_session_is_safe() {
    let session = MqttSession::new();
    session.clear_log();
    assert!(session.message_log_snapshot().is_empty());
}
