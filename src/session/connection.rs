//! Broker connection lifecycle
//!
//! Owns the rumqttc [`AsyncClient`] and the event-loop task that drives it.
//! The event-loop task is the single inbound path: every incoming PUBLISH is
//! appended to the shared [`MessageLog`]. Connection state lives in a watch
//! channel so the scheduler and any presentation layer can poll it without
//! touching the manager.
//!
//! An unexpected connection loss flips the state to `Failed(reason)` and ends
//! the task. There is no automatic reconnect; the operator retries with
//! `connect`, which always works from a Failed state.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use super::error::SessionError;
use super::message::OutboundMessage;
use super::message_log::MessageLog;
use crate::config::ConnectionConfig;

/// Bounded wait for the broker handshake before giving up
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Bounded wait for the event-loop task on teardown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
/// Request capacity between client handle and event loop
const CLIENT_CHANNEL_CAPACITY: usize = 100;

/// Lifecycle of the single broker connection
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Handshake failure or unexpected loss, with the transport's reason
    Failed(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Manages connect/disconnect and exposes the transport primitives
pub(crate) struct ConnectionManager {
    state_tx: watch::Sender<ConnectionState>,
    client: Option<AsyncClient>,
    event_task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    pub(crate) fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state_tx,
            client: None,
            event_task: None,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    /// Fresh receiver for components that watch the connection
    pub(crate) fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Establishes the broker session and waits for the CONNACK
    ///
    /// No-op when already Connected. On refusal, poll error or timeout the
    /// state ends up as `Failed(reason)` and the reason is returned; the
    /// connection can always be retried afterwards.
    pub(crate) async fn connect(
        &mut self,
        config: &ConnectionConfig,
        log: Arc<MessageLog>,
    ) -> Result<(), SessionError> {
        if self.state().is_connected() {
            debug!("connect called while already connected, ignoring");
            return Ok(());
        }
        config
            .validate()
            .map_err(|e| SessionError::Connection(e.to_string()))?;
        self.reap_finished_task();

        let client_id = config.effective_client_id();
        info!(
            host = %config.host,
            port = config.port,
            client_id = %client_id,
            "connecting to broker"
        );

        let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
        options.set_keep_alive(config.keep_alive());
        if let Some(username) = &config.username {
            options.set_credentials(
                username.clone(),
                config.password.clone().unwrap_or_default(),
            );
        }

        let (client, event_loop) = AsyncClient::new(options, CLIENT_CHANNEL_CAPACITY);
        self.state_tx.send_replace(ConnectionState::Connecting);

        let (ready_tx, ready_rx) = oneshot::channel();
        let state_tx = self.state_tx.clone();
        let task = tokio::spawn(run_event_loop(event_loop, state_tx, log, ready_tx));

        match time::timeout(CONNECT_TIMEOUT, ready_rx).await {
            Ok(Ok(Ok(()))) => {
                self.client = Some(client);
                self.event_task = Some(task);
                info!("connected to broker");
                Ok(())
            }
            Ok(Ok(Err(reason))) => {
                // The task already recorded Failed(reason) and exited.
                self.event_task = Some(task);
                Err(SessionError::Connection(reason))
            }
            Ok(Err(_)) | Err(_) => {
                task.abort();
                let reason = "broker handshake timed out".to_string();
                self.state_tx
                    .send_replace(ConnectionState::Failed(reason.clone()));
                Err(SessionError::Connection(reason))
            }
        }
    }

    /// Tears down the session
    ///
    /// No-op when already Disconnected. Waits (bounded) for the event-loop
    /// task so no late message is appended after this returns.
    pub(crate) async fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.disconnect().await {
                warn!(error = %e, "disconnect request failed, dropping transport");
            }
        }
        if let Some(task) = self.event_task.take() {
            let abort = task.abort_handle();
            if time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                warn!("event loop did not stop within grace period, aborting");
                abort.abort();
            }
        }
        self.state_tx.send_replace(ConnectionState::Disconnected);
        info!("disconnected from broker");
    }

    /// One publish through the transport; accepted, not broker-acknowledged
    pub(crate) async fn publish(&self, message: &OutboundMessage) -> Result<(), SessionError> {
        let client = self.connected_client()?;
        client
            .publish(
                message.topic.clone(),
                message.qos,
                message.retain,
                message.payload.clone().into_bytes(),
            )
            .await
            .map_err(|e| SessionError::Publish(e.to_string()))
    }

    pub(crate) async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), SessionError> {
        let client = self.connected_client()?;
        client
            .subscribe(filter.to_string(), qos)
            .await
            .map_err(|e| SessionError::Subscribe(e.to_string()))
    }

    pub(crate) async fn unsubscribe(&self, filter: &str) -> Result<(), SessionError> {
        let client = self.connected_client()?;
        client
            .unsubscribe(filter.to_string())
            .await
            .map_err(|e| SessionError::Subscribe(e.to_string()))
    }

    /// Clone of the transport handle for the outbound pump
    pub(crate) fn client_handle(&self) -> Option<AsyncClient> {
        self.client.clone()
    }

    fn connected_client(&self) -> Result<&AsyncClient, SessionError> {
        if !self.state().is_connected() {
            return Err(SessionError::NotConnected);
        }
        self.client.as_ref().ok_or(SessionError::NotConnected)
    }

    fn reap_finished_task(&mut self) {
        if self.event_task.as_ref().is_some_and(|t| t.is_finished()) {
            self.event_task = None;
        }
    }
}

/// Drives the transport until disconnect or failure
///
/// `ready` resolves exactly once with the outcome of the initial handshake.
/// After that the loop keeps appending incoming messages to the log; the
/// first poll error ends the loop with `Failed(reason)` since reconnecting
/// is an explicit operator action.
async fn run_event_loop(
    mut event_loop: EventLoop,
    state_tx: watch::Sender<ConnectionState>,
    log: Arc<MessageLog>,
    ready: oneshot::Sender<Result<(), String>>,
) {
    let mut ready = Some(ready);
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    state_tx.send_replace(ConnectionState::Connected);
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Ok(()));
                    }
                } else {
                    let reason = format!("broker refused connection: {:?}", ack.code);
                    error!(%reason, "handshake rejected");
                    state_tx.send_replace(ConnectionState::Failed(reason.clone()));
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Err(reason));
                    }
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                log.append(publish.topic, publish.payload);
            }
            Ok(Event::Incoming(Packet::Disconnect))
            | Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                info!("disconnect packet processed, event loop ending");
                state_tx.send_replace(ConnectionState::Disconnected);
                break;
            }
            Ok(event) => {
                debug!(?event, "transport event");
            }
            Err(e) => {
                let reason = e.to_string();
                if ready.is_some() {
                    error!(%reason, "broker handshake failed");
                } else {
                    error!(%reason, "connection lost");
                }
                state_tx.send_replace(ConnectionState::Failed(reason.clone()));
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(reason));
                }
                break;
            }
        }
    }
}
