//! # MQTT Session Module
//!
//! The concurrent core of mqttdeck: one operator, one broker connection,
//! and every piece of shared state owned by an explicit [`MqttSession`]
//! object instead of ambient globals.
//!
//! ## Module Architecture
//!
//! ```text
//! session/
//! ├── connection.rs    - connection lifecycle and the rumqttc event loop
//! ├── message.rs       - outbound message template
//! ├── message_log.rs   - thread-safe log of received messages
//! ├── subscriptions.rs - active subscription bookkeeping
//! ├── scheduler.rs     - periodic publish scheduler
//! └── error.rs         - session error types
//! ```
//!
//! ## Concurrency Model
//!
//! Three units of concurrency besides the caller:
//!
//! ```text
//!           ┌──────────────┐  append   ┌────────────┐  snapshot
//! broker ──►│ event loop   ├──────────►│ MessageLog │◄────────── UI polling
//!           │ task         │           └────────────┘
//!           └──────┬───────┘
//!                  │ watch::Sender<ConnectionState>
//!                  ▼
//!           ┌──────────────┐  mpsc     ┌────────────┐  publish
//!           │ scheduler    ├──────────►│ outbound   ├──────────► broker
//!           │ task         │           │ pump task  │
//!           └──────────────┘           └────────────┘
//! ```
//!
//! Connection state travels through a watch channel, the inbound log and the
//! subscription registry sit behind their own mutexes, and the scheduler
//! hands templates to a pump task over an mpsc channel. No lock is ever held
//! across a network call.

pub mod connection;
pub mod error;
pub mod message;
pub mod message_log;
pub mod scheduler;
pub mod subscriptions;

pub use connection::ConnectionState;
pub use error::SessionError;
pub use message::{qos_from_u8, qos_to_u8, OutboundMessage};
pub use message_log::{MessageLog, ReceivedMessage};
pub use scheduler::SchedulerState;
pub use subscriptions::Subscription;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local};
use rumqttc::{AsyncClient, QoS};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use connection::ConnectionManager;
use scheduler::PeriodicPublisher;
use subscriptions::SubscriptionRegistry;

/// Buffer between the scheduler and the outbound pump
const OUTBOUND_CAPACITY: usize = 64;
/// Bounded wait for the pump to drain on disconnect
const PUMP_GRACE: Duration = Duration::from_secs(5);

/// Send-side counters, shared with the outbound pump task
#[derive(Debug, Default)]
struct SessionStats {
    messages_sent: AtomicU64,
    publish_failures: AtomicU64,
    last_error: Mutex<Option<String>>,
    last_activity: Mutex<Option<DateTime<Local>>>,
}

impl SessionStats {
    fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        let mut last = self.last_activity.lock().unwrap_or_else(|e| e.into_inner());
        *last = Some(Local::now());
    }

    fn record_failure(&self, reason: impl Into<String>) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
        let mut last = self.last_error.lock().unwrap_or_else(|e| e.into_inner());
        *last = Some(reason.into());
    }
}

/// Read-only snapshot of the whole session for the presentation layer
#[derive(Clone, Debug)]
pub struct SessionStatus {
    pub connection: ConnectionState,
    pub scheduler: SchedulerState,
    /// Messages currently held in the log
    pub messages_received: usize,
    pub messages_sent: u64,
    pub publish_failures: u64,
    pub last_error: Option<String>,
    pub last_activity: Option<DateTime<Local>>,
}

/// The application root's handle to the whole messaging core
///
/// Owns the connection manager, the message log, the subscription registry
/// and the periodic publisher. All mutating operations go through here; all
/// read accessors are cheap, non-blocking and safe to poll repeatedly.
pub struct MqttSession {
    connection: ConnectionManager,
    log: Arc<MessageLog>,
    subscriptions: Arc<SubscriptionRegistry>,
    scheduler: PeriodicPublisher,
    stats: Arc<SessionStats>,
    outbound_tx: Option<mpsc::Sender<OutboundMessage>>,
    pump_task: Option<JoinHandle<()>>,
}

impl Default for MqttSession {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttSession {
    pub fn new() -> Self {
        Self {
            connection: ConnectionManager::new(),
            log: Arc::new(MessageLog::new()),
            subscriptions: Arc::new(SubscriptionRegistry::new()),
            scheduler: PeriodicPublisher::new(),
            stats: Arc::new(SessionStats::default()),
            outbound_tx: None,
            pump_task: None,
        }
    }

    /// Connects to the broker described by `config`
    ///
    /// Blocks until the handshake completes or times out. No-op when already
    /// connected. On success the outbound pump for scheduled publishes is
    /// started alongside the connection's event loop.
    pub async fn connect(&mut self, config: &ConnectionConfig) -> Result<(), SessionError> {
        if self.connection.state().is_connected() {
            return Ok(());
        }
        self.connection.connect(config, Arc::clone(&self.log)).await?;

        let client = self
            .connection
            .client_handle()
            .ok_or(SessionError::NotConnected)?;
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let pump = tokio::spawn(run_outbound_pump(
            rx,
            client,
            self.connection.watch_state(),
            Arc::clone(&self.stats),
        ));
        self.outbound_tx = Some(tx);
        self.pump_task = Some(pump);
        Ok(())
    }

    /// Tears the session down: scheduler, then pump, then transport
    ///
    /// Waits for the scheduler, the pump and the event loop to acknowledge
    /// termination (bounded) so nothing publishes on a dead connection and no
    /// late message lands in the log after this returns. Queued scheduled
    /// publishes drain on the still-live connection before teardown, so a
    /// clean disconnect never shows up in the failure counters. Local
    /// subscription bookkeeping is cleared; the broker forgets its side per
    /// QoS rules. No-op when already disconnected.
    pub async fn disconnect(&mut self) {
        self.scheduler.stop().await;
        self.subscriptions.clear();
        // Dropping the sender lets the pump drain and exit on its own.
        self.outbound_tx = None;
        if let Some(pump) = self.pump_task.take() {
            let abort = pump.abort_handle();
            if time::timeout(PUMP_GRACE, pump).await.is_err() {
                warn!("outbound pump did not drain within grace period, aborting");
                abort.abort();
            }
        }
        self.connection.disconnect().await;
    }

    /// Subscribes to a topic filter; upserts the registry entry on success
    pub async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), SessionError> {
        self.connection.subscribe(filter, qos).await?;
        self.subscriptions.upsert(filter, qos);
        Ok(())
    }

    /// Unsubscribes from a previously subscribed filter
    pub async fn unsubscribe(&self, filter: &str) -> Result<(), SessionError> {
        if !self.connection.state().is_connected() {
            return Err(SessionError::NotConnected);
        }
        if !self.subscriptions.contains(filter) {
            return Err(SessionError::NoSuchSubscription(filter.to_string()));
        }
        self.connection.unsubscribe(filter).await?;
        self.subscriptions.remove(filter);
        Ok(())
    }

    /// One-shot manual publish
    ///
    /// Returns once the transport accepted the request, which for QoS 0 is
    /// not a broker acknowledgement.
    pub async fn publish(&self, message: &OutboundMessage) -> Result<(), SessionError> {
        if message.topic.is_empty() {
            return Err(SessionError::Publish("topic is empty".to_string()));
        }
        self.connection.publish(message).await?;
        self.stats.record_sent();
        Ok(())
    }

    /// Starts the periodic publisher over the given template list
    pub fn start_periodic(
        &mut self,
        templates: Vec<OutboundMessage>,
        interval: Duration,
    ) -> Result<(), SessionError> {
        scheduler::validate_config(&templates, interval)?;
        if !self.connection.state().is_connected() {
            return Err(SessionError::NotConnected);
        }
        let outbound = self
            .outbound_tx
            .clone()
            .ok_or(SessionError::NotConnected)?;
        self.scheduler
            .start(templates, interval, outbound, self.connection.watch_state())
    }

    /// Stops the periodic publisher; idempotent
    pub async fn stop_periodic(&mut self) {
        self.scheduler.stop().await;
    }

    // --- read boundary, safe to poll ---

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Watch receiver for refresh strategies that prefer events over polling
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.snapshot()
    }

    pub fn message_log_snapshot(&self) -> Vec<ReceivedMessage> {
        self.log.snapshot()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn status(&self) -> SessionStatus {
        let connection = self.connection.state();
        let last_error = match &connection {
            ConnectionState::Failed(reason) => Some(reason.clone()),
            _ => self
                .stats
                .last_error
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        };
        let sent_activity = self
            .stats
            .last_activity
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let received_activity = self.log.last_arrival();
        SessionStatus {
            connection,
            scheduler: self.scheduler.state(),
            messages_received: self.log.len(),
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            publish_failures: self.stats.publish_failures.load(Ordering::Relaxed),
            last_error,
            last_activity: sent_activity.max(received_activity),
        }
    }

    /// Empties the message log and resets serial numbering
    pub fn clear_log(&self) {
        self.log.clear();
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        if self.connection.state().is_connected() {
            warn!("session dropped while connected; call disconnect() and await it first");
        }
    }
}

/// Consumes scheduled publishes and pushes them through the transport
///
/// Failures are logged and counted, never fatal: the scheduler keeps its
/// cadence regardless of individual publish outcomes. The task ends when
/// every sender is gone.
async fn run_outbound_pump(
    mut rx: mpsc::Receiver<OutboundMessage>,
    client: AsyncClient,
    state: watch::Receiver<ConnectionState>,
    stats: Arc<SessionStats>,
) {
    while let Some(message) = rx.recv().await {
        if !state.borrow().is_connected() {
            warn!(topic = %message.topic, "dropping scheduled publish while not connected");
            stats.record_failure("not connected");
            continue;
        }
        match client
            .publish(
                message.topic.clone(),
                message.qos,
                message.retain,
                message.payload.into_bytes(),
            )
            .await
        {
            Ok(()) => {
                debug!(topic = %message.topic, "scheduled publish accepted");
                stats.record_sent();
            }
            Err(e) => {
                warn!(topic = %message.topic, error = %e, "scheduled publish rejected");
                stats.record_failure(e.to_string());
            }
        }
    }
    debug!("outbound pump drained");
}
