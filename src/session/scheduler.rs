//! Periodic publish scheduler
//!
//! Runs one cancellable tokio task that pushes the whole template list, in
//! order, through the session's outbound channel once per interval.
//!
//! # State Machine
//!
//! ```text
//! Stopped ──start(templates, interval)──► Running ──stop()──► Stopped
//!                                            │
//!                                            └──connection lost──► Stopped
//! ```
//!
//! Ticking is wall-clock based with `MissedTickBehavior::Delay`: a slow cycle
//! shrinks the gap to the next tick instead of stacking up extra cycles. The
//! task never publishes directly; it hands templates to the outbound pump so
//! per-message transport failures are logged and counted there without ever
//! halting the schedule.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::ConnectionState;
use super::error::SessionError;
use super::message::OutboundMessage;

/// Bounded wait for the ticking task to acknowledge a stop request
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Run flag of the periodic publisher
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SchedulerState {
    #[default]
    Stopped,
    Running,
}

/// Owns the ticking task; at most one run is active at a time
#[derive(Debug)]
pub(crate) struct PeriodicPublisher {
    state_tx: watch::Sender<SchedulerState>,
    task: Option<(CancellationToken, JoinHandle<()>)>,
}

impl PeriodicPublisher {
    pub(crate) fn new() -> Self {
        let (state_tx, _) = watch::channel(SchedulerState::Stopped);
        Self {
            state_tx,
            task: None,
        }
    }

    pub(crate) fn state(&self) -> SchedulerState {
        *self.state_tx.borrow()
    }

    /// Spawns the ticking task
    ///
    /// Fails with `InvalidConfig` for an empty list or a zero interval and
    /// with `AlreadyRunning` while a previous run is still live, including
    /// the window where its stop has been requested but not yet completed.
    /// The caller checks the connection requirement before delegating here.
    pub(crate) fn start(
        &mut self,
        templates: Vec<OutboundMessage>,
        interval: Duration,
        outbound: mpsc::Sender<OutboundMessage>,
        connection: watch::Receiver<ConnectionState>,
    ) -> Result<(), SessionError> {
        validate_config(&templates, interval)?;
        if let Some((_, handle)) = &self.task {
            if !handle.is_finished() {
                return Err(SessionError::AlreadyRunning);
            }
        }
        // A finished task ended on its own (stop or connection loss); reap it.
        self.task = None;

        info!(
            templates = templates.len(),
            interval_secs = interval.as_secs_f64(),
            "starting periodic publisher"
        );
        let token = CancellationToken::new();
        let task_token = token.clone();
        let state_tx = self.state_tx.clone();
        state_tx.send_replace(SchedulerState::Running);

        let handle = tokio::spawn(async move {
            run_cycles(templates, interval, outbound, connection, task_token).await;
            state_tx.send_replace(SchedulerState::Stopped);
            info!("periodic publisher stopped");
        });
        self.task = Some((token, handle));
        Ok(())
    }

    /// Signals the task to stop and waits (bounded) for it to finish
    ///
    /// Idempotent; calling while already Stopped is a no-op.
    pub(crate) async fn stop(&mut self) {
        if let Some((token, handle)) = self.task.take() {
            token.cancel();
            if time::timeout(STOP_GRACE, handle).await.is_err() {
                warn!("periodic publisher did not stop within grace period");
            }
        }
        self.state_tx.send_replace(SchedulerState::Stopped);
    }
}

/// Parameter checks shared by [`PeriodicPublisher::start`] and the session
pub(crate) fn validate_config(
    templates: &[OutboundMessage],
    interval: Duration,
) -> Result<(), SessionError> {
    if templates.is_empty() {
        return Err(SessionError::InvalidConfig(
            "template list is empty".to_string(),
        ));
    }
    if interval.is_zero() {
        return Err(SessionError::InvalidConfig(
            "interval must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

async fn run_cycles(
    templates: Vec<OutboundMessage>,
    interval: Duration,
    outbound: mpsc::Sender<OutboundMessage>,
    mut connection: watch::Receiver<ConnectionState>,
    token: CancellationToken,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cycle: u64 = 0;

    'run: loop {
        tokio::select! {
            _ = token.cancelled() => break 'run,
            changed = connection.changed() => {
                let connected = changed.is_ok()
                    && matches!(*connection.borrow_and_update(), ConnectionState::Connected);
                if !connected {
                    info!("connection lost, periodic publisher shutting down");
                    break 'run;
                }
            }
            _ = ticker.tick() => {
                cycle += 1;
                debug!(cycle, "periodic cycle started");
                for template in &templates {
                    if token.is_cancelled() {
                        // Stop may cut the in-flight cycle short.
                        break 'run;
                    }
                    if outbound.send(template.clone()).await.is_err() {
                        warn!("outbound channel closed, periodic publisher shutting down");
                        break 'run;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::QoS;

    fn templates() -> Vec<OutboundMessage> {
        vec![
            OutboundMessage::new("t1", "p1"),
            OutboundMessage::new("t2", "p2").with_qos(QoS::AtLeastOnce).with_retain(true),
        ]
    }

    fn connected() -> (watch::Sender<ConnectionState>, watch::Receiver<ConnectionState>) {
        watch::channel(ConnectionState::Connected)
    }

    #[tokio::test]
    async fn rejects_empty_template_list_and_zero_interval() {
        let mut publisher = PeriodicPublisher::new();
        let (outbound, _rx) = mpsc::channel(16);
        let (_state_tx, state_rx) = connected();

        let err = publisher
            .start(Vec::new(), Duration::from_secs(1), outbound.clone(), state_rx.clone())
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidConfig(_)));

        let err = publisher
            .start(templates(), Duration::ZERO, outbound, state_rx)
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidConfig(_)));
        assert_eq!(publisher.state(), SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn second_start_while_running_is_rejected() {
        let mut publisher = PeriodicPublisher::new();
        let (outbound, _rx) = mpsc::channel(16);
        let (_state_tx, state_rx) = connected();

        publisher
            .start(templates(), Duration::from_secs(1), outbound.clone(), state_rx.clone())
            .unwrap();
        let err = publisher
            .start(templates(), Duration::from_secs(1), outbound, state_rx)
            .unwrap_err();
        assert!(matches!(err, SessionError::AlreadyRunning));

        publisher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cycles_publish_templates_in_list_order() {
        let mut publisher = PeriodicPublisher::new();
        let (outbound, mut rx) = mpsc::channel(16);
        let (_state_tx, state_rx) = connected();

        publisher
            .start(templates(), Duration::from_secs(2), outbound, state_rx)
            .unwrap();

        // Two full cycles: each must emit t1 strictly before t2.
        for _ in 0..2 {
            let first = rx.recv().await.unwrap();
            let second = rx.recv().await.unwrap();
            assert_eq!(first.topic, "t1");
            assert_eq!(second.topic, "t2");
        }

        publisher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn delay_bounds_cycle_count_over_a_window() {
        let mut publisher = PeriodicPublisher::new();
        let (outbound, mut rx) = mpsc::channel(64);
        let (_state_tx, state_rx) = connected();

        publisher
            .start(templates(), Duration::from_secs(2), outbound, state_rx)
            .unwrap();

        // A 2 s cadence observed for 5 s ticks at 0, 2 and 4 seconds; Delay
        // never lets extra cycles stack into the window.
        let window = time::sleep(Duration::from_secs(5));
        tokio::pin!(window);
        let mut cycles = 0u32;
        loop {
            tokio::select! {
                _ = &mut window => break,
                msg = rx.recv() => {
                    // The second template closes a cycle.
                    if msg.unwrap().topic == "t2" {
                        cycles += 1;
                    }
                }
            }
        }
        assert!(
            (2..=3).contains(&cycles),
            "expected 2..=3 completed cycles in the window, saw {cycles}"
        );

        publisher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_publishing_and_reports_stopped() {
        let mut publisher = PeriodicPublisher::new();
        let (outbound, mut rx) = mpsc::channel(64);
        let (_state_tx, state_rx) = connected();

        publisher
            .start(templates(), Duration::from_millis(100), outbound, state_rx)
            .unwrap();
        // Let at least one cycle happen.
        let _ = rx.recv().await.unwrap();

        publisher.stop().await;
        assert_eq!(publisher.state(), SchedulerState::Stopped);

        // Drain whatever the in-flight cycle produced, then verify silence.
        while rx.try_recv().is_ok() {}
        match time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(msg)) => panic!("publish after stop: {}", msg.topic),
            Ok(None) | Err(_) => {}
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connection_loss_stops_the_run() {
        let mut publisher = PeriodicPublisher::new();
        let (outbound, mut rx) = mpsc::channel(64);
        let (state_tx, state_rx) = connected();

        publisher
            .start(templates(), Duration::from_millis(50), outbound, state_rx)
            .unwrap();
        let _ = rx.recv().await.unwrap();

        state_tx.send_replace(ConnectionState::Failed("broker went away".to_string()));

        // The task observes the transition and ends; the state flag follows.
        let deadline = time::Instant::now() + Duration::from_secs(5);
        while publisher.state() == SchedulerState::Running && time::Instant::now() < deadline {
            time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(publisher.state(), SchedulerState::Stopped);

        // A fresh start succeeds once the old task is reaped.
        publisher.stop().await;
        let (outbound2, _rx2) = mpsc::channel(16);
        let (_state_tx2, state_rx2) = connected();
        publisher
            .start(templates(), Duration::from_secs(1), outbound2, state_rx2)
            .unwrap();
        publisher.stop().await;
    }

    #[tokio::test]
    async fn stop_when_stopped_is_a_no_op() {
        let mut publisher = PeriodicPublisher::new();
        publisher.stop().await;
        publisher.stop().await;
        assert_eq!(publisher.state(), SchedulerState::Stopped);
    }
}
