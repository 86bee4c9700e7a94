//! Inbound message log
//!
//! Append-only record of everything received from the broker. The event-loop
//! task is the single writer; the presentation layer and the CSV exporter
//! read point-in-time snapshots. A plain mutex serializes appends against
//! snapshots and clears, which is all the ordering guarantee requires: serial
//! numbers are assigned under the lock, so they are strictly increasing with
//! no gaps for the lifetime of a session.

use bytes::Bytes;
use chrono::{DateTime, Local};
use std::sync::Mutex;
use tracing::debug;

/// One message as received from the broker, payload untouched
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// 1-based, gapless within a session, assigned at insertion
    pub serial: u64,
    /// Capture time at arrival
    pub timestamp: DateTime<Local>,
    pub topic: String,
    /// Raw payload bytes; no decoding is performed
    pub payload: Bytes,
}

impl ReceivedMessage {
    /// Lossy UTF-8 view of the payload for display and export
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[derive(Debug, Default)]
struct LogInner {
    messages: Vec<ReceivedMessage>,
    next_serial: u64,
    last_arrival: Option<DateTime<Local>>,
}

/// Thread-safe, append-only log of received messages
#[derive(Debug)]
pub struct MessageLog {
    inner: Mutex<LogInner>,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageLog {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LogInner {
                messages: Vec::new(),
                next_serial: 1,
                last_arrival: None,
            }),
        }
    }

    /// Appends a message with the next serial number and the current time
    ///
    /// Single write path, called from the connection's event-loop task. The
    /// lock covers serial assignment and insertion, so concurrent callers can
    /// never interleave or reuse a serial.
    pub fn append(&self, topic: impl Into<String>, payload: Bytes) -> u64 {
        let topic = topic.into();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let serial = inner.next_serial;
        inner.next_serial += 1;
        let timestamp = Local::now();
        inner.last_arrival = Some(timestamp);
        debug!(serial, topic = %topic, bytes = payload.len(), "message appended to log");
        inner.messages.push(ReceivedMessage {
            serial,
            timestamp,
            topic,
            payload,
        });
        serial
    }

    /// Consistent point-in-time copy in insertion order
    pub fn snapshot(&self) -> Vec<ReceivedMessage> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.messages.clone()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Arrival time of the most recent append, without copying the log
    ///
    /// Records activity, not content: it survives [`clear`](Self::clear).
    pub fn last_arrival(&self) -> Option<DateTime<Local>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.last_arrival
    }

    /// Empties the log and resets the serial counter to 1
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.messages.clear();
        inner.next_serial = 1;
    }
}
