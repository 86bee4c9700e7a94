//! Subscription registry
//!
//! Local bookkeeping of active topic subscriptions. The wire operation is
//! issued by the session before the registry is touched, so an entry only
//! exists after the transport accepted the request. The broker discards its
//! side on disconnect per QoS rules; the session clears this registry to
//! match, and resubscription after a reconnect is explicit.

use rumqttc::QoS;
use std::sync::Mutex;

/// An active subscription: topic filter (wildcards allowed) plus QoS
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscription {
    pub topic_filter: String,
    pub qos: QoS,
}

/// Insertion-ordered set of subscriptions keyed by topic filter
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<Vec<Subscription>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the filter or, if already present, replaces its QoS in place
    pub fn upsert(&self, topic_filter: impl Into<String>, qos: QoS) {
        let topic_filter = topic_filter.into();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.iter_mut().find(|s| s.topic_filter == topic_filter) {
            Some(existing) => existing.qos = qos,
            None => entries.push(Subscription { topic_filter, qos }),
        }
    }

    /// Removes the filter; returns whether it was present
    pub fn remove(&self, topic_filter: &str) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|s| s.topic_filter != topic_filter);
        entries.len() != before
    }

    pub fn contains(&self, topic_filter: &str) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().any(|s| s.topic_filter == topic_filter)
    }

    /// Insertion-ordered snapshot for display; never mutates
    pub fn snapshot(&self) -> Vec<Subscription> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.clone()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }
}
