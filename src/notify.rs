//! Publish/subscribe fan-out of counter snapshots
//!
//! Every subscriber owns a single-slot mailbox. Publishing never waits: a
//! subscriber that has not taken the previous snapshot misses the new one,
//! and subscribers that went away are pruned.

use crate::counters::CounterState;
use crate::logging::{StructuredLogger, get_logger};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Owned copy of the counters after a successful cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub local_id: String,
    pub counter_states: Vec<CounterState>,
    pub published_at: DateTime<Utc>,
}

/// Receiving end handed to a listener
#[derive(Debug)]
pub struct Subscription {
    id: usize,
    rx: mpsc::Receiver<Notification>,
}

impl Subscription {
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Wait for the next snapshot; `None` once the notifier is gone
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    /// Take the pending snapshot, if any
    pub fn try_recv(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }
}

/// Outcome of one publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    /// Mailbox still full
    pub dropped: usize,
    /// Subscriber gone, removed
    pub pruned: usize,
}

struct Slot {
    id: usize,
    tx: mpsc::Sender<Notification>,
}

#[derive(Default)]
struct Registry {
    next_id: usize,
    slots: Vec<Slot>,
}

/// Fan-out point owned by the fetcher
pub struct Notifier {
    registry: Mutex<Registry>,
    logger: StructuredLogger,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            logger: get_logger("notify"),
        }
    }

    /// Register a listener with a fresh one-slot mailbox
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(1);
        let mut registry = self
            .registry
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.slots.push(Slot { id, tx });
        Subscription { id, rx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry
            .lock()
            .map_or(0, |registry| registry.slots.len())
    }

    /// Offer `notification` to every subscriber without waiting
    pub fn publish(&self, notification: &Notification) -> PublishReport {
        let mut report = PublishReport::default();
        let mut registry = self
            .registry
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        registry.slots.retain(|slot| match slot.tx.try_send(notification.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                self.logger.warn(&format!(
                    "Listener {} has not consumed the previous notification, skipping it",
                    slot.id
                ));
                report.dropped += 1;
                true
            }
            Err(TrySendError::Closed(_)) => {
                self.logger
                    .debug(&format!("Listener {} went away, removing it", slot.id));
                report.pruned += 1;
                false
            }
        });

        report
    }
}
