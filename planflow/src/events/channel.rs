//! Bridges workflow events to a tokio channel.

use super::EventSink;
use crate::core::TransitionEvent;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::warn;

/// Forwards events to a bounded `mpsc` channel.
///
/// `emit` waits for capacity; `try_emit` drops the event when the channel
/// is full or closed and counts the drop.
#[derive(Debug)]
pub struct ChannelEventSink {
    tx: mpsc::Sender<TransitionEvent>,
    emitted: AtomicU64,
    dropped: AtomicU64,
}

impl ChannelEventSink {
    /// Creates a sink and the receiver that observes it.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TransitionEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                emitted: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Number of events delivered to the channel.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Number of events dropped.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn record_drop(&self, event: &TransitionEvent, reason: &str) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        warn!(
            event_type = %event.event_type,
            workflow_id = %event.workflow_id,
            reason,
            "Dropped workflow event"
        );
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn emit(&self, event: &TransitionEvent) {
        if self.tx.send(event.clone()).await.is_ok() {
            self.emitted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.record_drop(event, "receiver closed");
        }
    }

    fn try_emit(&self, event: &TransitionEvent) {
        match self.tx.try_send(event.clone()) {
            Ok(()) => {
                self.emitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(_)) => self.record_drop(event, "channel full"),
            Err(mpsc::error::TrySendError::Closed(_)) => self.record_drop(event, "receiver closed"),
        }
    }
}
