//! Progress sink and event bus.
//!
//! Managers publish state changes through a [`ProgressSink`]. [`EventBus`]
//! wraps a `tokio::sync::broadcast` channel with a bounded ring buffer of
//! recent events so that late subscribers can catch up. Delivery is
//! best-effort: a lagging subscriber loses events rather than blocking the
//! emitting worker.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::conversion::ConversionProgress;
use crate::download::{DownloadProgress, QueueItem};

/// Maximum number of events retained in the ring buffer.
const MAX_RECENT_EVENTS: usize = 100;

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// Something an observer may want to know about.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum Event {
    /// Full snapshot of the download queue.
    #[serde(rename = "queue:updated")]
    QueueUpdated(Vec<QueueItem>),
    #[serde(rename = "download:progress")]
    DownloadProgress(DownloadProgress),
    #[serde(rename = "conversion:progress")]
    ConversionProgress(ConversionProgress),
}

impl Event {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Event::QueueUpdated(_) => "queue:updated",
            Event::DownloadProgress(_) => "download:progress",
            Event::ConversionProgress(_) => "conversion:progress",
        }
    }
}

// ---------------------------------------------------------------------------
// ProgressSink
// ---------------------------------------------------------------------------

/// One-way event emitter shared by every worker.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: Event);
}

impl<T: ProgressSink + ?Sized> ProgressSink for Arc<T> {
    fn emit(&self, event: Event) {
        (**self).emit(event)
    }
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: Event) {}
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast channel with a bounded ring buffer of recent events.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    recent: RwLock<VecDeque<Event>>,
}

impl EventBus {
    /// Create a new event bus.
    ///
    /// `capacity` controls the broadcast channel buffer size (not the ring
    /// buffer, which is always [`MAX_RECENT_EVENTS`]).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            recent: RwLock::new(VecDeque::with_capacity(MAX_RECENT_EVENTS)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Send to all current subscribers and record in the ring buffer.
    pub fn broadcast(&self, event: Event) {
        {
            let mut recent = self.recent.write();
            if recent.len() >= MAX_RECENT_EVENTS {
                recent.pop_back();
            }
            recent.push_front(event.clone());
        }

        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    /// Return the `n` most recent events (newest first).
    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        let recent = self.recent.read();
        recent.iter().take(n).cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ProgressSink for EventBus {
    fn emit(&self, event: Event) {
        tracing::trace!(event = event.name(), "emit");
        self.broadcast(event);
    }
}
