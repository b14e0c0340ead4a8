//! Fire-and-forget seam to the durable persistence collaborator.
//!
//! The core appends bars, snapshots, and alerts without depending on
//! persistence succeeding synchronously; the durable append log itself is an
//! external collaborator's concern.

use crate::{alert::AlertEvent, analytics::AnalyticsSnapshot, event::Bar};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

/// Sink for immutable pipeline artifacts.
pub trait PersistLog: Send + Sync + 'static {
    fn persist_bar(&self, bar: &Bar);
    fn persist_snapshot(&self, snapshot: &AnalyticsSnapshot);
    fn persist_alert(&self, alert: &AlertEvent);
}

/// Discards everything. Used by tests and embedders that keep no history.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPersist;

impl PersistLog for NullPersist {
    fn persist_bar(&self, _: &Bar) {}
    fn persist_snapshot(&self, _: &AnalyticsSnapshot) {}
    fn persist_alert(&self, _: &AlertEvent) {}
}

/// One appended artifact, tagged for the downstream log writer.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PersistEvent {
    Bar(Bar),
    Snapshot(AnalyticsSnapshot),
    Alert(AlertEvent),
}

/// Forwards artifacts over an unbounded channel to whatever durable
/// collaborator the embedder runs. Send failures mean the collaborator has
/// gone away; the pipeline continues regardless.
#[derive(Debug, Clone)]
pub struct ChannelPersist {
    tx: mpsc::UnboundedSender<PersistEvent>,
}

impl ChannelPersist {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PersistEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: PersistEvent) {
        if self.tx.send(event).is_err() {
            warn!("persistence collaborator dropped, discarding artifact");
        }
    }
}

impl PersistLog for ChannelPersist {
    fn persist_bar(&self, bar: &Bar) {
        self.forward(PersistEvent::Bar(bar.clone()));
    }

    fn persist_snapshot(&self, snapshot: &AnalyticsSnapshot) {
        self.forward(PersistEvent::Snapshot(snapshot.clone()));
    }

    fn persist_alert(&self, alert: &AlertEvent) {
        self.forward(PersistEvent::Alert(alert.clone()));
    }
}
