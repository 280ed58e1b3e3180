//! Track entry and state types
//!
//! This module defines the per-track state stored in the registry.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::protocol::TrackMode;
use crate::stats::{PublishTrackMetrics, SubscribeTrackMetrics};

use super::handler::{PublishTrackHandler, PublishTrackStatus, SubscribeStatus, SubscribeTrackHandler};
use super::track::{FullTrackName, TrackHash};

/// Publish status shared with `PublishTrack` handles outside the loop
#[derive(Debug, Clone)]
pub struct TrackStatusCell(Arc<AtomicU8>);

impl TrackStatusCell {
    pub fn new(status: PublishTrackStatus) -> Self {
        Self(Arc::new(AtomicU8::new(status.as_u8())))
    }

    pub fn get(&self) -> PublishTrackStatus {
        PublishTrackStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, status: PublishTrackStatus) {
        self.0.store(status.as_u8(), Ordering::Release);
    }
}

/// A track published on this connection
pub struct PublishTrackEntry {
    pub name: FullTrackName,
    pub hash: TrackHash,
    pub mode: TrackMode,
    pub default_priority: u8,
    pub metrics: PublishTrackMetrics,
    handler: Box<dyn PublishTrackHandler>,
    status: PublishTrackStatus,
    shared: TrackStatusCell,
}

impl PublishTrackEntry {
    pub fn new(
        name: FullTrackName,
        handler: Box<dyn PublishTrackHandler>,
        mode: TrackMode,
        default_priority: u8,
    ) -> Self {
        let status = PublishTrackStatus::NotAnnounced;
        Self {
            hash: name.track_hash(),
            name,
            mode,
            default_priority,
            metrics: PublishTrackMetrics::default(),
            handler,
            status,
            shared: TrackStatusCell::new(status),
        }
    }

    /// Mirror status into a cell created ahead of registration
    pub fn with_status_cell(mut self, cell: TrackStatusCell) -> Self {
        cell.set(self.status);
        self.shared = cell;
        self
    }

    pub fn status(&self) -> PublishTrackStatus {
        self.status
    }

    /// Cell mirrored on every status change
    pub fn status_cell(&self) -> TrackStatusCell {
        self.shared.clone()
    }

    /// Update status; the handler is notified only on change
    pub fn set_status(&mut self, status: PublishTrackStatus) {
        if self.status == status {
            return;
        }
        tracing::debug!(
            track = %self.name,
            from = ?self.status,
            to = ?status,
            "Publish track status changed"
        );
        self.status = status;
        self.shared.set(status);
        self.handler.on_status_changed(status);
    }

    pub fn sample_metrics(&mut self) {
        self.handler.on_metrics_sampled(&self.metrics);
    }
}

/// A track subscribed on this connection
pub struct SubscribeTrackEntry {
    pub name: FullTrackName,
    pub hash: TrackHash,
    /// Live subscribe id, if a Subscribe has been sent
    pub subscribe_id: Option<u64>,
    pub metrics: SubscribeTrackMetrics,
    pub(crate) handler: Box<dyn SubscribeTrackHandler>,
    status: SubscribeStatus,
}

impl SubscribeTrackEntry {
    pub fn new(name: FullTrackName, handler: Box<dyn SubscribeTrackHandler>) -> Self {
        Self {
            hash: name.track_hash(),
            name,
            subscribe_id: None,
            metrics: SubscribeTrackMetrics::default(),
            handler,
            status: SubscribeStatus::NotSubscribed,
        }
    }

    pub fn status(&self) -> SubscribeStatus {
        self.status
    }

    /// Update status; the handler is notified only on change
    pub fn set_status(&mut self, status: SubscribeStatus) {
        if self.status == status {
            return;
        }
        tracing::debug!(
            track = %self.name,
            from = ?self.status,
            to = ?status,
            "Subscribe track status changed"
        );
        self.status = status;
        self.handler.on_status_changed(status);
    }

    pub fn sample_metrics(&mut self) {
        self.handler.on_metrics_sampled(&self.metrics);
    }
}

/// Registry entry: exactly one handler per track hash
pub enum TrackEntry {
    Publish(PublishTrackEntry),
    Subscribe(SubscribeTrackEntry),
}

impl TrackEntry {
    pub fn name(&self) -> &FullTrackName {
        match self {
            TrackEntry::Publish(e) => &e.name,
            TrackEntry::Subscribe(e) => &e.name,
        }
    }

    pub fn hash(&self) -> TrackHash {
        match self {
            TrackEntry::Publish(e) => e.hash,
            TrackEntry::Subscribe(e) => e.hash,
        }
    }

    pub fn is_publish(&self) -> bool {
        matches!(self, TrackEntry::Publish(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Arc<Mutex<Vec<PublishTrackStatus>>>);

    impl PublishTrackHandler for Recorder {
        fn on_status_changed(&mut self, status: PublishTrackStatus) {
            self.0.lock().unwrap().push(status);
        }
    }

    #[test]
    fn test_status_change_notifies_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut entry = PublishTrackEntry::new(
            FullTrackName::from_strs(&["ns"], "t"),
            Box::new(Recorder(seen.clone())),
            TrackMode::StreamPerGroup,
            1,
        );
        let cell = entry.status_cell();

        entry.set_status(PublishTrackStatus::NoSubscribers);
        entry.set_status(PublishTrackStatus::NoSubscribers);
        entry.set_status(PublishTrackStatus::Ok);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![PublishTrackStatus::NoSubscribers, PublishTrackStatus::Ok]
        );
        assert_eq!(cell.get(), PublishTrackStatus::Ok);
    }
}
