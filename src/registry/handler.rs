//! Track handler callbacks
//!
//! Handlers are invoked synchronously on the connection loop. They must not
//! block; hand heavy work off to another task.

use bytes::Bytes;

use crate::protocol::ObjectHeaders;
use crate::stats::{PublishTrackMetrics, SubscribeTrackMetrics};

/// Status of a published track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishTrackStatus {
    /// At least one subscriber; objects are sent
    Ok,
    NotConnected,
    NotAnnounced,
    PendingAnnounceResponse,
    AnnounceNotAuthorized,
    /// Announced (or server side) but nobody subscribed yet
    NoSubscribers,
    SendingUnannounce,
}

impl PublishTrackStatus {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            PublishTrackStatus::Ok => 0,
            PublishTrackStatus::NotConnected => 1,
            PublishTrackStatus::NotAnnounced => 2,
            PublishTrackStatus::PendingAnnounceResponse => 3,
            PublishTrackStatus::AnnounceNotAuthorized => 4,
            PublishTrackStatus::NoSubscribers => 5,
            PublishTrackStatus::SendingUnannounce => 6,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => PublishTrackStatus::Ok,
            2 => PublishTrackStatus::NotAnnounced,
            3 => PublishTrackStatus::PendingAnnounceResponse,
            4 => PublishTrackStatus::AnnounceNotAuthorized,
            5 => PublishTrackStatus::NoSubscribers,
            6 => PublishTrackStatus::SendingUnannounce,
            _ => PublishTrackStatus::NotConnected,
        }
    }
}

/// Status of a subscribed track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeStatus {
    /// Subscription accepted by the publisher
    Ok,
    NotConnected,
    /// Subscribe sent, waiting for SubscribeOk/SubscribeError
    PendingResponse,
    /// Publisher rejected the subscription, or it timed out
    Rejected { code: u64 },
    /// Track could not be registered (collision or duplicate)
    RegistrationFailed,
    /// Subscription ended by the publisher or by expiry
    Ended,
    /// Unsubscribed locally
    NotSubscribed,
}

/// Receives objects and status for one subscribed track
pub trait SubscribeTrackHandler: Send {
    fn on_status_changed(&mut self, _status: SubscribeStatus) {}

    fn on_object_received(&mut self, headers: &ObjectHeaders, payload: Bytes);

    fn on_metrics_sampled(&mut self, _metrics: &SubscribeTrackMetrics) {}
}

/// Receives status for one published track
pub trait PublishTrackHandler: Send {
    /// `Ok` means objects published now reach at least one subscriber
    fn on_status_changed(&mut self, _status: PublishTrackStatus) {}

    fn on_metrics_sampled(&mut self, _metrics: &PublishTrackMetrics) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_status_u8() {
        for status in [
            PublishTrackStatus::Ok,
            PublishTrackStatus::NotConnected,
            PublishTrackStatus::NotAnnounced,
            PublishTrackStatus::PendingAnnounceResponse,
            PublishTrackStatus::AnnounceNotAuthorized,
            PublishTrackStatus::NoSubscribers,
            PublishTrackStatus::SendingUnannounce,
        ] {
            assert_eq!(PublishTrackStatus::from_u8(status.as_u8()), status);
        }
    }
}
