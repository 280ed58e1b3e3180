//! Announce state machine
//!
//! One [`AnnounceEntry`] per namespace this endpoint announces:
//!
//! ```text
//! NotConnected ─► NotAnnounced ─► PendingAnnounceResponse ─┬─► Ok
//!                      ▲                                   └─► AnnounceNotAuthorized
//!                      └──────── SendingUnannounce ◄── Ok
//! ```
//!
//! Illegal transitions return the current status and leave the entry alone.

use std::time::Instant;

use crate::registry::TrackNamespace;

/// Status of an announced namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishAnnounceStatus {
    NotConnected,
    NotAnnounced,
    PendingAnnounceResponse,
    Ok,
    AnnounceNotAuthorized,
    SendingUnannounce,
}

/// Local announce of one namespace
#[derive(Debug)]
pub struct AnnounceEntry {
    pub namespace: TrackNamespace,
    status: PublishAnnounceStatus,
    deadline: Option<Instant>,
}

impl AnnounceEntry {
    pub fn new(namespace: TrackNamespace) -> Self {
        Self {
            namespace,
            status: PublishAnnounceStatus::NotConnected,
            deadline: None,
        }
    }

    pub fn status(&self) -> PublishAnnounceStatus {
        self.status
    }

    fn transition(
        &mut self,
        from: PublishAnnounceStatus,
        to: PublishAnnounceStatus,
    ) -> Result<(), PublishAnnounceStatus> {
        if self.status != from {
            return Err(self.status);
        }
        tracing::debug!(namespace = %self.namespace, from = ?from, to = ?to, "Announce transition");
        self.status = to;
        Ok(())
    }

    /// NotConnected → NotAnnounced
    pub fn connection_ready(&mut self) -> Result<(), PublishAnnounceStatus> {
        self.transition(
            PublishAnnounceStatus::NotConnected,
            PublishAnnounceStatus::NotAnnounced,
        )
    }

    /// NotAnnounced → PendingAnnounceResponse
    pub fn request(&mut self, deadline: Instant) -> Result<(), PublishAnnounceStatus> {
        self.transition(
            PublishAnnounceStatus::NotAnnounced,
            PublishAnnounceStatus::PendingAnnounceResponse,
        )?;
        self.deadline = Some(deadline);
        Ok(())
    }

    /// PendingAnnounceResponse → Ok
    pub fn accept(&mut self) -> Result<(), PublishAnnounceStatus> {
        self.transition(
            PublishAnnounceStatus::PendingAnnounceResponse,
            PublishAnnounceStatus::Ok,
        )?;
        self.deadline = None;
        Ok(())
    }

    /// PendingAnnounceResponse → AnnounceNotAuthorized
    pub fn reject(&mut self) -> Result<(), PublishAnnounceStatus> {
        self.transition(
            PublishAnnounceStatus::PendingAnnounceResponse,
            PublishAnnounceStatus::AnnounceNotAuthorized,
        )?;
        self.deadline = None;
        Ok(())
    }

    /// Ok → SendingUnannounce
    pub fn begin_unannounce(&mut self) -> Result<(), PublishAnnounceStatus> {
        self.transition(PublishAnnounceStatus::Ok, PublishAnnounceStatus::SendingUnannounce)
    }

    /// SendingUnannounce → NotAnnounced
    pub fn unannounce_sent(&mut self) -> Result<(), PublishAnnounceStatus> {
        self.transition(
            PublishAnnounceStatus::SendingUnannounce,
            PublishAnnounceStatus::NotAnnounced,
        )
    }

    /// Any → NotConnected
    pub fn connection_lost(&mut self) {
        self.status = PublishAnnounceStatus::NotConnected;
        self.deadline = None;
    }

    /// Pending response deadline has passed
    pub fn response_overdue(&self, now: Instant) -> bool {
        self.status == PublishAnnounceStatus::PendingAnnounceResponse
            && self.deadline.is_some_and(|d| now >= d)
    }
}

/// Peer announce tracked on the receiving side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerAnnounceState {
    /// Waiting for the application to resolve
    Pending,
    Accepted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry() -> AnnounceEntry {
        AnnounceEntry::new(TrackNamespace::from_strs(&["live"]))
    }

    #[test]
    fn test_announce_accept_and_unannounce() {
        let now = Instant::now();
        let mut entry = entry();
        assert_eq!(entry.status(), PublishAnnounceStatus::NotConnected);

        entry.connection_ready().unwrap();
        entry.request(now).unwrap();
        assert_eq!(entry.status(), PublishAnnounceStatus::PendingAnnounceResponse);

        entry.accept().unwrap();
        assert_eq!(entry.status(), PublishAnnounceStatus::Ok);

        entry.begin_unannounce().unwrap();
        entry.unannounce_sent().unwrap();
        assert_eq!(entry.status(), PublishAnnounceStatus::NotAnnounced);
    }

    #[test]
    fn test_announce_reject() {
        let mut entry = entry();
        entry.connection_ready().unwrap();
        entry.request(Instant::now()).unwrap();
        entry.reject().unwrap();
        assert_eq!(entry.status(), PublishAnnounceStatus::AnnounceNotAuthorized);

        // Only Ok can be unannounced
        assert_eq!(
            entry.begin_unannounce(),
            Err(PublishAnnounceStatus::AnnounceNotAuthorized)
        );
    }

    #[test]
    fn test_request_requires_connection() {
        let mut entry = entry();
        assert_eq!(
            entry.request(Instant::now()),
            Err(PublishAnnounceStatus::NotConnected)
        );
        assert_eq!(entry.status(), PublishAnnounceStatus::NotConnected);
    }

    #[test]
    fn test_response_deadline() {
        let now = Instant::now();
        let mut entry = entry();
        entry.connection_ready().unwrap();
        entry.request(now + Duration::from_secs(2)).unwrap();

        assert!(!entry.response_overdue(now + Duration::from_secs(1)));
        assert!(entry.response_overdue(now + Duration::from_secs(2)));

        entry.accept().unwrap();
        assert!(!entry.response_overdue(now + Duration::from_secs(10)));
    }

    #[test]
    fn test_connection_lost_from_any_state() {
        let mut entry = entry();
        entry.connection_ready().unwrap();
        entry.request(Instant::now()).unwrap();
        entry.accept().unwrap();
        entry.connection_lost();
        assert_eq!(entry.status(), PublishAnnounceStatus::NotConnected);
    }
}
