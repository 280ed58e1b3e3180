//! Connection state machine
//!
//! Tracks one connection from setup to teardown:
//!
//! ```text
//! NotConnected ─► Connecting ─► Connected ─┬─► IdleTimeout
//!                     │                    ├─► ClosedByRemote
//!                     └─► NotConnected ◄───┘   (disconnect / setup failure)
//! ```

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::transport::StreamId;

/// Connection identifier, unique per server (clients use 0)
pub type ConnectionId = u64;

/// Connection status reported to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    NotConnected,
    /// Setup exchange in progress
    Connecting,
    Connected,
    /// No activity within the idle timeout
    IdleTimeout,
    ClosedByRemote,
}

impl ConnectionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionStatus::IdleTimeout | ConnectionStatus::ClosedByRemote)
    }
}

/// Acceptance of an API call (not its eventual outcome)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ready,
    NotReady,
    InternalError,
    InvalidParams,
    Connecting,
    Disconnecting,
    NotConnected,
    FailedToConnect,
}

/// Which side of the setup exchange this endpoint plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Complete connection state
#[derive(Debug)]
pub struct ConnectionState {
    /// Connection ID
    pub id: ConnectionId,

    /// Setup role
    pub role: Role,

    /// Negotiated version (after setup)
    pub version: Option<u64>,

    /// Remote endpoint id from setup parameters
    pub peer_endpoint_id: Option<String>,

    /// Accepted data stream ids
    pub data_streams: HashSet<StreamId>,

    /// When setup started
    pub started_at: Option<Instant>,

    /// When setup completed
    pub connected_at: Option<Instant>,

    status: ConnectionStatus,
    last_activity: Instant,
    idle_timeout: Duration,
}

impl ConnectionState {
    pub fn new(id: ConnectionId, role: Role, idle_timeout: Duration, now: Instant) -> Self {
        Self {
            id,
            role,
            version: None,
            peer_endpoint_id: None,
            data_streams: HashSet::new(),
            started_at: None,
            connected_at: None,
            status: ConnectionStatus::NotConnected,
            last_activity: now,
            idle_timeout,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// NotConnected → Connecting
    pub fn start_connecting(&mut self, now: Instant) -> bool {
        if self.status != ConnectionStatus::NotConnected {
            return false;
        }
        self.status = ConnectionStatus::Connecting;
        self.started_at = Some(now);
        self.last_activity = now;
        true
    }

    /// Connecting → Connected
    pub fn complete_setup(&mut self, version: u64, now: Instant) -> bool {
        if self.status != ConnectionStatus::Connecting {
            return false;
        }
        self.status = ConnectionStatus::Connected;
        self.version = Some(version);
        self.connected_at = Some(now);
        self.last_activity = now;
        true
    }

    /// Record inbound activity
    pub fn on_activity(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Whether the idle timeout has elapsed while connecting or connected
    pub fn idle_expired(&self, now: Instant) -> bool {
        matches!(
            self.status,
            ConnectionStatus::Connecting | ConnectionStatus::Connected
        ) && now.saturating_duration_since(self.last_activity) >= self.idle_timeout
    }

    /// Move to a closed status; returns the previous status
    ///
    /// Idle timeout and remote close only apply to a connection that got past
    /// setup; from Connecting every close lands in NotConnected.
    pub fn close(&mut self, status: ConnectionStatus) -> ConnectionStatus {
        let previous = self.status;
        self.status = match (previous, status) {
            (ConnectionStatus::Connected, s) => s,
            _ => ConnectionStatus::NotConnected,
        };
        self.data_streams.clear();
        previous
    }

    /// Time spent connected
    pub fn uptime(&self, now: Instant) -> Duration {
        self.connected_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> (ConnectionState, Instant) {
        let now = Instant::now();
        (
            ConnectionState::new(1, Role::Client, Duration::from_secs(5), now),
            now,
        )
    }

    #[test]
    fn test_state_transitions() {
        let (mut state, now) = state();
        assert_eq!(state.status(), ConnectionStatus::NotConnected);

        assert!(state.start_connecting(now));
        assert_eq!(state.status(), ConnectionStatus::Connecting);

        assert!(state.complete_setup(0xff00_0004, now));
        assert!(state.is_connected());
        assert_eq!(state.version, Some(0xff00_0004));
    }

    #[test]
    fn test_invalid_transitions_do_not_mutate() {
        let (mut state, now) = state();
        assert!(!state.complete_setup(1, now));
        assert_eq!(state.status(), ConnectionStatus::NotConnected);

        state.start_connecting(now);
        assert!(!state.start_connecting(now));
        assert_eq!(state.status(), ConnectionStatus::Connecting);
    }

    #[test]
    fn test_idle_timeout() {
        let (mut state, now) = state();
        state.start_connecting(now);
        state.complete_setup(1, now);

        assert!(!state.idle_expired(now + Duration::from_secs(4)));
        state.on_activity(now + Duration::from_secs(4));
        assert!(!state.idle_expired(now + Duration::from_secs(8)));
        assert!(state.idle_expired(now + Duration::from_secs(9)));

        state.close(ConnectionStatus::IdleTimeout);
        assert_eq!(state.status(), ConnectionStatus::IdleTimeout);
        assert!(state.status().is_terminal());
        assert!(!state.idle_expired(now + Duration::from_secs(60)));
    }

    #[test]
    fn test_close_during_setup() {
        let (mut state, now) = state();
        state.start_connecting(now);
        let previous = state.close(ConnectionStatus::ClosedByRemote);
        assert_eq!(previous, ConnectionStatus::Connecting);
        assert_eq!(state.status(), ConnectionStatus::NotConnected);
    }

    #[test]
    fn test_not_connected_is_not_idle() {
        let (state, now) = state();
        assert!(!state.idle_expired(now + Duration::from_secs(3600)));
    }
}
