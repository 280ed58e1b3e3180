//! Media over QUIC Transport (MoQT) protocol engine
//!
//! This crate provides:
//! - The MoQT control and data stream wire format
//! - A per-connection track registry keyed by track hash
//! - Announce, subscribe and connection state machines
//! - A fair stream read scheduler driving a sans-IO session
//! - Tokio-based [`MoqClient`] and [`MoqServer`] endpoints
//!
//! The QUIC layer sits behind the [`Transport`] trait; [`MemoryTransport`]
//! connects two endpoints in-process.
//!
//! # Example
//! ```no_run
//! use moqt_rs::{ClientConfig, MoqClient, MoqServer, ServerConfig};
//! use moqt_rs::transport::MemoryTransport;
//!
//! # async fn example() -> moqt_rs::error::Result<()> {
//! let (server, _server_events) = MoqServer::new(ServerConfig::default());
//! server.start();
//!
//! let (client_side, server_side) = MemoryTransport::pair();
//! server.accept(server_side)?;
//!
//! let (mut client, _client_events) = MoqClient::new(ClientConfig::default());
//! client.connect(client_side);
//! client.wait_connected().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;
pub mod transport;

pub use client::{ClientConfig, ClientEvent, MoqClient};
pub use error::{Error, ProtocolError, Result};
pub use protocol::{ObjectHeaders, ObjectStatus, TrackMode};
pub use registry::{
    FullTrackName, PublishTrackHandler, PublishTrackStatus, SubscribeStatus, SubscribeTrackHandler,
    TrackHash, TrackNamespace,
};
pub use server::{MoqServer, ServerConfig, ServerEvent};
pub use session::{
    AnnounceResponse, ConnectionId, ConnectionStatus, PublishAttributes, PublishObjectStatus,
    PublishTrack, Session, SessionConfig, SessionEvent, Status, SubscribeAttributes,
    SubscribeResponse,
};
pub use transport::{MemoryTransport, Transport};
