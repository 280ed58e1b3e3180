//! MoQT session
//!
//! This module provides:
//! - Connection, announce and subscribe state machines
//! - The fair stream read scheduler
//! - The sans-IO [`Session`] engine and its tokio connection loop
//! - Publish-side object writers and `PublishTrack` handles

pub mod announce;
pub mod command;
pub mod config;
mod dispatch;
pub mod driver;
mod engine;
pub mod event;
mod ops;
pub mod publish;
pub mod scheduler;
pub mod state;
pub mod subscribe;

pub use announce::{AnnounceEntry, PeerAnnounceState, PublishAnnounceStatus};
pub use command::{AnnounceResponse, Command, PublishAttributes, SubscribeAttributes, SubscribeResponse};
pub use config::SessionConfig;
pub use driver::{connection, ConnectionHandle, Driver};
pub use engine::Session;
pub use event::SessionEvent;
pub use publish::{PublishObjectStatus, PublishTrack};
pub use scheduler::{FrameSink, IterationReport, SchedulerConfig, StreamScheduler};
pub use state::{ConnectionId, ConnectionState, ConnectionStatus, Role, Status};
pub use subscribe::{ObjectRejection, SubscribeEntry, SubscribeMachine, SubscribeState};
