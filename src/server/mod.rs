//! MoQT server
//!
//! Provides the server side of MoQT sessions:
//! - Accepting transports and running one connection loop each
//! - Resolving client announces and subscribes
//! - Publishing and subscribing on individual connections

pub mod config;
pub mod connections;
pub mod listener;

pub use config::ServerConfig;
pub use connections::ConnectionRegistry;
pub use listener::{MoqServer, ServerEvent};
