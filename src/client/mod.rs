//! MoQT client
//!
//! Provides the client side of a MoQT session for:
//! - Publishing tracks under announced namespaces
//! - Subscribing to tracks offered by the server

pub mod config;
pub mod endpoint;

pub use config::ClientConfig;
pub use endpoint::{ClientEvent, MoqClient};
