//! Track registry
//!
//! Every connection keeps one registry mapping a track's hash to the single
//! handler (publish or subscribe) currently bound to it.
//!
//! # Architecture
//!
//! ```text
//!                    TrackRegistry
//!            ┌──────────────────────────────┐
//!            │ full_hash ─► TrackEntry::    │
//!            │   Publish(handler, mode) |   │
//!            │   Subscribe(handler, id)     │
//!            └──────────────┬───────────────┘
//!                           │ lookup(track_alias)
//!         ┌─────────────────┴──────────────────┐
//!         ▼                                    ▼
//!  publish_object()                    on_object_received()
//!  → data streams                      ← data streams
//! ```
//!
//! The wire track alias is `TrackHash::full_hash`, so an incoming object is
//! routed with one map lookup.

pub mod entry;
pub mod error;
pub mod handler;
pub mod store;
pub mod track;

pub use entry::{PublishTrackEntry, SubscribeTrackEntry, TrackEntry, TrackStatusCell};
pub use error::RegistryError;
pub use handler::{PublishTrackHandler, PublishTrackStatus, SubscribeStatus, SubscribeTrackHandler};
pub use store::TrackRegistry;
pub use track::{FullTrackName, TrackHash, TrackNamespace};
