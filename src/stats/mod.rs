//! Connection and track metrics

pub mod metrics;

pub use metrics::{ConnectionMetrics, PublishTrackMetrics, SampleTimer, SubscribeTrackMetrics};
