//! Statistics and metrics for MoQT connections and tracks
//!
//! Counters are append-only. A session hands out snapshots on its sampling
//! interval through `MetricsSampled` events and the track handlers'
//! `on_metrics_sampled` callbacks.

use std::time::{Duration, Instant};

/// Connection-level metrics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionMetrics {
    /// Total bytes read from all streams
    pub bytes_received: u64,
    /// Total bytes handed to the transport
    pub bytes_sent: u64,
    /// Control messages decoded
    pub control_messages_received: u64,
    /// Control messages sent
    pub control_messages_sent: u64,
    /// Data streams accepted from the peer
    pub data_streams_accepted: u64,
    /// Data streams opened locally
    pub data_streams_opened: u64,
    /// Data streams dropped for framing or decode errors
    pub data_stream_errors: u64,
    /// Objects delivered to subscribe handlers
    pub objects_received: u64,
    /// Objects written to data streams
    pub objects_sent: u64,
    /// Objects for a track alias with no live subscription
    pub objects_unknown_track: u64,
    /// Scheduler iterations
    pub scheduler_iterations: u64,
    /// Streams that hit the per-iteration frame budget
    pub budget_exhaustions: u64,
    /// Connection duration at sampling time
    pub duration: Duration,
}

impl ConnectionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive bitrate over the connection lifetime (bits/sec)
    pub fn receive_bitrate(&self) -> u64 {
        let secs = self.duration.as_secs();
        if secs > 0 {
            (self.bytes_received * 8) / secs
        } else {
            0
        }
    }
}

/// Publish track metrics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishTrackMetrics {
    /// Objects accepted by `publish_object`
    pub objects_published: u64,
    /// Payload bytes accepted
    pub bytes_published: u64,
    /// Objects dropped because nobody was subscribed
    pub objects_dropped_no_subscribers: u64,
    /// Data streams opened for this track
    pub streams_opened: u64,
    /// Current peer subscriptions
    pub subscribers: u64,
}

/// Subscribe track metrics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeTrackMetrics {
    /// Objects delivered to the handler
    pub objects_received: u64,
    /// Payload bytes delivered
    pub bytes_received: u64,
    /// Objects dropped as duplicate or out of order
    pub objects_dropped_out_of_order: u64,
    /// Objects dropped because the subscription was not resolved
    pub objects_dropped_not_ready: u64,
    /// Last delivered (group, object)
    pub last_delivered: Option<(u64, u64)>,
}

/// Periodic sampling clock
#[derive(Debug, Clone)]
pub struct SampleTimer {
    interval: Option<Duration>,
    next: Option<Instant>,
}

impl SampleTimer {
    /// `None` disables sampling
    pub fn new(interval: Option<Duration>, now: Instant) -> Self {
        Self {
            interval,
            next: interval.map(|i| now + i),
        }
    }

    /// True once per elapsed interval
    pub fn poll(&mut self, now: Instant) -> bool {
        match (self.interval, self.next) {
            (Some(interval), Some(next)) if now >= next => {
                self.next = Some(now + interval);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receive_bitrate() {
        let metrics = ConnectionMetrics {
            bytes_received: 1_000_000,
            duration: Duration::from_secs(10),
            ..Default::default()
        };
        assert_eq!(metrics.receive_bitrate(), 800_000);
    }

    #[test]
    fn test_receive_bitrate_zero_duration() {
        let metrics = ConnectionMetrics {
            bytes_received: 1_000,
            ..Default::default()
        };
        assert_eq!(metrics.receive_bitrate(), 0);
    }

    #[test]
    fn test_sample_timer() {
        let start = Instant::now();
        let mut timer = SampleTimer::new(Some(Duration::from_secs(1)), start);
        assert!(!timer.poll(start));
        assert!(timer.poll(start + Duration::from_secs(1)));
        assert!(!timer.poll(start + Duration::from_millis(1500)));
        assert!(timer.poll(start + Duration::from_secs(2)));
    }

    #[test]
    fn test_sample_timer_disabled() {
        let start = Instant::now();
        let mut timer = SampleTimer::new(None, start);
        assert!(!timer.poll(start + Duration::from_secs(3600)));
    }
}
