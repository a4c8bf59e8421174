use std::time::Duration;

use herald_dispatch::obs::{CounterVec, GaugeVec, HistogramVec};

/// Receive-side counters, labelled by queue outcome.
#[derive(Default)]
pub struct SubscriberMetrics {
    pub received: CounterVec,
    pub acked: CounterVec,
    pub rejected: CounterVec,
    /// Deliveries settled without dispatch, by `reason`.
    pub dropped: CounterVec,
    pub failures: CounterVec,
    pub consumers: GaugeVec,
    pub processing_duration: HistogramVec, // In Microseconds
}

impl SubscriberMetrics {
    pub fn observe_processing(&self, queue: &str, elapsed: Duration) {
        self.processing_duration.observe(&[("queue", queue)], elapsed);
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        self.received.render("herald_subscriber_received_total", &mut out);
        self.acked.render("herald_subscriber_acked_total", &mut out);
        self.rejected.render("herald_subscriber_rejected_total", &mut out);
        self.dropped.render("herald_subscriber_dropped_total", &mut out);
        self.failures.render("herald_subscriber_failures_total", &mut out);
        self.consumers.render("herald_subscriber_consumers", &mut out);
        self.processing_duration
            .render("herald_subscriber_processing_duration_micros", &mut out);
        out
    }
}
