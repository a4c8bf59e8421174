//! Lightweight in-process metrics (dependency-free).
//!
//! Counters, gauges and histograms are atomics behind `DashMap` label sets,
//! rendered in Prometheus text format by whoever exposes them (the tap
//! binary's `/metrics`).

pub mod metrics;

pub use metrics::{CounterVec, DispatchMetrics, GaugeVec, HistogramVec};
