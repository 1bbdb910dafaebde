//! The metrics facade (C15): counters, gauges and a histogram abstracted
//! behind a trait so this crate stays decoupled from any concrete exporter
//! (Prometheus, OTLP, ...). [`NoopMetrics`] is the default; a deployment
//! supplies its own [`MetricsProvider`] the same way it supplies a
//! [`crate::logging::LogSink`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// A single `key=value` label attached to a metric observation.
pub type Labels<'a> = &'a [(&'a str, &'a str)];

pub trait MetricsProvider: Send + Sync {
    fn increment_counter(&self, name: &'static str, value: u64, labels: Labels<'_>);
    fn set_gauge(&self, name: &'static str, value: i64, labels: Labels<'_>);
    fn record_histogram(&self, name: &'static str, value_ms: f64, labels: Labels<'_>);

    fn increment(&self, name: &'static str, labels: Labels<'_>) {
        self.increment_counter(name, 1, labels);
    }
}

/// Discards every observation. Used when no provider is configured.
pub struct NoopMetrics;

impl MetricsProvider for NoopMetrics {
    fn increment_counter(&self, _name: &'static str, _value: u64, _labels: Labels<'_>) {}
    fn set_gauge(&self, _name: &'static str, _value: i64, _labels: Labels<'_>) {}
    fn record_histogram(&self, _name: &'static str, _value_ms: f64, _labels: Labels<'_>) {}
}

#[derive(Default)]
struct CounterSlot(AtomicU64);

#[derive(Default)]
struct GaugeSlot(AtomicI64);

/// Accumulates observations in memory; backs tests and local development,
/// the same role `InMemoryLogSink` plays for logging.
#[derive(Default)]
pub struct InMemoryMetrics {
    counters: Mutex<HashMap<&'static str, Arc<CounterSlot>>>,
    gauges: Mutex<HashMap<&'static str, Arc<GaugeSlot>>>,
    histogram_samples: Mutex<HashMap<&'static str, Vec<f64>>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter_value(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .get(name)
            .map(|slot| slot.0.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn gauge_value(&self, name: &str) -> i64 {
        self.gauges
            .lock()
            .get(name)
            .map(|slot| slot.0.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn histogram_samples(&self, name: &str) -> Vec<f64> {
        self.histogram_samples.lock().get(name).cloned().unwrap_or_default()
    }
}

impl MetricsProvider for InMemoryMetrics {
    fn increment_counter(&self, name: &'static str, value: u64, _labels: Labels<'_>) {
        let slot = self.counters.lock().entry(name).or_default().clone();
        slot.0.fetch_add(value, Ordering::Relaxed);
    }

    fn set_gauge(&self, name: &'static str, value: i64, _labels: Labels<'_>) {
        let slot = self.gauges.lock().entry(name).or_default().clone();
        slot.0.store(value, Ordering::Relaxed);
    }

    fn record_histogram(&self, name: &'static str, value_ms: f64, _labels: Labels<'_>) {
        self.histogram_samples.lock().entry(name).or_default().push(value_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates_across_calls() {
        let metrics = InMemoryMetrics::new();
        metrics.increment("worker.ticks", &[]);
        metrics.increment_counter("worker.ticks", 3, &[]);
        assert_eq!(metrics.counter_value("worker.ticks"), 4);
    }

    #[test]
    fn gauge_set_overwrites_rather_than_accumulates() {
        let metrics = InMemoryMetrics::new();
        metrics.set_gauge("worker.inflight", 2, &[]);
        metrics.set_gauge("worker.inflight", 5, &[]);
        assert_eq!(metrics.gauge_value("worker.inflight"), 5);
    }

    #[test]
    fn histogram_keeps_every_sample() {
        let metrics = InMemoryMetrics::new();
        metrics.record_histogram("coordinator.rpc_ms", 12.5, &[]);
        metrics.record_histogram("coordinator.rpc_ms", 8.0, &[]);
        assert_eq!(metrics.histogram_samples("coordinator.rpc_ms"), vec![12.5, 8.0]);
    }
}
