//! Lock-free metrics collection
//!
//! Three metric kinds: monotonic counters, set/inc/dec gauges, and
//! histograms with a fixed bucket ladder plus a bounded ring of recent
//! observations. Labels are folded into the series key at record time.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use dashmap::DashMap;

/// Default bucket ladder for duration histograms, in milliseconds.
pub const DEFAULT_BUCKETS_MS: &[f64] = &[
    1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
];

/// How many recent observations each histogram series retains.
const RING_CAPACITY: usize = 256;

/// One counter series: name, rendered labels, and the running value.
#[derive(Debug)]
pub struct CounterSeries {
    pub name: String,
    pub labels: String,
    pub value: AtomicU64,
}

/// One gauge series.
#[derive(Debug)]
pub struct GaugeSeries {
    pub name: String,
    pub labels: String,
    pub value: AtomicI64,
}

/// Histogram with fixed buckets, running sum/count, and a bounded ring of
/// recent observations. Allocation is O(buckets + ring capacity) per series
/// regardless of how many values are recorded.
#[derive(Debug)]
pub struct Histogram {
    pub name: String,
    pub labels: String,
    /// Upper bounds of each bucket, ascending.
    buckets: Vec<f64>,
    /// Per-bucket (non-cumulative) observation counts. One extra slot
    /// counts observations above the last bound.
    counts: Vec<AtomicU64>,
    /// Running sum, stored as f64 bits.
    sum_bits: AtomicU64,
    count: AtomicU64,
    /// Recent observations, oldest evicted at capacity.
    ring: Mutex<VecDeque<f64>>,
}

impl Histogram {
    fn new(name: String, labels: String, buckets: &[f64]) -> Self {
        let counts = (0..=buckets.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            name,
            labels,
            buckets: buckets.to_vec(),
            counts,
            sum_bits: AtomicU64::new(0f64.to_bits()),
            count: AtomicU64::new(0),
            ring: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
        }
    }

    /// Records one observation.
    pub fn observe(&self, value: f64) {
        let idx = self
            .buckets
            .iter()
            .position(|bound| value <= *bound)
            .unwrap_or(self.buckets.len());
        self.counts[idx].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        let mut current = self.sum_bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + value).to_bits();
            match self.sum_bits.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }

        if let Ok(mut ring) = self.ring.lock() {
            if ring.len() == RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(value);
        }
    }

    /// Consistent-enough view for exposition. Bucket counts are cumulative.
    pub fn snapshot(&self) -> HistogramSnapshot {
        let mut cumulative = Vec::with_capacity(self.buckets.len());
        let mut running = 0u64;
        for (i, bound) in self.buckets.iter().enumerate() {
            running += self.counts[i].load(Ordering::Relaxed);
            cumulative.push((*bound, running));
        }
        let total = running + self.counts[self.buckets.len()].load(Ordering::Relaxed);
        HistogramSnapshot {
            buckets: cumulative,
            sum: f64::from_bits(self.sum_bits.load(Ordering::Relaxed)),
            count: total,
        }
    }

    /// Recent observations, oldest first.
    pub fn recent(&self) -> Vec<f64> {
        self.ring
            .lock()
            .map(|ring| ring.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// Point-in-time histogram view with cumulative bucket counts.
#[derive(Debug, Clone)]
pub struct HistogramSnapshot {
    pub buckets: Vec<(f64, u64)>,
    pub sum: f64,
    pub count: u64,
}

/// Process-wide metrics collector.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    counters: DashMap<String, Arc<CounterSeries>>,
    gauges: DashMap<String, Arc<GaugeSeries>>,
    histograms: DashMap<String, Arc<Histogram>>,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds to a monotonic counter, creating the series on first use.
    pub fn counter_add(&self, name: &str, labels: &[(&str, &str)], delta: u64) {
        let key = series_key(name, labels);
        let series = self
            .counters
            .entry(key)
            .or_insert_with(|| {
                Arc::new(CounterSeries {
                    name: name.to_string(),
                    labels: render_labels(labels),
                    value: AtomicU64::new(0),
                })
            })
            .clone();
        series.value.fetch_add(delta, Ordering::Relaxed);
    }

    /// Sets a gauge to an absolute value.
    pub fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: i64) {
        self.gauge(name, labels).value.store(value, Ordering::Relaxed);
    }

    /// Increments a gauge.
    pub fn gauge_inc(&self, name: &str, labels: &[(&str, &str)]) {
        self.gauge(name, labels).value.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements a gauge.
    pub fn gauge_dec(&self, name: &str, labels: &[(&str, &str)]) {
        self.gauge(name, labels).value.fetch_sub(1, Ordering::Relaxed);
    }

    /// Current gauge value, zero when the series does not exist.
    #[must_use]
    pub fn gauge_value(&self, name: &str, labels: &[(&str, &str)]) -> i64 {
        self.gauges
            .get(&series_key(name, labels))
            .map(|s| s.value.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Current counter value, zero when the series does not exist.
    #[must_use]
    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .get(&series_key(name, labels))
            .map(|s| s.value.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Records an observation against the default duration ladder.
    pub fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.histogram(name, labels, DEFAULT_BUCKETS_MS).observe(value);
    }

    /// Histogram handle with an explicit bucket ladder.
    pub fn histogram(&self, name: &str, labels: &[(&str, &str)], buckets: &[f64]) -> Arc<Histogram> {
        let key = series_key(name, labels);
        self.histograms
            .entry(key)
            .or_insert_with(|| {
                Arc::new(Histogram::new(name.to_string(), render_labels(labels), buckets))
            })
            .clone()
    }

    fn gauge(&self, name: &str, labels: &[(&str, &str)]) -> Arc<GaugeSeries> {
        let key = series_key(name, labels);
        self.gauges
            .entry(key)
            .or_insert_with(|| {
                Arc::new(GaugeSeries {
                    name: name.to_string(),
                    labels: render_labels(labels),
                    value: AtomicI64::new(0),
                })
            })
            .clone()
    }

    pub(crate) fn counters(&self) -> Vec<Arc<CounterSeries>> {
        self.counters.iter().map(|e| e.value().clone()).collect()
    }

    pub(crate) fn gauges(&self) -> Vec<Arc<GaugeSeries>> {
        self.gauges.iter().map(|e| e.value().clone()).collect()
    }

    pub(crate) fn histograms(&self) -> Vec<Arc<Histogram>> {
        self.histograms.iter().map(|e| e.value().clone()).collect()
    }
}

/// `name` or `name{a="b",c="d"}`, labels in the order given.
fn series_key(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        name.to_string()
    } else {
        format!("{name}{{{}}}", render_labels(labels))
    }
}

fn render_labels(labels: &[(&str, &str)]) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{v}\""))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates_per_label_set() {
        let metrics = MetricsCollector::new();
        metrics.counter_add("requests_total", &[("method", "GET")], 1);
        metrics.counter_add("requests_total", &[("method", "GET")], 2);
        metrics.counter_add("requests_total", &[("method", "POST")], 5);

        assert_eq!(metrics.counter_value("requests_total", &[("method", "GET")]), 3);
        assert_eq!(metrics.counter_value("requests_total", &[("method", "POST")]), 5);
    }

    #[test]
    fn gauge_tracks_inc_dec_set() {
        let metrics = MetricsCollector::new();
        metrics.gauge_inc("active", &[]);
        metrics.gauge_inc("active", &[]);
        metrics.gauge_dec("active", &[]);
        assert_eq!(metrics.gauge_value("active", &[]), 1);

        metrics.gauge_set("active", &[], 42);
        assert_eq!(metrics.gauge_value("active", &[]), 42);
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let metrics = MetricsCollector::new();
        let hist = metrics.histogram("latency", &[], &[10.0, 100.0, 1000.0]);
        hist.observe(5.0);
        hist.observe(50.0);
        hist.observe(500.0);
        hist.observe(5000.0);

        let snap = hist.snapshot();
        assert_eq!(snap.count, 4);
        assert_eq!(snap.buckets, vec![(10.0, 1), (100.0, 2), (1000.0, 3)]);
        assert!((snap.sum - 5555.0).abs() < f64::EPSILON);
    }

    #[test]
    fn histogram_ring_stays_bounded() {
        let metrics = MetricsCollector::new();
        let hist = metrics.histogram("latency", &[], &[10.0]);
        for i in 0..10_000 {
            hist.observe(f64::from(i % 100));
        }
        assert!(hist.recent().len() <= RING_CAPACITY);
        assert_eq!(hist.snapshot().count, 10_000);
    }
}
