//! Prometheus text exposition (format 0.0.4)
//!
//! Renders the collector into the plain-text format scraped at `/metrics`:
//! one `# TYPE` line per family, then each series. Histograms emit
//! `_bucket{le=…}` lines including `+Inf`, plus `_sum` and `_count`.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::Ordering;

use super::metrics::MetricsCollector;

/// Renders every known series into the exposition text.
#[must_use]
pub fn render(metrics: &MetricsCollector) -> String {
    let mut out = String::with_capacity(4096);

    let mut counters: BTreeMap<String, Vec<(String, u64)>> = BTreeMap::new();
    for series in metrics.counters() {
        counters
            .entry(series.name.clone())
            .or_default()
            .push((series.labels.clone(), series.value.load(Ordering::Relaxed)));
    }
    for (name, mut entries) in counters {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let _ = writeln!(out, "# TYPE {name} counter");
        for (labels, value) in entries {
            let _ = writeln!(out, "{}{} {value}", name, braced(&labels));
        }
    }

    let mut gauges: BTreeMap<String, Vec<(String, i64)>> = BTreeMap::new();
    for series in metrics.gauges() {
        gauges
            .entry(series.name.clone())
            .or_default()
            .push((series.labels.clone(), series.value.load(Ordering::Relaxed)));
    }
    for (name, mut entries) in gauges {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let _ = writeln!(out, "# TYPE {name} gauge");
        for (labels, value) in entries {
            let _ = writeln!(out, "{}{} {value}", name, braced(&labels));
        }
    }

    let mut histograms: BTreeMap<String, Vec<std::sync::Arc<super::Histogram>>> = BTreeMap::new();
    for series in metrics.histograms() {
        histograms.entry(series.name.clone()).or_default().push(series);
    }
    for (name, mut entries) in histograms {
        entries.sort_by(|a, b| a.labels.cmp(&b.labels));
        let _ = writeln!(out, "# TYPE {name} histogram");
        for series in entries {
            let snap = series.snapshot();
            for (bound, cumulative) in &snap.buckets {
                let le = format_bound(*bound);
                let _ = writeln!(
                    out,
                    "{name}_bucket{} {cumulative}",
                    with_label(&series.labels, "le", &le)
                );
            }
            let _ = writeln!(
                out,
                "{name}_bucket{} {}",
                with_label(&series.labels, "le", "+Inf"),
                snap.count
            );
            let _ = writeln!(out, "{name}_sum{} {}", braced(&series.labels), format_value(snap.sum));
            let _ = writeln!(out, "{name}_count{} {}", braced(&series.labels), snap.count);
        }
    }

    out
}

fn braced(labels: &str) -> String {
    if labels.is_empty() {
        String::new()
    } else {
        format!("{{{labels}}}")
    }
}

fn with_label(labels: &str, key: &str, value: &str) -> String {
    if labels.is_empty() {
        format!("{{{key}=\"{value}\"}}")
    } else {
        format!("{{{labels},{key}=\"{value}\"}}")
    }
}

/// Integral bounds print without a trailing `.0` so `le="10"` stays stable
/// across exporters.
fn format_bound(bound: f64) -> String {
    if bound.fract() == 0.0 && bound.abs() < 1e15 {
        format!("{}", bound as i64)
    } else {
        format!("{bound}")
    }
}

fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
