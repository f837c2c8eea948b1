use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

pub const GENERATIONS_TOTAL: &str = "generations_total";
pub const GENERATION_DURATION_SECONDS: &str = "generation_duration_seconds";
pub const GENERATION_TOKENS_PER_SECOND: &str = "generation_tokens_per_second";
pub const CONNECTED_CLIENTS: &str = "connected_clients";

/// Percentiles over every observation recorded so far.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Default)]
struct Histogram {
    observations: Mutex<Vec<f64>>,
}

impl Histogram {
    fn observe(&self, value: f64) {
        self.observations.lock().push(value);
    }

    fn summary(&self) -> HistogramSummary {
        let mut obs = self.observations.lock().clone();
        if obs.is_empty() {
            return HistogramSummary::default();
        }
        obs.sort_by(|a, b| a.total_cmp(b));
        let count = obs.len();
        let at = |q: f64| obs[((count as f64 * q) as usize).min(count - 1)];
        HistogramSummary {
            count: count as u64,
            sum: obs.iter().sum(),
            p50: at(0.50),
            p95: at(0.95),
            p99: at(0.99),
        }
    }
}

/// Name plus labels sorted by key, so label order never splits a series.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
struct SeriesKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl SeriesKey {
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        let mut labels: Vec<(String, String)> =
            labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        labels.sort();
        Self {
            name: name.to_string(),
            labels,
        }
    }

    /// `name{k=v,k2=v2}`
    fn render(&self) -> String {
        if self.labels.is_empty() {
            return self.name.clone();
        }
        let labels: Vec<String> = self.labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("{}{{{}}}", self.name, labels.join(","))
    }
}

/// Point-in-time copy of every series, keyed by rendered series name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, f64>,
    pub histograms: BTreeMap<String, HistogramSummary>,
}

/// Process-local counters, gauges and histograms.
#[derive(Default)]
pub struct MetricsRecorder {
    counters: RwLock<HashMap<SeriesKey, AtomicU64>>,
    gauges: RwLock<HashMap<SeriesKey, AtomicU64>>,
    histograms: RwLock<HashMap<SeriesKey, Histogram>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter_inc(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        let key = SeriesKey::new(name, labels);
        if let Some(c) = self.counters.read().get(&key) {
            c.fetch_add(n, Ordering::Relaxed);
            return;
        }
        self.counters
            .write()
            .entry(key)
            .or_default()
            .fetch_add(n, Ordering::Relaxed);
    }

    pub fn counter_get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .read()
            .get(&SeriesKey::new(name, labels))
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Gauges hold an `f64` stored as raw bits.
    pub fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = SeriesKey::new(name, labels);
        if let Some(g) = self.gauges.read().get(&key) {
            g.store(value.to_bits(), Ordering::Relaxed);
            return;
        }
        self.gauges
            .write()
            .entry(key)
            .or_default()
            .store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn gauge_get(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        self.gauges
            .read()
            .get(&SeriesKey::new(name, labels))
            .map_or(0.0, |g| f64::from_bits(g.load(Ordering::Relaxed)))
    }

    pub fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = SeriesKey::new(name, labels);
        if let Some(h) = self.histograms.read().get(&key) {
            h.observe(value);
            return;
        }
        self.histograms.write().entry(key).or_default().observe(value);
    }

    pub fn histogram_summary(&self, name: &str, labels: &[(&str, &str)]) -> HistogramSummary {
        self.histograms
            .read()
            .get(&SeriesKey::new(name, labels))
            .map(Histogram::summary)
            .unwrap_or_default()
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            counters: self
                .counters
                .read()
                .iter()
                .map(|(k, v)| (k.render(), v.load(Ordering::Relaxed)))
                .collect(),
            gauges: self
                .gauges
                .read()
                .iter()
                .map(|(k, v)| (k.render(), f64::from_bits(v.load(Ordering::Relaxed))))
                .collect(),
            histograms: self
                .histograms
                .read()
                .iter()
                .map(|(k, h)| (k.render(), h.summary()))
                .collect(),
        }
    }
}
