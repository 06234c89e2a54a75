use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const WORKFLOW_SUCCESS_TOTAL: &str = "workflow_success_total";
pub const WORKFLOW_FAILURE_TOTAL: &str = "workflow_failure_total";
pub const WORKFLOW_DURATION_SECONDS: &str = "workflow_duration_seconds";
pub const WORKFLOWS_IN_FLIGHT: &str = "workflows_in_flight";

/// Default histogram buckets, in seconds
const DEFAULT_BUCKETS: [f64; 10] = [0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

pub type Labels = HashMap<String, String>;

/// In-process metrics for workflow runs
#[derive(Clone, Default)]
pub struct MetricsCollector {
    counters: Arc<Mutex<HashMap<String, Counter>>>,
    gauges: Arc<Mutex<HashMap<String, Gauge>>>,
    histograms: Arc<Mutex<HashMap<String, Histogram>>>,
}

/// Counter - monotonically increasing value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counter {
    pub name: String,
    pub value: u64,
    pub labels: Labels,
    pub last_updated: DateTime<Utc>,
}

/// Gauge - value that can go up or down
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gauge {
    pub name: String,
    pub value: f64,
    pub labels: Labels,
    pub last_updated: DateTime<Utc>,
}

/// Histogram - cumulative bucket counts of observed values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Histogram {
    pub name: String,
    pub buckets: Vec<f64>,
    pub counts: Vec<u64>,
    pub sum: f64,
    pub count: u64,
    pub labels: Labels,
    pub last_updated: DateTime<Utc>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A workflow run started
    pub fn workflow_started(&self) {
        self.increment_gauge(WORKFLOWS_IN_FLIGHT, 1.0, Labels::new());
    }

    /// A workflow run finished; `success` selects the counter to bump
    pub fn workflow_finished(&self, success: bool, duration: Duration) {
        self.increment_gauge(WORKFLOWS_IN_FLIGHT, -1.0, Labels::new());

        let counter = if success {
            WORKFLOW_SUCCESS_TOTAL
        } else {
            WORKFLOW_FAILURE_TOTAL
        };
        self.increment_counter(counter, Labels::new());

        let outcome = if success { "success" } else { "failure" };
        self.observe_histogram(
            WORKFLOW_DURATION_SECONDS,
            duration.as_secs_f64(),
            Labels::from([("outcome".to_string(), outcome.to_string())]),
        );
    }

    /// Increment a counter
    pub fn increment_counter(&self, name: &str, labels: Labels) {
        let mut counters = self.counters.lock().unwrap();
        let key = Self::metric_key(name, &labels);

        counters
            .entry(key)
            .and_modify(|c| {
                c.value += 1;
                c.last_updated = Utc::now();
            })
            .or_insert_with(|| Counter {
                name: name.to_string(),
                value: 1,
                labels,
                last_updated: Utc::now(),
            });
    }

    /// Add `delta` to a gauge, starting from zero
    pub fn increment_gauge(&self, name: &str, delta: f64, labels: Labels) {
        let mut gauges = self.gauges.lock().unwrap();
        let key = Self::metric_key(name, &labels);

        gauges
            .entry(key)
            .and_modify(|g| {
                g.value += delta;
                g.last_updated = Utc::now();
            })
            .or_insert_with(|| Gauge {
                name: name.to_string(),
                value: delta,
                labels,
                last_updated: Utc::now(),
            });
    }

    /// Record a histogram observation
    pub fn observe_histogram(&self, name: &str, value: f64, labels: Labels) {
        let mut histograms = self.histograms.lock().unwrap();
        let key = Self::metric_key(name, &labels);

        let histogram = histograms.entry(key).or_insert_with(|| Histogram {
            name: name.to_string(),
            buckets: DEFAULT_BUCKETS.to_vec(),
            counts: vec![0; DEFAULT_BUCKETS.len()],
            sum: 0.0,
            count: 0,
            labels,
            last_updated: Utc::now(),
        });

        histogram.sum += value;
        histogram.count += 1;
        for (i, bucket) in histogram.buckets.iter().enumerate() {
            if value <= *bucket {
                histogram.counts[i] += 1;
            }
        }
        histogram.last_updated = Utc::now();
    }

    /// Current value of a counter, 0 if never incremented
    pub fn counter_value(&self, name: &str, labels: &Labels) -> u64 {
        let key = Self::metric_key(name, labels);
        self.counters
            .lock()
            .unwrap()
            .get(&key)
            .map(|c| c.value)
            .unwrap_or(0)
    }

    pub fn get_gauge(&self, name: &str, labels: &Labels) -> Option<Gauge> {
        let key = Self::metric_key(name, labels);
        self.gauges.lock().unwrap().get(&key).cloned()
    }

    pub fn get_histogram(&self, name: &str, labels: &Labels) -> Option<Histogram> {
        let key = Self::metric_key(name, labels);
        self.histograms.lock().unwrap().get(&key).cloned()
    }

    pub fn get_counters(&self) -> Vec<Counter> {
        self.counters.lock().unwrap().values().cloned().collect()
    }

    /// Generate a unique key for a metric with labels
    fn metric_key(name: &str, labels: &Labels) -> String {
        if labels.is_empty() {
            return name.to_string();
        }

        let mut sorted_labels: Vec<_> = labels.iter().collect();
        sorted_labels.sort_by_key(|(k, _)| *k);

        let label_str = sorted_labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");

        format!("{}:{}", name, label_str)
    }
}

impl Histogram {
    /// Calculate average
    pub fn average(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}
