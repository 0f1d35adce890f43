use std::collections::BTreeMap;
use std::sync::Arc;

use logtap::{LogTelemetry, Telemetry};
use parking_lot::RwLock;
use serde::Serialize;

/// Running summary of one value metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValueStats {
    pub samples: u64,
    pub last: f64,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
}

impl ValueStats {
    fn first(value: f64) -> Self {
        Self {
            samples: 1,
            last: value,
            min: value,
            max: value,
            sum: value,
        }
    }

    fn record(&mut self, value: f64) {
        self.samples += 1;
        self.last = value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
    }
}

/// Point-in-time copy served by `/metrics`
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub counts: BTreeMap<String, i64>,
    pub values: BTreeMap<String, ValueStats>,
}

/// Drain telemetry kept in memory
#[derive(Clone, Default)]
pub struct DrainMetrics {
    inner: Arc<DrainMetricsInner>,
}

#[derive(Default)]
struct DrainMetricsInner {
    /// Cumulative total per count name
    counts: RwLock<BTreeMap<String, i64>>,

    /// Summary per value name
    values: RwLock<BTreeMap<String, ValueStats>>,

    /// Echo every metric as a log line as well
    echo: Option<LogTelemetry>,
}

impl DrainMetrics {
    pub fn new(log_metrics: bool) -> Self {
        Self {
            inner: Arc::new(DrainMetricsInner {
                echo: log_metrics.then_some(LogTelemetry),
                ..DrainMetricsInner::default()
            }),
        }
    }

    pub fn count_of(&self, name: &str) -> i64 {
        self.inner.counts.read().get(name).copied().unwrap_or(0)
    }

    pub fn value_of(&self, name: &str) -> Option<ValueStats> {
        self.inner.values.read().get(name).copied()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counts: self.inner.counts.read().clone(),
            values: self.inner.values.read().clone(),
        }
    }
}

impl Telemetry for DrainMetrics {
    fn value(&self, value: f64, name: &str) {
        if !value.is_finite() {
            return;
        }
        {
            let mut values = self.inner.values.write();
            match values.get_mut(name) {
                Some(stats) => stats.record(value),
                None => {
                    values.insert(name.to_string(), ValueStats::first(value));
                }
            }
        }
        if let Some(echo) = &self.inner.echo {
            echo.value(value, name);
        }
    }

    fn count(&self, value: i64, name: &str) {
        *self.inner.counts.write().entry(name.to_string()).or_insert(0) += value;
        if let Some(echo) = &self.inner.echo {
            echo.count(value, name);
        }
    }
}
