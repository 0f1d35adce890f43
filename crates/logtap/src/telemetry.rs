//! Metric receiver the drain handler reports to.

use std::sync::Arc;

use serde_json::{Number, Value};
use tracing::info;

/// Count: requests accepted past context resolution.
pub const REQUEST: &str = "request";
/// Count: requests refused because no context could be resolved.
pub const CONTEXT_ERROR: &str = "context error";
/// Value: seconds between a record's timestamp and its arrival.
pub const TIME_LAG: &str = "time lag";
/// Value: `Logplex-Msg-Count` minus the number of decoded records.
pub const MESSAGE_COUNT_DELTA: &str = "message count delta";

/// Receiver of named metrics.
///
/// One instance is shared by every request the drain handles, so
/// implementations must tolerate concurrent calls.
pub trait Telemetry: Send + Sync {
    fn value(&self, value: f64, name: &str);
    fn count(&self, value: i64, name: &str);
}

impl<T: Telemetry + ?Sized> Telemetry for Arc<T> {
    fn value(&self, value: f64, name: &str) {
        (**self).value(value, name)
    }

    fn count(&self, value: i64, name: &str) {
        (**self).count(value, name)
    }
}

/// Drops every metric.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardTelemetry;

impl Telemetry for DiscardTelemetry {
    fn value(&self, _value: f64, _name: &str) {}
    fn count(&self, _value: i64, _name: &str) {}
}

/// Writes every metric as a log line:
///
/// ```text
/// METRIC {"stat": "request", "count": 1}
/// METRIC {"stat": "time lag", "value": 0.42}
/// ```
///
/// Values with no JSON representation (NaN, infinities) are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTelemetry;

impl LogTelemetry {
    pub fn render_value(value: f64, name: &str) -> Option<String> {
        json_number(value).map(|n| render("value", n, name))
    }

    pub fn render_count(value: i64, name: &str) -> String {
        render("count", Number::from(value), name)
    }
}

impl Telemetry for LogTelemetry {
    fn value(&self, value: f64, name: &str) {
        if let Some(line) = Self::render_value(value, name) {
            info!(target: "logtap::metric", "{}", line);
        }
    }

    fn count(&self, value: i64, name: &str) {
        info!(target: "logtap::metric", "{}", Self::render_count(value, name));
    }
}

fn render(key: &str, value: Number, name: &str) -> String {
    format!(
        r#"METRIC {{"stat": {}, "{}": {}}}"#,
        Value::from(name),
        key,
        value
    )
}

/// Whole values print without a fractional part, so integer deltas read
/// as integers.
fn json_number(value: f64) -> Option<Number> {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        Some(Number::from(value as i64))
    } else {
        Number::from_f64(value)
    }
}
