use chrono::{DateTime, Utc};
use thiserror::Error;

/// One syslog line as defined by RFC5424, minus STRUCTURED-DATA: Logplex
/// never includes it in the frames it posts to HTTPS drains.
///
/// `C` is request-derived context attached by the drain handler. Freshly
/// parsed records carry `()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record<C = ()> {
    pub priority: String,
    pub version: String,
    /// Always normalized to UTC
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub app_name: String,
    pub proc_id: String,
    pub msg_id: String,
    /// Free-form remainder of the line
    pub text: String,
    pub context: C,
}

impl Record {
    /// Attach request context, consuming the unattached record.
    pub fn with_context<C>(self, context: C) -> Record<C> {
        Record {
            priority: self.priority,
            version: self.version,
            timestamp: self.timestamp,
            hostname: self.hostname,
            app_name: self.app_name,
            proc_id: self.proc_id,
            msg_id: self.msg_id,
            text: self.text,
            context,
        }
    }
}

impl<C> Record<C> {
    /// Seconds between the record timestamp and `now`.
    ///
    /// Negative when the sender's clock runs ahead of ours.
    pub fn lag_secs(&self, now: DateTime<Utc>) -> f64 {
        let delta = now - self.timestamp;
        match delta.num_nanoseconds() {
            Some(nanos) => nanos as f64 / 1e9,
            None => delta.num_milliseconds() as f64 / 1e3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("syslog message pattern mismatch")]
    PatternMismatch,

    #[error("invalid timestamp {text:?}: {source}")]
    Timestamp {
        text: String,
        #[source]
        source: chrono::ParseError,
    },
}
