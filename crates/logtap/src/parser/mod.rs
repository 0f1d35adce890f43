//! Syslog record parsing for Logplex drain frames.
//!
//! # Architecture
//!
//! - `utf8.rs`: turns arbitrary frame bytes into valid text
//! - `model.rs`: the decoded `Record` and its parse errors
//! - `syslog.rs`: the RFC5424 subset Logplex emits (no STRUCTURED-DATA)
//!
//! Parsing never fails on encoding: invalid UTF-8 is replaced before the
//! grammar runs, so every string in a `Record` is valid text.

pub mod model;
pub mod syslog;
pub mod utf8;

pub use model::{ParseError, Record};
pub use syslog::parse;
pub use utf8::sanitize;
