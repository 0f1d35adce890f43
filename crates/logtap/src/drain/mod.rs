//! Drain: the HTTP endpoint Logplex posts frames to.

pub mod context;
pub mod handler;
pub mod sink;

pub use context::{AppName, ContextError, ContextFn, ContextResolver, DrainToken, NoContext};
pub use handler::{routes, Drain, DrainConfig, DrainSummary, MAX_MSG_COUNT_HINT, MSG_COUNT_HEADER};
pub use sink::RecordSink;
