// Receiving half of a Heroku Logplex HTTPS drain.

// Decoding
pub mod parser;
pub mod framing;

// Request handling
pub mod drain;
pub mod telemetry;

pub use parser::{parse, sanitize, ParseError, Record};
pub use framing::{decode, tokenize, Decoded, FramingError, StreamDecoder, StreamError, Token};
pub use drain::{routes, ContextError, ContextResolver, Drain, DrainConfig, RecordSink};
pub use telemetry::{DiscardTelemetry, LogTelemetry, Telemetry};
