//! Octet-counting framing for Logplex drain bodies.
//!
//! A body is a run of `<decimal-length> <payload>` frames with no delimiter
//! between them (syslog over TCP, octet counting method). The tokenizer
//! recognizes one frame at a time from a buffer; the decoder drives it over a
//! byte source and hands every payload to the syslog parser.
//!
//! See: http://tools.ietf.org/html/draft-gerhards-syslog-plain-tcp-12#section-3.4.1

pub mod decode;
pub mod tokenize;

pub use decode::{decode, BoxError, Decoded, StreamDecoder, StreamError};
pub use tokenize::{tokenize, FramingError, Token, MAX_FRAME_LEN};
