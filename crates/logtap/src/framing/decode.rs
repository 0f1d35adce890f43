use std::io::{self, Read};

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tracing::debug;

use super::tokenize::{tokenize, FramingError};
use crate::parser::{parse, ParseError, Record};

/// Bytes pulled from a reader per `read` call.
const READ_CHUNK: usize = 4096;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Why decoding of a body stopped before its end.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The byte stream lost synchronization; later bytes cannot be framed
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// The byte source failed
    #[error("read error: {0}")]
    Read(#[source] BoxError),
}

/// Everything decoded from one body.
///
/// Records and record errors keep stream order. `terminal` is set when
/// decoding stopped early; records decoded before that point are kept.
#[derive(Debug, Default)]
pub struct Decoded {
    pub records: Vec<Record>,
    pub errors: Vec<ParseError>,
    pub terminal: Option<StreamError>,
}

impl Decoded {
    /// Record errors plus the terminal error, if any.
    pub fn error_count(&self) -> usize {
        self.errors.len() + usize::from(self.terminal.is_some())
    }
}

/// Incremental decoder: feed it body chunks as they arrive.
///
/// Incomplete frames stay buffered until a later chunk completes them, so
/// the decoder never waits on input itself.
#[derive(Debug)]
pub struct StreamDecoder {
    buf: BytesMut,
    decoded: Decoded,
}

impl StreamDecoder {
    /// Decoded records are appended after `records`.
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            buf: BytesMut::new(),
            decoded: Decoded {
                records,
                ..Decoded::default()
            },
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.decoded.terminal.is_some()
    }

    /// Buffer `chunk` and decode every frame it completes.
    ///
    /// Returns `false` once decoding has stopped for good; further chunks
    /// are ignored.
    pub fn feed(&mut self, chunk: &[u8]) -> bool {
        if self.is_terminated() {
            return false;
        }
        self.buf.extend_from_slice(chunk);
        self.drain(false);
        !self.is_terminated()
    }

    /// Stop decoding because the byte source failed.
    pub fn fail(&mut self, err: impl Into<BoxError>) {
        if !self.is_terminated() {
            self.decoded.terminal = Some(StreamError::Read(err.into()));
        }
    }

    /// Signal end of input and return the results.
    pub fn finish(mut self) -> Decoded {
        if !self.is_terminated() {
            self.drain(true);
            if !self.is_terminated() && !self.buf.is_empty() {
                debug!(bytes = self.buf.len(), "Dropping incomplete trailing frame");
            }
        }
        self.decoded
    }

    fn drain(&mut self, at_eof: bool) {
        loop {
            let advance = match tokenize(&self.buf, at_eof) {
                Ok(Some(token)) => {
                    match parse(token.payload) {
                        Ok(record) => self.decoded.records.push(record),
                        Err(e) => self.decoded.errors.push(e),
                    }
                    token.advance
                }
                Ok(None) => return,
                Err(e) => {
                    self.decoded.terminal = Some(StreamError::Framing(e));
                    return;
                }
            };
            self.buf.advance(advance);
        }
    }
}

/// Decode every frame readable from `reader`, appending records to `records`.
///
/// Works like `Vec::extend`: the returned `Decoded::records` starts with the
/// given records. Parse failures are collected and decoding continues; a
/// framing or read error stops it.
pub fn decode<R: Read>(records: Vec<Record>, mut reader: R) -> Decoded {
    let mut decoder = StreamDecoder::new(records);
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                if !decoder.feed(&chunk[..n]) {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                decoder.fail(e);
                break;
            }
        }
    }

    decoder.finish()
}
