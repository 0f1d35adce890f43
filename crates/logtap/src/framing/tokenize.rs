use thiserror::Error;

/// Largest payload a length prefix may announce (16-bit lengths).
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Bytes of an offending prefix echoed back in errors.
const PREFIX_PREVIEW: usize = 32;

/// One recognized frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    /// Bytes to consume from the buffer: prefix, space and payload
    pub advance: usize,
    pub payload: &'a [u8],
}

/// A length prefix the stream cannot recover from.
///
/// Once framing is lost there is no way to find the start of the next frame,
/// so these errors end decoding of the whole body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("invalid frame length prefix {0:?}")]
    InvalidLength(String),

    #[error("frame length prefix {0:?} exceeds 65535 bytes")]
    LengthTooLarge(String),
}

/// Recognize the frame at the start of `data`.
///
/// - `Ok(None)`: nothing to consume yet. Either more input is needed, or
///   `at_eof` is set and `data` is empty (clean end of stream).
/// - `Ok(Some(token))`: a full frame; consume `token.advance` bytes.
/// - `Err(_)`: the length prefix is malformed or too large.
///
/// A buffer without any space is never an error, even at end of input: it is
/// left unconsumed for the caller to drop.
pub fn tokenize(data: &[u8], at_eof: bool) -> Result<Option<Token<'_>>, FramingError> {
    if at_eof && data.is_empty() {
        return Ok(None);
    }

    let Some(space) = data.iter().position(|&b| b == b' ') else {
        return Ok(None);
    };

    let len = frame_len(&data[..space])?;
    let start = space + 1;
    let end = start + len;
    if data.len() < end {
        return Ok(None);
    }

    Ok(Some(Token {
        advance: end,
        payload: &data[start..end],
    }))
}

fn frame_len(prefix: &[u8]) -> Result<usize, FramingError> {
    if prefix.is_empty() || !prefix.iter().all(u8::is_ascii_digit) {
        return Err(FramingError::InvalidLength(preview(prefix)));
    }

    // ASCII digits only: the only way left to fail is overflow
    std::str::from_utf8(prefix)
        .ok()
        .and_then(|digits| digits.parse::<usize>().ok())
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| FramingError::LengthTooLarge(preview(prefix)))
}

fn preview(prefix: &[u8]) -> String {
    let shown = &prefix[..prefix.len().min(PREFIX_PREVIEW)];
    String::from_utf8_lossy(shown).into_owned()
}
