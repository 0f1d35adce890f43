use std::borrow::Cow;

/// Produce valid UTF-8 text from arbitrary bytes.
///
/// Valid input is borrowed unchanged. Otherwise valid runs are kept verbatim
/// and each invalid sequence becomes a single U+FFFD.
pub fn sanitize(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}
