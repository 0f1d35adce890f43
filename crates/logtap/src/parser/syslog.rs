use chrono::{DateTime, Utc};

use super::model::{ParseError, Record};
use super::utf8::sanitize;

/// Header fields of a Logplex syslog line, borrowed from the sanitized text.
///
/// Example:
/// `<13>1 2014-01-09T04:06:38.793094+00:00 host app web.8 - Release v1822 created by foo@example.com`
struct Fields<'a> {
    priority: &'a str,
    version: &'a str,
    timestamp: &'a str,
    hostname: &'a str,
    app_name: &'a str,
    proc_id: &'a str,
    msg_id: &'a str,
    text: &'a str,
}

/// Parse one frame payload into a `Record`.
///
/// The frame is sanitized first, so encoding problems never fail the parse.
/// A line without the `<PRI>VERSION TIMESTAMP HOST APP PROCID MSGID TEXT`
/// shape fails with `PatternMismatch`; a well-shaped line whose timestamp is
/// not RFC3339 fails with `Timestamp`.
pub fn parse(frame: &[u8]) -> Result<Record, ParseError> {
    let text = sanitize(frame);
    let line = match text.find('\n') {
        Some(end) => &text[..end],
        None => &text[..],
    };

    let fields = split_fields(line).ok_or(ParseError::PatternMismatch)?;

    let timestamp = DateTime::parse_from_rfc3339(fields.timestamp).map_err(|source| {
        ParseError::Timestamp {
            text: fields.timestamp.to_string(),
            source,
        }
    })?;

    Ok(Record {
        priority: fields.priority.to_string(),
        version: fields.version.to_string(),
        timestamp: timestamp.with_timezone(&Utc),
        hostname: fields.hostname.to_string(),
        app_name: fields.app_name.to_string(),
        proc_id: fields.proc_id.to_string(),
        msg_id: fields.msg_id.to_string(),
        text: fields.text.to_string(),
        context: (),
    })
}

fn split_fields(line: &str) -> Option<Fields<'_>> {
    let rest = line.strip_prefix('<')?;
    let (priority, rest) = take_field(rest, '>')?;
    let (version, rest) = take_field(rest, ' ')?;
    let (timestamp, rest) = take_field(rest, ' ')?;
    let (hostname, rest) = take_field(rest, ' ')?;
    let (app_name, rest) = take_field(rest, ' ')?;
    let (proc_id, rest) = take_field(rest, ' ')?;
    let (msg_id, text) = take_field(rest, ' ')?;

    Some(Fields {
        priority,
        version,
        timestamp,
        hostname,
        app_name,
        proc_id,
        msg_id,
        text,
    })
}

/// Split off the shortest non-empty prefix of `s` that is followed by
/// `delim`, consuming the delimiter.
///
/// The first character always belongs to the field, even when it is the
/// delimiter itself.
fn take_field(s: &str, delim: char) -> Option<(&str, &str)> {
    let first = s.chars().next()?;
    let start = first.len_utf8();
    let end = start + s[start..].find(delim)?;
    Some((&s[..end], &s[end + delim.len_utf8()..]))
}
