//! An ordered list of raw HTTP/1.1 headers.
//!
//! Header bytes travel the wire exactly as given: names keep their case,
//! duplicates keep their positions, nothing is normalized or merged. The
//! semantic helpers in this module (chunked detection, content-length,
//! `Connection` tokens) do their own case-insensitive matching instead.

use std::fmt;

use bytes::Bytes;

/// An ordered list of header name/value pairs.
///
/// Unlike a map, this preserves insertion order, duplicates, and the exact
/// bytes of every name and value.
#[derive(Clone, Default)]
pub struct Headers {
    entries: Vec<(Bytes, Bytes)>,
}

impl Headers {
    /// Creates an empty header list.
    pub fn new() -> Headers {
        Headers {
            entries: Vec::new(),
        }
    }

    /// Appends a header, preserving its bytes verbatim.
    pub fn add<N, V>(&mut self, name: N, value: V)
    where
        N: Into<Bytes>,
        V: Into<Bytes>,
    {
        self.entries.push((name.into(), value.into()));
    }

    /// Builder-style `add`.
    pub fn with<N, V>(mut self, name: N, value: V) -> Headers
    where
        N: Into<Bytes>,
        V: Into<Bytes>,
    {
        self.add(name, value);
        self
    }

    /// Returns the value of the first header matching `name`
    /// (ASCII case-insensitive).
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name.as_bytes()))
            .map(|(_, v)| v.as_ref())
    }

    /// Returns true if any header matches `name` (ASCII case-insensitive).
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterates over all headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.entries.iter().map(|(n, v)| (n.as_ref(), v.as_ref()))
    }

    /// The number of headers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no headers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entries(&self) -> &[(Bytes, Bytes)] {
        &self.entries
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, value) in self.iter() {
            map.entry(
                &String::from_utf8_lossy(name),
                &String::from_utf8_lossy(value),
            );
        }
        map.finish()
    }
}

fn trim(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|i| i + 1)
        .unwrap_or(start);
    &bytes[start..end]
}

pub(crate) fn value_has_token(value: &[u8], token: &str) -> bool {
    value
        .split(|&b| b == b',')
        .any(|part| trim(part).eq_ignore_ascii_case(token.as_bytes()))
}

/// Parses one `Content-Length` value: ASCII digits only.
pub(crate) fn parse_content_length_value(value: &[u8]) -> Result<u64, ()> {
    let value = trim(value);
    if value.is_empty() {
        return Err(());
    }
    let mut n: u64 = 0;
    for &b in value {
        if !b.is_ascii_digit() {
            return Err(());
        }
        n = n
            .checked_mul(10)
            .and_then(|n| n.checked_add((b - b'0') as u64))
            .ok_or(())?;
    }
    Ok(n)
}

fn for_each_value<'a>(
    headers: &'a Headers,
    name: &str,
) -> impl Iterator<Item = &'a [u8]> + 'a {
    let name = name.to_owned();
    headers
        .entries()
        .iter()
        .filter(move |(n, _)| n.eq_ignore_ascii_case(name.as_bytes()))
        .map(|(_, v)| v.as_ref())
}

/// Whether any `Transfer-Encoding` header lists the `chunked` coding.
pub(crate) fn transfer_encoding_is_chunked(headers: &Headers) -> bool {
    for_each_value(headers, "transfer-encoding").any(|v| value_has_token(v, "chunked"))
}

/// Parses `Content-Length`.
///
/// `Ok(None)` when absent; `Err(())` on a non-numeric value or on
/// duplicates that disagree.
pub(crate) fn content_length(headers: &Headers) -> Result<Option<u64>, ()> {
    let mut length = None;
    for value in for_each_value(headers, "content-length") {
        let n = parse_content_length_value(value)?;
        match length {
            Some(prev) if prev != n => return Err(()),
            _ => length = Some(n),
        }
    }
    Ok(length)
}

/// Whether any `Connection` header lists the `close` option.
pub(crate) fn connection_has_close(headers: &Headers) -> bool {
    for_each_value(headers, "connection").any(|v| value_has_token(v, "close"))
}

/// Whether the request asks the server to switch protocols: an `Upgrade`
/// header, or a `Connection` header listing the `upgrade` option.
pub(crate) fn requests_upgrade(headers: &Headers) -> bool {
    headers.contains("upgrade")
        || for_each_value(headers, "connection").any(|v| value_has_token(v, "upgrade"))
}
