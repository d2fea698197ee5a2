//! Raw probe requests
//!
//! Requests are opaque bytes. Nothing here checks that they are valid
//! HTTP; malformed requests are the point of most probes.

use serde::Deserialize;

/// One piece of a request built from parts
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Segment {
    /// Literal text, sent as UTF-8
    Text(String),
    /// `count` copies of a character, UTF-8 encoded; the byte length is
    /// `count` times the character's encoded width
    Repeat { repeat: char, count: usize },
}

/// Raw bytes written to the server as-is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    bytes: Vec<u8>,
}

impl ProbeRequest {
    pub fn raw(bytes: impl Into<Vec<u8>>) -> Self {
        Self { bytes: bytes.into() }
    }

    pub fn text(text: &str) -> Self {
        Self::raw(text.as_bytes())
    }

    /// Concatenate segments into one request
    pub fn from_segments(segments: &[Segment]) -> Self {
        let mut bytes = Vec::new();
        for segment in segments {
            match segment {
                Segment::Text(text) => bytes.extend_from_slice(text.as_bytes()),
                Segment::Repeat { repeat, count } => {
                    let mut buf = [0u8; 4];
                    let encoded = repeat.encode_utf8(&mut buf).as_bytes();
                    for _ in 0..*count {
                        bytes.extend_from_slice(encoded);
                    }
                }
            }
        }
        Self { bytes }
    }

    /// Request with `\r`, `\n`, `\t`, `\\` and `\0` escapes interpreted
    ///
    /// Unknown escapes are kept verbatim, backslash included.
    pub fn unescape(input: &str) -> Self {
        let mut bytes = Vec::with_capacity(input.len());
        let mut chars = input.chars();

        while let Some(c) = chars.next() {
            if c != '\\' {
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                continue;
            }
            match chars.next() {
                Some('r') => bytes.push(b'\r'),
                Some('n') => bytes.push(b'\n'),
                Some('t') => bytes.push(b'\t'),
                Some('0') => bytes.push(0),
                Some('\\') => bytes.push(b'\\'),
                Some(other) => {
                    bytes.push(b'\\');
                    let mut buf = [0u8; 4];
                    bytes.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
                }
                None => bytes.push(b'\\'),
            }
        }
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
