//! Raw probe responses and the views assertions look at

use std::borrow::Cow;

/// Bytes received for one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    raw: Vec<u8>,
    /// The response exceeded the size cap and was cut off
    truncated: bool,
}

impl ProbeResponse {
    pub fn new(raw: Vec<u8>, truncated: bool) -> Self {
        Self { raw, truncated }
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Whole response decoded lossily
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.raw)
    }

    /// First line, without its terminator
    pub fn status_line(&self) -> String {
        self.text().lines().next().unwrap_or_default().to_string()
    }

    /// Last non-empty line, without its terminator
    pub fn last_line(&self) -> String {
        self.text()
            .lines()
            .rev()
            .find(|line| !line.is_empty())
            .unwrap_or_default()
            .to_string()
    }

    /// Numeric status from `HTTP/x.y <code> <reason>`
    pub fn status_code(&self) -> Option<u16> {
        self.status_line().split_whitespace().nth(1)?.parse().ok()
    }

    /// First header value with a case-insensitive name match
    pub fn header(&self, name: &str) -> Option<String> {
        let head_len = self.head_len().unwrap_or(self.raw.len());
        find_header(&self.raw[..head_len], name)
    }

    /// Bytes after the blank line ending the headers
    pub fn body(&self) -> &[u8] {
        match self.head_len() {
            Some(end) => &self.raw[end..],
            None => &[],
        }
    }

    /// Declared `Content-Length`, if present and numeric
    pub fn content_length(&self) -> Option<usize> {
        self.header("content-length")?.parse().ok()
    }

    /// Total length the response should reach, when it declares one
    pub fn expected_len(&self) -> Option<usize> {
        Some(self.head_len()? + self.content_length()?)
    }

    /// Length of the head including the terminating blank line
    pub(crate) fn head_len(&self) -> Option<usize> {
        head_len(&self.raw)
    }
}

fn find_header(head: &[u8], name: &str) -> Option<String> {
    String::from_utf8_lossy(head).lines().skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim().to_string())
    })
}

/// Total length declared by a complete head, `None` until the head ends
/// or when it carries no usable `Content-Length`
pub(crate) fn declared_len(raw: &[u8]) -> Option<usize> {
    let head = head_len(raw)?;
    let body: usize = find_header(&raw[..head], "content-length")?.parse().ok()?;
    Some(head + body)
}

/// Position right after `\r\n\r\n` (or a bare `\n\n`)
pub(crate) fn head_len(raw: &[u8]) -> Option<usize> {
    let crlf = raw.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4);
    let lf = raw.windows(2).position(|w| w == b"\n\n").map(|i| i + 2);
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
