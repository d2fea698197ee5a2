//! Protocol probe
//!
//! Sends raw bytes over a fresh TCP connection and collects whatever the
//! server answers. The request is written concurrently with reading, so a
//! server that rejects a large body early (413 before draining it) cannot
//! deadlock the probe.

mod request;
mod response;

pub use request::{ProbeRequest, Segment};
pub use response::ProbeResponse;

use std::cell::Cell;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep_until, timeout, Instant};

use crate::common::config::ProbeConfig;
use crate::common::{Error, Result};

/// Read chunk size
const CHUNK_SIZE: usize = 4096;

/// Timeouts and size cap for a single probe
#[derive(Debug, Clone, Copy)]
pub struct ProbeLimits {
    pub connect_timeout: Duration,
    /// Idle time after which reading stops once the response has started
    pub read_timeout: Duration,
    /// Wait for the first response byte after the last request progress
    pub response_timeout: Duration,
    pub max_response_bytes: usize,
}

impl From<&ProbeConfig> for ProbeLimits {
    fn from(config: &ProbeConfig) -> Self {
        Self {
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            read_timeout: Duration::from_millis(config.read_timeout_ms),
            response_timeout: Duration::from_millis(config.response_timeout_ms),
            max_response_bytes: config.max_response_bytes,
        }
    }
}

impl Default for ProbeLimits {
    fn default() -> Self {
        Self::from(&ProbeConfig::default())
    }
}

/// Why the read loop stopped
#[derive(Debug, PartialEq, Eq)]
enum ReadEnd {
    /// Declared length reached
    Complete,
    /// Peer closed or reset the connection
    Closed,
    /// No data within the applicable timeout
    Idle,
    /// Size cap reached
    Capped,
}

/// Send one raw request and collect the response
///
/// Reading stops when the declared `Content-Length` is satisfied, the
/// peer closes, or the connection goes quiet. Until the first response
/// byte the quiet period is the response timeout, counted from the last
/// write progress, so a server slowly draining a large body is not cut
/// off. After that it is the read timeout. Write errors are ignored once
/// the server started answering.
pub async fn send(request: &ProbeRequest, addr: SocketAddr, limits: &ProbeLimits) -> Result<ProbeResponse> {
    tracing::debug!("Probing {} with {} bytes", addr, request.len());

    let mut stream = match timeout(limits.connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(Error::probe_io(addr, e)),
        Err(_) => return Err(Error::ProbeTimeout(millis(limits.connect_timeout))),
    };

    let activity = Cell::new(Instant::now());
    let (mut reader, mut writer) = stream.split();
    let write = async {
        let mut rest = request.as_bytes();
        while !rest.is_empty() {
            let n = writer.write(rest).await?;
            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::WriteZero));
            }
            rest = &rest[n..];
            activity.set(Instant::now());
        }
        writer.flush().await
    };
    tokio::pin!(write);

    let mut write_result: Option<io::Result<()>> = None;
    let mut received = Vec::new();
    let mut chunk = [0u8; CHUNK_SIZE];

    let end = loop {
        let quiet = if received.is_empty() {
            limits.response_timeout
        } else {
            limits.read_timeout
        };

        tokio::select! {
            result = &mut write, if write_result.is_none() => {
                if let Err(e) = &result {
                    tracing::debug!("Probe write to {} stopped: {}", addr, e);
                }
                write_result = Some(result);
            }
            read = reader.read(&mut chunk) => match read {
                Ok(0) => break ReadEnd::Closed,
                Ok(n) => {
                    activity.set(Instant::now());
                    let room = limits.max_response_bytes.saturating_sub(received.len());
                    if n > room {
                        received.extend_from_slice(&chunk[..room]);
                        break ReadEnd::Capped;
                    }
                    received.extend_from_slice(&chunk[..n]);
                    if response::declared_len(&received).is_some_and(|len| received.len() >= len) {
                        break ReadEnd::Complete;
                    }
                }
                Err(e) if received.is_empty() => return Err(Error::probe_io(addr, e)),
                Err(e) => {
                    tracing::debug!("Probe read from {} ended: {}", addr, e);
                    break ReadEnd::Closed;
                }
            },
            _ = sleep_until(activity.get() + quiet) => {
                // The request may have made progress while we slept
                if activity.get().elapsed() < quiet {
                    continue;
                }
                break ReadEnd::Idle;
            }
        }
    };

    tracing::debug!("Probe to {} read {} bytes ({:?})", addr, received.len(), end);

    if received.is_empty() {
        return Err(match (end, write_result) {
            (ReadEnd::Idle, _) => Error::ProbeTimeout(millis(limits.response_timeout)),
            (_, Some(Err(e))) if !is_disconnect(&e) => Error::probe_io(addr, e),
            _ => Error::EmptyResponse,
        });
    }

    let truncated = end == ReadEnd::Capped;
    let response = ProbeResponse::new(received, truncated);
    if truncated {
        tracing::warn!(
            "Response from {} truncated at {} bytes",
            addr,
            limits.max_response_bytes
        );
    } else if let (Some(expected), Some(declared)) = (response.expected_len(), response.content_length()) {
        if response.raw().len() < expected {
            return Err(Error::ShortRead {
                expected: declared,
                received: response.body().len(),
            });
        }
    }

    Ok(response)
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}
