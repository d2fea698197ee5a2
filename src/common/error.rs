//! Error types for the test harness
//!
//! Every failure a suite can hit is classified here so the runner can turn
//! it into an ERROR or BUILD FAIL outcome instead of aborting the batch.

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Test root '{0}' does not exist or is not a directory")]
    RootNotFound(String),

    // === External Tool Errors ===
    #[error("Tool '{name}' not found in PATH")]
    ToolNotFound { name: String },

    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    // === Process Errors ===
    #[error("Port {addr} is already in use by another process")]
    PortInUse { addr: SocketAddr },

    #[error("Server exited before accepting connections ({0})")]
    ServerExited(String),

    #[error("Server at {addr} not ready after {secs} seconds")]
    ServerNotReady { addr: SocketAddr, secs: u64 },

    #[error("Process '{command}' did not finish within {secs} seconds")]
    ProcessTimeout { command: String, secs: u64 },

    #[error("Interrupted by operator")]
    Interrupted,

    // === Probe Errors ===
    #[error("Connection to {addr} refused")]
    ConnectRefused { addr: SocketAddr },

    #[error("Probe to {addr} failed: {source}")]
    ProbeIo {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Timed out after {0} ms waiting for the server")]
    ProbeTimeout(u64),

    #[error("Short read: declared {expected} body bytes, received {received}")]
    ShortRead { expected: usize, received: usize },

    #[error("Server closed the connection without responding")]
    EmptyResponse,

    // === Scenario Errors ===
    #[error("Failed to parse scenario '{path}': {message}")]
    ScenarioParse { path: String, message: String },

    #[error("Unknown contract '{0}'")]
    UnknownContract(String),

    #[error("Test assertion failed: {0}")]
    TestAssertion(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a spawn error for a command line
    pub fn spawn(command: &str, source: io::Error) -> Self {
        Self::Spawn {
            command: command.to_string(),
            source,
        }
    }

    /// Create a file read error
    pub fn file_read(path: &Path, error: impl ToString) -> Self {
        Self::FileRead {
            path: path.display().to_string(),
            error: error.to_string(),
        }
    }

    /// Create a scenario parse error
    pub fn scenario_parse(path: &Path, message: impl ToString) -> Self {
        Self::ScenarioParse {
            path: path.display().to_string(),
            message: message.to_string(),
        }
    }

    /// Classify an IO error raised while talking to `addr`
    pub fn probe_io(addr: SocketAddr, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::ConnectionRefused {
            Self::ConnectRefused { addr }
        } else {
            Self::ProbeIo { addr, source }
        }
    }

    /// Whether this error came from an operator interrupt
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_io_classifies_refused() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let err = Error::probe_io(addr, io::Error::from(io::ErrorKind::ConnectionRefused));
        assert!(matches!(err, Error::ConnectRefused { .. }));

        let err = Error::probe_io(addr, io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(matches!(err, Error::ProbeIo { .. }));
    }

    #[test]
    fn test_messages_are_readable() {
        let err = Error::ShortRead {
            expected: 13,
            received: 4,
        };
        assert_eq!(
            err.to_string(),
            "Short read: declared 13 body bytes, received 4"
        );
        assert!(Error::Interrupted.is_interrupt());
    }
}
