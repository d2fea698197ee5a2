//! Configuration file handling
//!
//! Every section has defaults matching the conventional layout: a `tests/`
//! root with `unit_tests`, `integration_tests` and `system_tests` folders,
//! the server binary one level up, `make` as the build tool and `siege` as
//! the load generator.

use serde::Deserialize;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::{Error, Result};

/// File name looked up inside the test root
pub const ROOT_CONFIG_NAME: &str = "webserv-tester.toml";

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Category folder names and script extensions
    #[serde(default)]
    pub paths: PathsConfig,

    /// How to launch and reach the server under test
    #[serde(default)]
    pub server: ServerConfig,

    /// External build tool settings
    #[serde(default)]
    pub build: BuildConfig,

    /// Raw socket probe limits
    #[serde(default)]
    pub probe: ProbeConfig,

    /// External load generator settings
    #[serde(default)]
    pub load: LoadConfig,

    /// Report formatting
    #[serde(default)]
    pub report: ReportConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Category folders, relative to the test root
#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_unit_dir")]
    pub unit: PathBuf,

    #[serde(default = "default_integration_dir")]
    pub integration: PathBuf,

    #[serde(default = "default_system_dir")]
    pub system: PathBuf,

    /// Extensions that mark a file as a standalone scenario script
    #[serde(default = "default_script_extensions")]
    pub script_extensions: Vec<String>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            unit: default_unit_dir(),
            integration: default_integration_dir(),
            system: default_system_dir(),
            script_extensions: default_script_extensions(),
        }
    }
}

fn default_unit_dir() -> PathBuf {
    PathBuf::from("unit_tests")
}
fn default_integration_dir() -> PathBuf {
    PathBuf::from("integration_tests")
}
fn default_system_dir() -> PathBuf {
    PathBuf::from("system_tests")
}
fn default_script_extensions() -> Vec<String> {
    vec!["yaml".to_string(), "yml".to_string()]
}

/// Server under test
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Program to launch, resolved against `working_dir`
    #[serde(default = "default_server_command")]
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory, relative to the test root
    #[serde(default = "default_server_dir")]
    pub working_dir: PathBuf,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Deadline for the server to start accepting connections
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,

    /// Delay between readiness connection attempts
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Extra fixed delay after the server accepted its first connection
    #[serde(default)]
    pub settle_ms: u64,

    /// Time allowed after SIGINT before escalating to SIGKILL
    #[serde(default = "default_graceful_timeout")]
    pub graceful_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: default_server_command(),
            args: Vec::new(),
            working_dir: default_server_dir(),
            host: default_host(),
            port: default_port(),
            ready_timeout_secs: default_ready_timeout(),
            poll_interval_ms: default_poll_interval(),
            settle_ms: 0,
            graceful_timeout_secs: default_graceful_timeout(),
        }
    }
}

fn default_server_command() -> String {
    "./webserv".to_string()
}
fn default_server_dir() -> PathBuf {
    PathBuf::from("..")
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_ready_timeout() -> u64 {
    10
}
fn default_poll_interval() -> u64 {
    50
}
fn default_graceful_timeout() -> u64 {
    5
}

impl ServerConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn graceful_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_timeout_secs)
    }
}

/// Build tool settings
#[derive(Debug, Deserialize, Clone)]
pub struct BuildConfig {
    /// Build tool executable, looked up in PATH
    #[serde(default = "default_build_tool")]
    pub tool: String,

    /// Manifest file that marks a buildable suite
    #[serde(default = "default_manifest")]
    pub manifest: String,

    /// Best-effort clean verb
    #[serde(default = "default_clean_verb")]
    pub clean_verb: String,

    /// Parallelism factor passed as `-j<jobs>`
    #[serde(default = "default_jobs")]
    pub jobs: u32,

    /// Re-run the clean verb after a suite finishes
    #[serde(default = "default_true")]
    pub clean_after: bool,

    /// Upper bound for a built test executable's run time
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            tool: default_build_tool(),
            manifest: default_manifest(),
            clean_verb: default_clean_verb(),
            jobs: default_jobs(),
            clean_after: true,
            run_timeout_secs: default_run_timeout(),
        }
    }
}

fn default_build_tool() -> String {
    "make".to_string()
}
fn default_manifest() -> String {
    "Makefile".to_string()
}
fn default_clean_verb() -> String {
    "fclean".to_string()
}
fn default_jobs() -> u32 {
    8
}
fn default_true() -> bool {
    true
}
fn default_run_timeout() -> u64 {
    300
}

/// Probe limits
#[derive(Debug, Deserialize, Clone)]
pub struct ProbeConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Idle time after which a response without a declared length is
    /// considered complete
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Wait for the first response byte, counted from the last byte of the
    /// request the server accepted
    #[serde(default = "default_response_timeout")]
    pub response_timeout_ms: u64,

    /// Responses longer than this are truncated
    #[serde(default = "default_max_response")]
    pub max_response_bytes: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: default_read_timeout(),
            response_timeout_ms: default_response_timeout(),
            max_response_bytes: default_max_response(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    2_000
}
fn default_read_timeout() -> u64 {
    2_000
}
fn default_response_timeout() -> u64 {
    10_000
}
fn default_max_response() -> usize {
    1024 * 1024
}

/// Load generator settings
#[derive(Debug, Deserialize, Clone)]
pub struct LoadConfig {
    #[serde(default = "default_load_tool")]
    pub tool: String,

    /// Arguments; `{duration}`, `{host}` and `{port}` are substituted
    #[serde(default = "default_load_args")]
    pub args: Vec<String>,

    #[serde(default = "default_load_duration")]
    pub duration_secs: u64,

    /// Time allowed past the load window before the tool is killed
    #[serde(default = "default_load_grace")]
    pub grace_secs: u64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            tool: default_load_tool(),
            args: default_load_args(),
            duration_secs: default_load_duration(),
            grace_secs: default_load_grace(),
        }
    }
}

fn default_load_tool() -> String {
    "siege".to_string()
}
fn default_load_args() -> Vec<String> {
    vec![
        "-b".to_string(),
        "-t{duration}s".to_string(),
        "{host}:{port}".to_string(),
    ]
}
fn default_load_duration() -> u64 {
    10
}
fn default_load_grace() -> u64 {
    5
}

/// Report formatting
#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    /// Column width of the test name
    #[serde(default = "default_name_width")]
    pub name_width: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            name_width: default_name_width(),
        }
    }
}

fn default_name_width() -> usize {
    33
}

/// Log output
#[derive(Debug, Deserialize, Default, Clone)]
pub struct LoggingConfig {
    /// Also write logs to the data directory
    #[serde(default)]
    pub file: bool,
}

impl Config {
    /// Load configuration
    ///
    /// Resolution order: the explicit path, `webserv-tester.toml` in the
    /// test root, the user config file. Returns defaults if none exist.
    pub fn load(explicit: Option<&Path>, root: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let in_root = root.join(ROOT_CONFIG_NAME);
        if in_root.is_file() {
            return Self::from_file(&in_root);
        }

        if let Some(path) = config_path() {
            if path.exists() {
                return Self::from_file(&path);
            }
        }
        Ok(Self::default())
    }

    /// Parse a single configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, e))?;
        toml::from_str(&content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Resolve the configured server address
    pub fn server_addr(&self) -> Result<SocketAddr> {
        resolve_addr(&self.server.host, self.server.port)
    }
}

/// Resolve `host:port` to the first socket address
pub fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::Config(format!("Invalid address '{}:{}': {}", host, port, e)))?
        .next()
        .ok_or_else(|| Error::Config(format!("Address '{}:{}' did not resolve", host, port)))
}
