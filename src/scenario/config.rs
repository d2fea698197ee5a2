//! Scenario file types
//!
//! Defines the data structures for deserializing YAML system scenarios.

use serde::Deserialize;
use std::path::PathBuf;

use crate::probe::Segment;
use crate::supervisor::StopMode;

/// A complete scenario loaded from a YAML file
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct ScenarioFile {
    /// Name of the scenario, defaults to the file name
    pub name: Option<String>,
    /// Optional description of what the scenario verifies
    pub description: Option<String>,
    /// Server under test; every field falls back to the `[server]` config
    #[serde(default)]
    pub server: ServerTarget,
    /// The sequence of steps to execute
    pub steps: Vec<Step>,
}

/// Whether the harness owns the server process
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TargetMode {
    /// Start the server, stop it afterwards
    #[default]
    Launch,
    /// Probe a server that is already running
    Attach,
}

/// Server overrides for one scenario
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct ServerTarget {
    #[serde(default)]
    pub mode: TargetMode,
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    /// Relative to the scenario file
    pub working_dir: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Clean and build the working directory before launching
    #[serde(default)]
    pub build: bool,
    pub shutdown: Option<StopMode>,
}

/// A single step in the execution flow
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Send a raw request and check the response
    Probe {
        name: String,
        request: RequestSource,
        #[serde(default)]
        expect: ProbeExpectation,
    },
    /// Run the load generator against the server
    Load {
        name: String,
        /// Defaults to `[load] duration_secs`
        duration_secs: Option<u64>,
        /// Minimum availability in percent
        #[serde(default = "default_availability")]
        min_availability: f64,
    },
    /// Multipart file upload
    Upload {
        name: String,
        #[serde(default = "default_upload_path")]
        path: String,
        /// File to send, relative to the scenario; the scenario itself if unset
        file: Option<PathBuf>,
        #[serde(default = "default_upload_status")]
        expect_status: Vec<u16>,
    },
    /// A built-in contract
    Contract {
        contract: String,
        /// Overrides the contract's title in the report
        name: Option<String>,
    },
}

pub(crate) fn default_availability() -> f64 {
    100.0
}

pub(crate) fn default_upload_path() -> String {
    "/upload".to_string()
}

pub(crate) fn default_upload_status() -> Vec<u16> {
    vec![200, 201]
}

/// Request bytes, either one string or a list of segments
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum RequestSource {
    Text(String),
    Segments(Vec<Segment>),
}

/// Expectations for a probe response; every given field must hold
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProbeExpectation {
    /// Exact first line
    pub status_line: Option<String>,
    /// Exact last non-empty line
    pub last_line: Option<String>,
    /// Accepted status codes
    pub status: Option<Vec<u16>>,
    /// Substring anywhere in the response
    pub contains: Option<String>,
}
