//! webserv-tester - black-box test harness for an HTTP server
//!
//! This library discovers test suites, drives the external build tool,
//! supervises the server under test, probes it over raw TCP and reports
//! per-test outcomes.

pub mod build;
pub mod cli;
pub mod commands;
pub mod common;
pub mod discovery;
pub mod probe;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod supervisor;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use discovery::{Category, TestSuite};
pub use report::{OutcomeStatus, TestOutcome};
