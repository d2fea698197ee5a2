//! Result reporter
//!
//! Prints one line per outcome as it arrives, in the layout
//! `\t<name padded><STATUS>`, and keeps every outcome for the summary, the
//! JSON report and the exit code.

use std::io::Write;
use std::path::Path;

use colored::Colorize;
use serde::Serialize;

use crate::common::{Error, Result};
use crate::discovery::Category;

/// Status of one reported test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Ok,
    Error,
    BuildFail,
}

impl OutcomeStatus {
    pub fn label(&self) -> &'static str {
        match self {
            OutcomeStatus::Ok => "OK!",
            OutcomeStatus::Error => "ERROR",
            OutcomeStatus::BuildFail => "BUILD FAIL",
        }
    }
}

/// One reported test
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestOutcome {
    pub name: String,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl TestOutcome {
    pub fn ok(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: OutcomeStatus::Ok,
            category: None,
            detail: None,
        }
    }

    pub fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: OutcomeStatus::Error,
            category: None,
            detail: Some(detail.into()),
        }
    }

    pub fn build_fail(name: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            name: name.into(),
            status: OutcomeStatus::BuildFail,
            category: None,
            detail,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == OutcomeStatus::Ok
    }
}

/// Outcome counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub ok: usize,
    pub error: usize,
    pub build_fail: usize,
}

impl Summary {
    pub fn total(&self) -> usize {
        self.ok + self.error + self.build_fail
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    summary: Summary,
    outcomes: &'a [TestOutcome],
}

/// Ordered outcome sink with terminal output
pub struct Reporter {
    outcomes: Vec<TestOutcome>,
    name_width: usize,
    current: Option<Category>,
    sections: usize,
    out: Box<dyn Write + Send>,
}

impl Reporter {
    /// Reporter printing to stdout
    pub fn new(name_width: usize) -> Self {
        Self::with_writer(name_width, Box::new(std::io::stdout()))
    }

    pub fn with_writer(name_width: usize, out: Box<dyn Write + Send>) -> Self {
        Self {
            outcomes: Vec::new(),
            name_width,
            current: None,
            sections: 0,
            out,
        }
    }

    pub fn banner(&mut self) {
        let line = format!("{}\n", "Running Webserv Test Suite...".yellow());
        self.emit(&line);
    }

    /// Start a category section
    pub fn section(&mut self, category: Category) {
        let gap = if self.sections > 0 { "\n" } else { "" };
        let line = format!("{}\t{}", gap, category.title().yellow());
        self.emit(&line);
        self.sections += 1;
        self.current = Some(category);
    }

    /// Print and keep one outcome
    pub fn record(&mut self, mut outcome: TestOutcome) {
        if outcome.category.is_none() {
            outcome.category = self.current;
        }

        let status = match outcome.status {
            OutcomeStatus::Ok => outcome.status.label().green(),
            OutcomeStatus::Error | OutcomeStatus::BuildFail => outcome.status.label().red(),
        };
        let line = format!("\t{:<width$}{}", outcome.name, status, width = self.name_width);
        self.emit(&line);

        if !outcome.passed() {
            if let Some(detail) = &outcome.detail {
                let line = format!("\t  {}", detail.dimmed());
                self.emit(&line);
            }
        }

        tracing::debug!("Outcome {} {:?}", outcome.name, outcome.status);
        self.outcomes.push(outcome);
    }

    /// One-line count of outcomes by status
    pub fn print_summary(&mut self) {
        let summary = self.summary();
        let line = format!(
            "\n\t{} OK, {} ERROR, {} BUILD FAIL",
            summary.ok, summary.error, summary.build_fail
        );
        self.emit(&line);
    }

    /// Terminal marker, printed even after an interrupt
    pub fn finish(&mut self) {
        let line = format!("\n{}", "...done".yellow());
        self.emit(&line);
        if let Err(e) = self.out.flush() {
            tracing::warn!("Failed to flush report: {}", e);
        }
    }

    pub fn outcomes(&self) -> &[TestOutcome] {
        &self.outcomes
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for outcome in &self.outcomes {
            match outcome.status {
                OutcomeStatus::Ok => summary.ok += 1,
                OutcomeStatus::Error => summary.error += 1,
                OutcomeStatus::BuildFail => summary.build_fail += 1,
            }
        }
        summary
    }

    /// Whether every recorded outcome is OK
    pub fn all_passed(&self) -> bool {
        self.outcomes.iter().all(TestOutcome::passed)
    }

    /// Write the machine-readable report
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let report = JsonReport {
            summary: self.summary(),
            outcomes: &self.outcomes,
        };
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json).map_err(|e| {
            Error::Config(format!("Failed to write report '{}': {}", path.display(), e))
        })?;
        tracing::info!("Report written to '{}'", path.display());
        Ok(())
    }

    fn emit(&mut self, line: &str) {
        if let Err(e) = writeln!(self.out, "{}", line) {
            tracing::warn!("Failed to write report line: {}", e);
        }
    }
}
