//! Scenario assertions
//!
//! A system suite is a YAML scenario: an optional server override and a
//! list of steps. Steps are resolved into [`Assertion`]s up front so a
//! typo in a contract name fails before the server is started.

pub mod config;
pub mod contracts;
mod executor;
mod load;
mod upload;

pub use config::{ProbeExpectation, RequestSource, ScenarioFile, ServerTarget, Step, TargetMode};
pub use executor::{run_scenario, ScenarioContext};
pub use load::parse_availability;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::{Error, Result};
use crate::probe::{ProbeRequest, ProbeResponse};

/// What one step checks
#[derive(Debug, Clone)]
pub enum Check {
    Probe {
        request: ProbeRequest,
        expect: ProbeExpectation,
    },
    Load {
        /// `None` uses the configured load window
        duration: Option<Duration>,
        min_availability: f64,
    },
    Upload {
        path: String,
        /// `None` uploads the scenario file itself
        file: Option<PathBuf>,
        accept: Vec<u16>,
    },
}

/// A named check, reported as one outcome
#[derive(Debug, Clone)]
pub struct Assertion {
    pub name: String,
    pub check: Check,
}

/// Parse a scenario file
pub fn load_scenario(path: &Path) -> Result<ScenarioFile> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, e))?;
    serde_yaml::from_str(&content).map_err(|e| Error::scenario_parse(path, e))
}

/// Resolve every step, failing on the first unknown contract
pub fn resolve_steps(steps: &[Step]) -> Result<Vec<Assertion>> {
    steps.iter().map(resolve_step).collect()
}

fn resolve_step(step: &Step) -> Result<Assertion> {
    let assertion = match step {
        Step::Probe { name, request, expect } => Assertion {
            name: name.clone(),
            check: Check::Probe {
                request: match request {
                    RequestSource::Text(text) => ProbeRequest::text(text),
                    RequestSource::Segments(segments) => ProbeRequest::from_segments(segments),
                },
                expect: expect.clone(),
            },
        },
        Step::Load {
            name,
            duration_secs,
            min_availability,
        } => Assertion {
            name: name.clone(),
            check: Check::Load {
                duration: duration_secs.map(Duration::from_secs),
                min_availability: *min_availability,
            },
        },
        Step::Upload {
            name,
            path,
            file,
            expect_status,
        } => Assertion {
            name: name.clone(),
            check: Check::Upload {
                path: path.clone(),
                file: file.clone(),
                accept: expect_status.clone(),
            },
        },
        Step::Contract { contract, name } => {
            let mut assertion = contracts::find(contract)
                .ok_or_else(|| Error::UnknownContract(contract.clone()))?
                .assertion();
            if let Some(name) = name {
                assertion.name = name.clone();
            }
            assertion
        }
    };
    Ok(assertion)
}

impl ProbeExpectation {
    /// Check every given field against the response
    pub fn verify(&self, response: &ProbeResponse) -> Result<()> {
        if let Some(expected) = &self.status_line {
            let actual = response.status_line();
            if &actual != expected {
                return Err(mismatch("status line", expected, &actual));
            }
        }

        if let Some(expected) = &self.last_line {
            let actual = response.last_line();
            if &actual != expected {
                return Err(mismatch("last line", expected, &actual));
            }
        }

        if let Some(accepted) = &self.status {
            match response.status_code() {
                Some(code) if accepted.contains(&code) => {}
                other => {
                    return Err(Error::TestAssertion(format!(
                        "expected status in {:?}, got {:?}",
                        accepted, other
                    )))
                }
            }
        }

        if let Some(needle) = &self.contains {
            if !response.text().contains(needle.as_str()) {
                return Err(Error::TestAssertion(format!(
                    "response does not contain '{}'",
                    needle
                )));
            }
        }

        Ok(())
    }
}

fn mismatch(what: &str, expected: &str, actual: &str) -> Error {
    Error::TestAssertion(format!("expected {} '{}', got '{}'", what, expected, actual))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(text: &str) -> ProbeResponse {
        ProbeResponse::new(text.as_bytes().to_vec(), false)
    }

    #[test]
    fn test_status_line_is_exact() {
        let expect = ProbeExpectation {
            status_line: Some("HTTP/1.1 405 Method Not Allowed".to_string()),
            ..Default::default()
        };
        assert!(expect
            .verify(&response("HTTP/1.1 405 Method Not Allowed\r\n\r\n"))
            .is_ok());

        let err = expect
            .verify(&response("HTTP/1.1 405 Method not allowed\r\n\r\n"))
            .unwrap_err();
        assert!(err.to_string().contains("Method not allowed"));
    }

    #[test]
    fn test_combined_expectation() {
        let expect = ProbeExpectation {
            last_line: Some("Hello, world!".to_string()),
            status: Some(vec![200]),
            contains: Some("text/plain".to_string()),
            ..Default::default()
        };
        let ok = response("HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nHello, world!\n");
        assert!(expect.verify(&ok).is_ok());

        let wrong_status = response("HTTP/1.1 500 Oops\r\nContent-Type: text/plain\r\n\r\nHello, world!\n");
        assert!(matches!(expect.verify(&wrong_status), Err(Error::TestAssertion(_))));

        assert!(ProbeExpectation::default().verify(&response("anything")).is_ok());
    }

    #[test]
    fn test_resolve_steps() {
        let steps: Vec<Step> = serde_yaml::from_str(
            "- action: contract\n  contract: uri_too_long\n\
             - action: contract\n  contract: upload\n  name: my upload\n\
             - action: probe\n  name: raw\n  request: \"GET /\"\n",
        )
        .unwrap();

        let assertions = resolve_steps(&steps).unwrap();
        let names: Vec<&str> = assertions.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["URI too long(414) test", "my upload", "raw"]);
    }

    #[test]
    fn test_unknown_contract_fails_resolution() {
        let steps: Vec<Step> =
            serde_yaml::from_str("- action: contract\n  contract: teleport\n").unwrap();
        assert!(matches!(
            resolve_steps(&steps),
            Err(Error::UnknownContract(name)) if name == "teleport"
        ));
    }

    #[test]
    fn test_load_scenario_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "steps: [").unwrap();

        let err = load_scenario(&path).unwrap_err();
        assert!(matches!(err, Error::ScenarioParse { .. }));
        assert!(err.to_string().contains("broken.yaml"));
    }
}
