//! Test pipeline
//!
//! Discovery, build, run and report for every category, one suite at a
//! time. Nothing but an operator interrupt stops the batch.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::build::BuildManager;
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::discovery::{self, Category, SuiteKind, TestSuite};
use crate::report::{Reporter, TestOutcome};
use crate::scenario::{run_scenario, ScenarioContext};
use crate::supervisor::{run_to_completion, Interrupt, ProcessSpec};

/// Owns everything a run needs
pub struct Harness {
    config: Config,
    root: PathBuf,
    builder: BuildManager,
    interrupt: Interrupt,
    verbose: bool,
}

impl Harness {
    pub fn new(
        config: Config,
        root: PathBuf,
        builder: BuildManager,
        interrupt: Interrupt,
        verbose: bool,
    ) -> Self {
        Self {
            config,
            root,
            builder,
            interrupt,
            verbose,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Discover suites for the given categories
    pub fn discover(&self, categories: &[Category]) -> Result<Vec<TestSuite>> {
        discovery::discover(
            &self.root,
            categories,
            &self.config.paths,
            &self.config.build.manifest,
        )
    }

    /// Run every suite of the given categories, in category order
    ///
    /// Returns `Error::Interrupted` as soon as an interrupt is observed;
    /// outcomes recorded so far stay in the reporter.
    pub async fn run_all(&self, categories: &[Category], reporter: &mut Reporter) -> Result<()> {
        let suites = self.discover(categories)?;
        tracing::info!("Discovered {} suites under '{}'", suites.len(), self.root.display());

        reporter.banner();
        for category in categories {
            reporter.section(*category);

            for suite in suites.iter().filter(|s| s.category == *category) {
                if self.interrupt.is_cancelled() {
                    return Err(Error::Interrupted);
                }
                self.run_suite(suite, reporter).await?;
            }
        }
        Ok(())
    }

    async fn run_suite(&self, suite: &TestSuite, reporter: &mut Reporter) -> Result<()> {
        tracing::debug!("Suite '{}' at '{}'", suite.name, suite.root.display());

        match &suite.kind {
            SuiteKind::Buildable { manifest, artifact } => {
                self.run_buildable(suite, manifest, artifact.as_deref(), reporter)
                    .await
            }
            SuiteKind::Scripts { scripts } => {
                let ctx = ScenarioContext {
                    config: &self.config,
                    root: &self.root,
                    builder: &self.builder,
                    interrupt: &self.interrupt,
                    verbose: self.verbose,
                };
                for script in scripts {
                    run_scenario(script, &ctx, reporter).await?;
                }
                Ok(())
            }
        }
    }

    /// Clean, build, run the declared executable, clean again
    async fn run_buildable(
        &self,
        suite: &TestSuite,
        manifest: &Path,
        artifact: Option<&str>,
        reporter: &mut Reporter,
    ) -> Result<()> {
        let build = self.builder.build(&suite.root).await?;

        let outcome = if !build.success {
            TestOutcome::build_fail(&suite.name, build.detail)
        } else {
            match artifact {
                Some(artifact) => self.run_executable(suite, artifact).await?,
                None => TestOutcome::error(
                    &suite.name,
                    format!("no NAME declared in '{}'", manifest.display()),
                ),
            }
        };
        reporter.record(outcome);

        if self.config.build.clean_after {
            self.builder.clean(&suite.root).await?;
        }
        Ok(())
    }

    /// Run a built test executable; exit status 0 means OK
    async fn run_executable(&self, suite: &TestSuite, artifact: &str) -> Result<TestOutcome> {
        let path = suite.root.join(artifact);
        if !path.is_file() {
            return Ok(TestOutcome::error(
                &suite.name,
                format!("build did not produce '{}'", path.display()),
            ));
        }

        let spec = ProcessSpec::new(Path::new(".").join(artifact), &suite.root)
            .inherit_output(self.verbose);
        let limit = Duration::from_secs(self.config.build.run_timeout_secs);

        let outcome = match run_to_completion(&spec, false, Some(limit), &self.interrupt).await {
            Ok(done) if done.success() => TestOutcome::ok(&suite.name),
            Ok(done) => TestOutcome::error(&suite.name, format!("exited with {}", done.status)),
            Err(e) if e.is_interrupt() => return Err(e),
            Err(e) => TestOutcome::error(&suite.name, e.to_string()),
        };
        Ok(outcome)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::build::tests::FakeTool;
    use crate::report::OutcomeStatus;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    /// A unit suite whose prebuilt "executable" is a shell script
    fn unit_suite(root: &Path, dir: &str, name: &str, script: &str) -> PathBuf {
        let suite = root.join("unit_tests").join(dir);
        fs::create_dir_all(&suite).unwrap();
        fs::write(suite.join("Makefile"), format!("NAME = {}\n", name)).unwrap();

        let exe = suite.join(name);
        fs::write(&exe, format!("#!/bin/sh\n{}\n", script)).unwrap();
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();
        suite
    }

    fn harness(root: &Path, tool: FakeTool, interrupt: Interrupt) -> Harness {
        Harness::new(
            Config::default(),
            root.to_path_buf(),
            BuildManager::new(Box::new(tool)),
            interrupt,
            false,
        )
    }

    fn reporter() -> Reporter {
        Reporter::with_writer(33, Box::new(std::io::sink()))
    }

    #[tokio::test]
    async fn test_exit_status_decides_outcome() {
        let dir = tempfile::tempdir().unwrap();
        unit_suite(dir.path(), "A", "passing_test", "exit 0");
        unit_suite(dir.path(), "B", "failing_test", "exit 3");

        let tool = FakeTool::succeeding();
        let harness = harness(dir.path(), tool.clone(), Interrupt::new());
        let mut reporter = reporter();
        harness.run_all(&[Category::Unit], &mut reporter).await.unwrap();

        let statuses: Vec<_> = reporter
            .outcomes()
            .iter()
            .map(|o| (o.name.as_str(), o.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("passing_test", OutcomeStatus::Ok),
                ("failing_test", OutcomeStatus::Error)
            ]
        );
        // clean, build, clean per suite
        assert_eq!(tool.calls().len(), 6);
    }

    #[tokio::test]
    async fn test_build_failure_never_runs_executable() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        unit_suite(
            dir.path(),
            "Broken",
            "broken_test",
            &format!("touch {}", marker.display()),
        );

        let harness = harness(dir.path(), FakeTool::failing(), Interrupt::new());
        let mut reporter = reporter();
        harness.run_all(&[Category::Unit], &mut reporter).await.unwrap();

        assert_eq!(reporter.outcomes()[0].status, OutcomeStatus::BuildFail);
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_missing_name_and_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let nameless = dir.path().join("integration_tests/Nameless");
        fs::create_dir_all(&nameless).unwrap();
        fs::write(nameless.join("Makefile"), "all:\n").unwrap();

        let phantom = dir.path().join("integration_tests/Phantom");
        fs::create_dir_all(&phantom).unwrap();
        fs::write(phantom.join("Makefile"), "NAME = phantom_test\n").unwrap();

        let harness = harness(dir.path(), FakeTool::succeeding(), Interrupt::new());
        let mut reporter = reporter();
        harness.run_all(&[Category::Integration], &mut reporter).await.unwrap();

        let outcomes = reporter.outcomes();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.status == OutcomeStatus::Error));
        assert!(outcomes[0].detail.as_ref().unwrap().contains("no NAME"));
        assert!(outcomes[1].detail.as_ref().unwrap().contains("phantom_test"));
    }

    #[tokio::test]
    async fn test_interrupt_stops_batch() {
        let dir = tempfile::tempdir().unwrap();
        unit_suite(dir.path(), "A", "a_test", "exit 0");

        let token = Interrupt::new();
        token.cancel();
        let harness = harness(dir.path(), FakeTool::succeeding(), token);
        let mut reporter = reporter();

        let err = harness
            .run_all(&[Category::Unit], &mut reporter)
            .await
            .unwrap_err();
        assert!(err.is_interrupt());
        assert!(reporter.outcomes().is_empty());
    }
}
