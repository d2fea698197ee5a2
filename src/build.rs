//! Build manager
//!
//! Drives the external build tool for buildable suites and for the server
//! under test. The tool is behind [`BuildTool`] so the runner can be
//! exercised without a real `make`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::common::config::BuildConfig;
use crate::common::{Error, Result};
use crate::supervisor::{run_to_completion, Interrupt, ProcessSpec};

/// An external build tool
#[async_trait]
pub trait BuildTool: Send + Sync {
    /// Tool name for messages
    fn name(&self) -> &str;

    /// Remove build products; `Ok(false)` when the tool reported failure
    async fn clean(&self, dir: &Path) -> Result<bool>;

    /// Build the directory; `Ok(false)` when the tool reported failure
    async fn build(&self, dir: &Path) -> Result<bool>;
}

/// `make`-style tool: `<tool> <clean_verb>` then `<tool> -j<jobs>`
pub struct Make {
    tool: String,
    clean_verb: String,
    jobs: u32,
    verbose: bool,
    limit: Option<Duration>,
    interrupt: Interrupt,
}

impl Make {
    pub fn new(config: &BuildConfig, verbose: bool, interrupt: Interrupt) -> Self {
        Self {
            tool: config.tool.clone(),
            clean_verb: config.clean_verb.clone(),
            jobs: config.jobs,
            verbose,
            limit: Some(Duration::from_secs(config.run_timeout_secs)),
            interrupt,
        }
    }

    fn locate(&self) -> Result<PathBuf> {
        which::which(&self.tool).map_err(|_| Error::ToolNotFound {
            name: self.tool.clone(),
        })
    }

    async fn invoke(&self, dir: &Path, args: Vec<String>) -> Result<bool> {
        let spec = ProcessSpec::new(self.locate()?, dir)
            .args(args)
            .inherit_output(self.verbose);
        let done = run_to_completion(&spec, false, self.limit, &self.interrupt).await?;
        Ok(done.success())
    }
}

#[async_trait]
impl BuildTool for Make {
    fn name(&self) -> &str {
        &self.tool
    }

    async fn clean(&self, dir: &Path) -> Result<bool> {
        self.invoke(dir, vec![self.clean_verb.clone()]).await
    }

    async fn build(&self, dir: &Path) -> Result<bool> {
        self.invoke(dir, vec![format!("-j{}", self.jobs)]).await
    }
}

/// Outcome of building one directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    pub root: PathBuf,
    pub success: bool,
    /// Why the build failed, when known
    pub detail: Option<String>,
}

/// Clean-then-build sequencing over a [`BuildTool`]
pub struct BuildManager {
    tool: Box<dyn BuildTool>,
}

impl BuildManager {
    pub fn new(tool: Box<dyn BuildTool>) -> Self {
        Self { tool }
    }

    /// Clean, then build `dir`
    ///
    /// Only an operator interrupt is returned as an error; every other
    /// problem, including a missing tool, is a failed build.
    pub async fn build(&self, dir: &Path) -> Result<BuildResult> {
        tracing::info!("Building '{}' with {}", dir.display(), self.tool.name());

        // Clean failures are expected on a fresh tree
        match self.tool.clean(dir).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!("Clean of '{}' failed, continuing", dir.display()),
            Err(e) if e.is_interrupt() => return Err(e),
            Err(e) => tracing::debug!("Clean of '{}' errored, continuing: {}", dir.display(), e),
        }

        let (success, detail) = match self.tool.build(dir).await {
            Ok(true) => (true, None),
            Ok(false) => (false, Some(format!("{} exited with failure", self.tool.name()))),
            Err(e) if e.is_interrupt() => return Err(e),
            Err(e) => (false, Some(e.to_string())),
        };

        if !success {
            tracing::warn!("Build of '{}' failed", dir.display());
        }

        Ok(BuildResult {
            root: dir.to_path_buf(),
            success,
            detail,
        })
    }

    /// Best-effort clean after a suite finished
    pub async fn clean(&self, dir: &Path) -> Result<()> {
        match self.tool.clean(dir).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_interrupt() => Err(e),
            Err(e) => {
                tracing::warn!("Clean of '{}' failed: {}", dir.display(), e);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Scripted build tool recording every call
    #[derive(Clone, Default)]
    pub(crate) struct FakeTool {
        pub builds_succeed: bool,
        pub calls: Arc<Mutex<Vec<String>>>,
    }

    impl FakeTool {
        pub(crate) fn succeeding() -> Self {
            Self {
                builds_succeed: true,
                ..Default::default()
            }
        }

        pub(crate) fn failing() -> Self {
            Self::default()
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BuildTool for FakeTool {
        fn name(&self) -> &str {
            "fake"
        }

        async fn clean(&self, dir: &Path) -> Result<bool> {
            self.calls.lock().unwrap().push(format!("clean {}", dir.display()));
            Err(Error::Internal("nothing to clean".to_string()))
        }

        async fn build(&self, dir: &Path) -> Result<bool> {
            self.calls.lock().unwrap().push(format!("build {}", dir.display()));
            Ok(self.builds_succeed)
        }
    }

    #[tokio::test]
    async fn test_clean_error_is_ignored() {
        let tool = FakeTool::succeeding();
        let manager = BuildManager::new(Box::new(tool.clone()));

        let result = manager.build(Path::new("/suite")).await.unwrap();
        assert!(result.success);
        assert_eq!(tool.calls(), vec!["clean /suite", "build /suite"]);

        manager.clean(Path::new("/suite")).await.unwrap();
        assert_eq!(tool.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_build_has_detail() {
        let manager = BuildManager::new(Box::new(FakeTool::failing()));
        let result = manager.build(Path::new("/suite")).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.detail.as_deref(), Some("fake exited with failure"));
    }

    #[tokio::test]
    async fn test_missing_tool_is_build_failure() {
        let config = BuildConfig {
            tool: "definitely-not-a-build-tool".to_string(),
            ..Default::default()
        };
        let make = Make::new(&config, false, Interrupt::new());
        let manager = BuildManager::new(Box::new(make));

        let result = manager.build(Path::new(".")).await.unwrap();
        assert!(!result.success);
        assert!(result.detail.unwrap().contains("not found"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_make_builds_and_cleans() {
        if which::which("make").is_err() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        // A real target rule: only the clean before each build forces a relink
        std::fs::write(
            dir.path().join("Makefile"),
            "NAME = out\nall: $(NAME)\n$(NAME):\n\techo linked >> links\n\ttouch $(NAME)\nfclean:\n\trm -f $(NAME)\n",
        )
        .unwrap();

        let make = Make::new(&BuildConfig::default(), false, Interrupt::new());
        let manager = BuildManager::new(Box::new(make));

        assert!(manager.build(dir.path()).await.unwrap().success);
        assert!(dir.path().join("out").exists());

        // Building again in succession gives the same result from scratch
        assert!(manager.build(dir.path()).await.unwrap().success);
        assert!(dir.path().join("out").exists());
        let links = std::fs::read_to_string(dir.path().join("links")).unwrap();
        assert_eq!(links.lines().count(), 2);

        manager.clean(dir.path()).await.unwrap();
        assert!(!dir.path().join("out").exists());
    }
}
