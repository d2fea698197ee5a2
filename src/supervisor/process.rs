//! Supervised server process
//!
//! A [`ServerProcess`] owns the child handle of the server under test for
//! its whole lifetime. It reaches `Terminated` exactly once: through
//! [`ServerProcess::stop`] on the normal path, or through `Drop` when the
//! owner unwound without stopping it.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::Deserialize;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use super::readiness;
use super::signals::{GroupGuard, Interrupt, Signal};
use crate::common::{Error, Result};

/// How to spawn an external process
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Pass stdout/stderr through instead of discarding them
    pub inherit_output: bool,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            inherit_output: false,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn inherit_output(mut self, inherit: bool) -> Self {
        self.inherit_output = inherit;
        self
    }

    /// Program path as it will be executed
    ///
    /// Relative paths containing a separator (`./webserv`) are resolved
    /// against the working directory and made absolute, bare names are
    /// left to PATH lookup.
    pub fn resolved_program(&self) -> PathBuf {
        let has_separator = self.program.components().count() > 1;
        if self.program.is_relative() && has_separator {
            let joined = self.working_dir.join(&self.program);
            std::path::absolute(&joined).unwrap_or(joined)
        } else {
            self.program.clone()
        }
    }

    /// Human-readable command line
    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Build the command: own process group, stdin closed, killed on drop
    pub(crate) fn command(&self, stdout: Stdio, stderr: Stdio) -> Command {
        let mut command = Command::new(self.resolved_program());
        command
            .args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true);

        // The child leads its own group so the terminal's Ctrl+C reaches
        // only the harness, which then tears the group down.
        #[cfg(unix)]
        command.process_group(0);

        command
    }

    pub(crate) fn output_stdio(&self) -> (Stdio, Stdio) {
        if self.inherit_output {
            (Stdio::inherit(), Stdio::inherit())
        } else {
            (Stdio::null(), Stdio::null())
        }
    }
}

/// How a server is asked to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMode {
    /// SIGINT, escalating to SIGKILL after the graceful timeout
    #[default]
    Graceful,
    /// SIGKILL
    Kill,
}

/// Lifecycle of a supervised server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Spawned, not yet accepting connections
    Starting,
    /// Accepting connections
    Running,
    /// Stop requested, waiting for exit
    Stopping,
    /// Exited and reaped
    Terminated,
}

/// Readiness polling parameters
#[derive(Debug, Clone, Copy)]
pub struct Readiness {
    /// Deadline for the first accepted connection
    pub timeout: Duration,
    /// Delay between connection attempts
    pub poll: Duration,
    /// Fixed extra delay once the server accepted a connection
    pub settle: Duration,
}

/// The server under test, exclusively owned by the supervisor
pub struct ServerProcess {
    child: Option<Child>,
    pid: Option<u32>,
    /// Keeps the process group visible to a second Ctrl+C while alive
    group: Option<GroupGuard>,
    state: ProcessState,
    addr: SocketAddr,
    command: String,
}

impl ServerProcess {
    /// Spawn the server; it is `Starting` until [`wait_ready`](Self::wait_ready)
    pub fn start(spec: &ProcessSpec, addr: SocketAddr, interrupt: &Interrupt) -> Result<Self> {
        let command = spec.display();
        info!("Starting server '{}' in '{}'", command, spec.working_dir.display());

        let (stdout, stderr) = spec.output_stdio();
        let child = spec
            .command(stdout, stderr)
            .spawn()
            .map_err(|e| Error::spawn(&command, e))?;
        let pid = child.id();
        debug!("Server spawned with pid {:?}", pid);

        Ok(Self {
            child: Some(child),
            pid,
            group: Some(interrupt.register(pid)),
            state: ProcessState::Starting,
            addr,
            command,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Poll the address until the server accepts a connection
    ///
    /// Fails early if the server exits while we wait.
    pub async fn wait_ready(&mut self, readiness: &Readiness) -> Result<()> {
        let deadline = Instant::now() + readiness.timeout;

        loop {
            if let Some(status) = self.try_exit_status()? {
                return Err(Error::ServerExited(status.to_string()));
            }

            if readiness::can_connect(self.addr, readiness.poll.max(Duration::from_millis(50))).await {
                break;
            }

            if Instant::now() >= deadline {
                return Err(Error::ServerNotReady {
                    addr: self.addr,
                    secs: readiness.timeout.as_secs(),
                });
            }
            sleep(readiness.poll).await;
        }

        if !readiness.settle.is_zero() {
            sleep(readiness.settle).await;
        }

        self.state = ProcessState::Running;
        info!("Server accepting connections on {}", self.addr);
        Ok(())
    }

    /// Non-blocking exit check; reaps the child if it already exited
    fn try_exit_status(&mut self) -> Result<Option<ExitStatus>> {
        let Some(child) = self.child.as_mut() else {
            return Ok(None);
        };

        match child.try_wait()? {
            Some(status) => {
                self.child = None;
                self.state = ProcessState::Terminated;
                warn!("Server '{}' exited early: {}", self.command, status);
                self.kill_stragglers();
                Ok(Some(status))
            }
            None => Ok(None),
        }
    }

    /// Stop the server and reap it
    ///
    /// A no-op returning `None` when the process is already terminated.
    /// Whatever else is left in the server's process group is killed once
    /// the server itself exited.
    pub async fn stop(&mut self, mode: StopMode, graceful_timeout: Duration) -> Result<Option<ExitStatus>> {
        if self.child.is_none() {
            return Ok(None);
        }
        self.state = ProcessState::Stopping;

        let waited = match mode {
            StopMode::Graceful => {
                debug!("Interrupting server (pid {:?})", self.pid);
                if let Err(e) = self.signal(Signal::Interrupt) {
                    warn!("Failed to send SIGINT: {}", e);
                }

                match timeout(graceful_timeout, self.wait()).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            "Server did not exit within {:?} of SIGINT, killing",
                            graceful_timeout
                        );
                        if let Err(e) = self.signal(Signal::Kill) {
                            warn!("Failed to send SIGKILL: {}", e);
                        }
                        self.wait().await
                    }
                }
            }
            StopMode::Kill => {
                debug!("Killing server (pid {:?})", self.pid);
                if let Err(e) = self.signal(Signal::Kill) {
                    warn!("Failed to send SIGKILL: {}", e);
                }
                self.wait().await
            }
        };

        self.kill_stragglers();
        self.child = None;
        self.state = ProcessState::Terminated;

        let status = waited?;
        info!("Server '{}' stopped: {}", self.command, status);
        Ok(Some(status))
    }

    async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        match self.child.as_mut() {
            Some(child) => child.wait().await,
            None => Err(std::io::Error::other("server already reaped")),
        }
    }

    /// Signal the server's whole process group
    #[cfg(unix)]
    fn signal(&mut self, signal: Signal) -> std::io::Result<()> {
        match self.pid {
            Some(pid) => super::signals::signal_group(pid, signal),
            None => Ok(()),
        }
    }

    /// Without process groups the only signal available is a kill
    #[cfg(not(unix))]
    fn signal(&mut self, _signal: Signal) -> std::io::Result<()> {
        match self.child.as_mut() {
            Some(child) => child.start_kill(),
            None => Ok(()),
        }
    }

    /// Kill children the server left behind in its group, then unregister it
    fn kill_stragglers(&mut self) {
        #[cfg(unix)]
        if let Err(e) = self.signal(Signal::Kill) {
            debug!("Group cleanup after exit failed: {}", e);
        }
        self.group = None;
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        // Emergency path: the owner unwound without calling stop()
        if self.child.is_none() {
            return;
        }

        warn!(
            "Server '{}' (pid {:?}) dropped while {:?}, killing",
            self.command, self.pid, self.state
        );
        if let Err(e) = self.signal(Signal::Kill) {
            warn!("Emergency SIGKILL failed: {}", e);
        }

        // Brief blocking reap; anything left is reaped by tokio's orphan queue
        if let Some(mut child) = self.child.take() {
            for _ in 0..20 {
                match child.try_wait() {
                    Ok(None) => std::thread::sleep(Duration::from_millis(25)),
                    _ => break,
                }
            }
        }
        self.group = None;
        self.state = ProcessState::Terminated;
    }
}

/// Resolve a possibly relative directory against a base
pub fn resolve_dir(base: &Path, dir: &Path) -> PathBuf {
    if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        base.join(dir)
    }
}
