//! Process supervision
//!
//! Every external process the harness starts (the server under test, built
//! test executables, the build tool, the load generator) goes through this
//! module. Each one runs in its own process group and is torn down on the
//! operator's interrupt.

mod process;
pub mod readiness;
mod signals;

pub use process::{resolve_dir, ProcessSpec, ProcessState, Readiness, ServerProcess, StopMode};
pub use signals::{install_interrupt_handler, Interrupt, Signal};

use std::future::Future;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

use crate::common::{Error, Result};

/// Output drain limit once the process itself has exited
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// How a supervised server is released
#[derive(Debug, Clone, Copy)]
pub struct Supervision {
    pub stop: StopMode,
    pub graceful_timeout: Duration,
    /// Wait for the server to accept connections before running the body
    pub readiness: Option<Readiness>,
}

/// Run `body` while `server` is alive, then stop the server
///
/// The server is stopped on every path: normal completion stops it with
/// the configured mode, a readiness failure or operator interrupt kills
/// it. An interrupt during a graceful stop cuts the grace period short.
/// A panic inside `body` unwinds through `ServerProcess`'s `Drop`.
pub async fn supervise<F, T>(
    mut server: ServerProcess,
    supervision: &Supervision,
    interrupt: &Interrupt,
    body: F,
) -> Result<T>
where
    F: Future<Output = T>,
{
    let outcome = tokio::select! {
        result = async {
            if let Some(readiness) = &supervision.readiness {
                server.wait_ready(readiness).await?;
            }
            Ok::<T, Error>(body.await)
        } => Some(result),
        _ = interrupt.cancelled() => None,
    };

    match outcome {
        Some(Ok(value)) => {
            let interrupted = tokio::select! {
                stopped = server.stop(supervision.stop, supervision.graceful_timeout) => {
                    stopped?;
                    false
                }
                _ = interrupt.cancelled() => true,
            };
            if interrupted {
                tracing::warn!("Interrupted while stopping '{}', killing it", server.command());
                server.stop(StopMode::Kill, supervision.graceful_timeout).await?;
                return Err(Error::Interrupted);
            }
            check_released(&server).await;
            Ok(value)
        }
        Some(Err(e)) => {
            server.stop(StopMode::Kill, supervision.graceful_timeout).await?;
            Err(e)
        }
        None => {
            tracing::warn!(
                "Interrupted while '{}' (pid {:?}) was live, killing it",
                server.command(),
                server.pid()
            );
            server.stop(StopMode::Kill, supervision.graceful_timeout).await?;
            Err(Error::Interrupted)
        }
    }
}

/// Warn when a stopped server left its listening socket behind
async fn check_released(server: &ServerProcess) {
    if !readiness::port_released(server.addr()).await {
        tracing::warn!(
            "Port {} still accepts connections after '{}' stopped",
            server.addr(),
            server.command()
        );
    }
}

/// Result of a process run to completion
#[derive(Debug)]
pub struct Completion {
    pub status: ExitStatus,
    /// Captured stdout (empty unless capture was requested)
    pub stdout: String,
    /// Captured stderr (empty unless capture was requested)
    pub stderr: String,
}

impl Completion {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Run a process until it exits, is timed out or is interrupted
///
/// On timeout or interrupt the whole process group is killed and reaped
/// before the error is returned. After a normal exit, stragglers left in
/// the group are killed too.
pub async fn run_to_completion(
    spec: &ProcessSpec,
    capture: bool,
    limit: Option<Duration>,
    interrupt: &Interrupt,
) -> Result<Completion> {
    let command = spec.display();
    tracing::debug!("Running '{}' in '{}'", command, spec.working_dir.display());

    let (stdout, stderr) = if capture {
        (Stdio::piped(), Stdio::piped())
    } else {
        spec.output_stdio()
    };

    let mut child = spec
        .command(stdout, stderr)
        .spawn()
        .map_err(|e| Error::spawn(&command, e))?;
    let pid = child.id();
    let _group = interrupt.register(pid);

    let stdout_task = child.stdout.take().map(drain);
    let stderr_task = child.stderr.take().map(drain);

    let waited = tokio::select! {
        status = child.wait() => status.map_err(Error::Io),
        _ = deadline(limit) => Err(Error::ProcessTimeout {
            command: command.clone(),
            secs: limit.map(|d| d.as_secs()).unwrap_or_default(),
        }),
        _ = interrupt.cancelled() => Err(Error::Interrupted),
    };

    let status = match waited {
        Ok(status) => status,
        Err(e) => {
            tracing::warn!("Stopping '{}': {}", command, e);
            #[cfg(unix)]
            let killed = pid.map_or(Ok(()), |pid| signals::signal_group(pid, Signal::Kill));
            #[cfg(not(unix))]
            let killed = child.start_kill();
            if let Err(kill_err) = killed {
                tracing::warn!("Failed to kill '{}': {}", command, kill_err);
            }
            let _ = child.wait().await;
            return Err(e);
        }
    };

    #[cfg(unix)]
    if let Some(pid) = pid {
        let _ = signals::signal_group(pid, Signal::Kill);
    }
    tracing::debug!("'{}' exited: {}", command, status);

    Ok(Completion {
        status,
        stdout: collect(stdout_task).await,
        stderr: collect(stderr_task).await,
    })
}

fn drain<R>(mut stream: R) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf).await;
        buf
    })
}

async fn collect(task: Option<JoinHandle<Vec<u8>>>) -> String {
    let Some(task) = task else {
        return String::new();
    };
    match tokio::time::timeout(DRAIN_TIMEOUT, task).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        _ => String::new(),
    }
}

async fn deadline(limit: Option<Duration>) {
    match limit {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn shell(script: &str) -> ProcessSpec {
        ProcessSpec::new("sh", std::env::temp_dir()).args(["-c", script])
    }

    fn supervision(readiness: Option<Readiness>) -> Supervision {
        Supervision {
            stop: StopMode::Graceful,
            graceful_timeout: Duration::from_secs(2),
            readiness,
        }
    }

    #[tokio::test]
    async fn test_run_to_completion_captures_output() {
        let token = Interrupt::new();
        let done = run_to_completion(
            &shell("echo out; echo err >&2; exit 4"),
            true,
            Some(Duration::from_secs(5)),
            &token,
        )
        .await
        .unwrap();

        assert_eq!(done.status.code(), Some(4));
        assert!(!done.success());
        assert_eq!(done.stdout.trim(), "out");
        assert_eq!(done.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_run_to_completion_timeout_kills() {
        let token = Interrupt::new();
        let started = std::time::Instant::now();
        let err = run_to_completion(
            &shell("sleep 30"),
            false,
            Some(Duration::from_millis(200)),
            &token,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::ProcessTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_run_to_completion_interrupted() {
        let token = Interrupt::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = run_to_completion(&shell("sleep 30"), false, None, &token)
            .await
            .unwrap_err();
        assert!(err.is_interrupt());
    }

    #[tokio::test]
    async fn test_supervise_stops_after_body() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let token = Interrupt::new();
        let server = ServerProcess::start(&shell("sleep 30"), addr, &token).unwrap();
        let pid = server.pid().unwrap() as libc::pid_t;

        let readiness = Readiness {
            timeout: Duration::from_secs(1),
            poll: Duration::from_millis(20),
            settle: Duration::ZERO,
        };

        // A failed assertion inside the body still releases the server
        let value = supervise(server, &supervision(Some(readiness)), &token, async {
            Err::<(), &str>("assertion failed")
        })
        .await
        .unwrap();
        assert!(value.is_err());

        let alive = unsafe { libc::kill(pid, 0) } == 0;
        assert!(!alive);
    }

    #[tokio::test]
    async fn test_supervise_interrupt_kills() {
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let token = Interrupt::new();
        let server = ServerProcess::start(&shell("sleep 30"), addr, &token).unwrap();
        token.cancel();

        let err = supervise(server, &supervision(None), &token, async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        })
        .await
        .unwrap_err();
        assert!(err.is_interrupt());
    }

    #[tokio::test]
    async fn test_interrupt_cuts_graceful_stop_short() {
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let token = Interrupt::new();
        let server =
            ServerProcess::start(&shell("trap '' INT; sleep 30"), addr, &token).unwrap();
        let pid = server.pid().unwrap() as libc::pid_t;

        let slow = Supervision {
            stop: StopMode::Graceful,
            graceful_timeout: Duration::from_secs(20),
            readiness: None,
        };
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = supervise(server, &slow, &token, async {}).await.unwrap_err();
        assert!(err.is_interrupt());
        assert!(started.elapsed() < Duration::from_secs(5));

        let alive = unsafe { libc::kill(pid, 0) } == 0;
        assert!(!alive);
    }

    #[tokio::test]
    async fn test_supervise_readiness_failure_kills() {
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let token = Interrupt::new();
        let server = ServerProcess::start(&shell("sleep 30"), addr, &token).unwrap();
        let readiness = Readiness {
            timeout: Duration::from_millis(200),
            poll: Duration::from_millis(20),
            settle: Duration::ZERO,
        };

        let mut body_ran = false;
        let err = supervise(server, &supervision(Some(readiness)), &token, async {
            body_ran = true;
        })
        .await
        .unwrap_err();

        assert!(matches!(err, Error::ServerNotReady { .. }));
        assert!(!body_ran);
    }
}
