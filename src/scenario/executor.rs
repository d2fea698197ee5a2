//! Scenario execution
//!
//! Runs one scenario file: optional build, server launch under
//! supervision, then the steps in order. The first failing step ends the
//! scenario; the server is stopped on every path.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::config::{ServerTarget, TargetMode};
use super::{load, load_scenario, resolve_steps, upload, Assertion, Check};
use crate::build::BuildManager;
use crate::common::config::{resolve_addr, Config};
use crate::common::{Error, Result};
use crate::probe::{self, ProbeLimits};
use crate::report::{Reporter, TestOutcome};
use crate::supervisor::{
    readiness, resolve_dir, supervise, Interrupt, ProcessSpec, Readiness, ServerProcess, StopMode,
    Supervision,
};

/// Request timeout for the upload step
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a scenario needs from the harness
pub struct ScenarioContext<'a> {
    pub config: &'a Config,
    /// Test root; the default server directory is relative to it
    pub root: &'a Path,
    pub builder: &'a BuildManager,
    pub interrupt: &'a Interrupt,
    pub verbose: bool,
}

/// Server settings after applying scenario overrides
#[derive(Debug)]
struct ResolvedTarget {
    mode: TargetMode,
    spec: ProcessSpec,
    addr: SocketAddr,
    build: bool,
    stop: StopMode,
}

impl ResolvedTarget {
    fn new(server: &ServerTarget, scenario_path: &Path, ctx: &ScenarioContext<'_>) -> Result<Self> {
        let defaults = &ctx.config.server;

        let working_dir = match &server.working_dir {
            Some(dir) => resolve_dir(scenario_dir(scenario_path), dir),
            None => resolve_dir(ctx.root, &defaults.working_dir),
        };
        let command = server.command.as_ref().unwrap_or(&defaults.command);
        let args = server.args.as_ref().unwrap_or(&defaults.args);
        let host = server.host.as_ref().unwrap_or(&defaults.host);
        let port = server.port.unwrap_or(defaults.port);

        Ok(Self {
            mode: server.mode,
            spec: ProcessSpec::new(command, working_dir)
                .args(args.iter().cloned())
                .inherit_output(ctx.verbose),
            addr: resolve_addr(host, port)?,
            build: server.build,
            stop: server.shutdown.unwrap_or_default(),
        })
    }
}

/// Run one scenario file, recording one outcome per executed step
///
/// Only an operator interrupt is returned as an error. Anything else that
/// keeps the scenario from running is recorded as an ERROR under the
/// scenario's name.
pub async fn run_scenario(path: &Path, ctx: &ScenarioContext<'_>, reporter: &mut Reporter) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let prepared = load_scenario(path).and_then(|scenario| {
        let assertions = resolve_steps(&scenario.steps)?;
        let target = ResolvedTarget::new(&scenario.server, path, ctx)?;
        Ok((scenario, assertions, target))
    });
    let (scenario, assertions, target) = match prepared {
        Ok(prepared) => prepared,
        Err(e) => {
            reporter.record(TestOutcome::error(file_name, e.to_string()));
            return Ok(());
        }
    };

    let name = scenario.name.unwrap_or(file_name);
    tracing::info!("Running scenario '{}' ({} steps)", name, assertions.len());

    let build_dir = target.spec.working_dir.clone();
    if target.build {
        let result = ctx.builder.build(&build_dir).await?;
        if !result.success {
            reporter.record(TestOutcome::build_fail(name, result.detail));
            return ctx.builder.clean(&build_dir).await;
        }
    }

    let env = StepEnv {
        addr: target.addr,
        scenario_path: path,
        ctx,
    };

    let outcome = match target.mode {
        TargetMode::Attach => run_assertions(&assertions, &env, reporter).await,
        TargetMode::Launch => launch_and_run(&target, &assertions, &env, reporter).await,
    };

    if target.build && ctx.config.build.clean_after {
        ctx.builder.clean(&build_dir).await?;
    }

    match outcome {
        Ok(()) => Ok(()),
        Err(e) if e.is_interrupt() => Err(e),
        Err(e) => {
            reporter.record(TestOutcome::error(name, e.to_string()));
            Ok(())
        }
    }
}

async fn launch_and_run(
    target: &ResolvedTarget,
    assertions: &[Assertion],
    env: &StepEnv<'_>,
    reporter: &mut Reporter,
) -> Result<()> {
    let server_config = &env.ctx.config.server;

    readiness::ensure_port_free(target.addr).await?;
    let server = ServerProcess::start(&target.spec, target.addr, env.ctx.interrupt)?;

    let supervision = Supervision {
        stop: target.stop,
        graceful_timeout: server_config.graceful_timeout(),
        readiness: Some(Readiness {
            timeout: server_config.ready_timeout(),
            poll: server_config.poll_interval(),
            settle: server_config.settle(),
        }),
    };

    supervise(
        server,
        &supervision,
        env.ctx.interrupt,
        run_assertions(assertions, env, reporter),
    )
    .await?
}

/// What the steps need to reach the server
struct StepEnv<'a> {
    addr: SocketAddr,
    scenario_path: &'a Path,
    ctx: &'a ScenarioContext<'a>,
}

/// Run assertions in order until the first failure
async fn run_assertions(assertions: &[Assertion], env: &StepEnv<'_>, reporter: &mut Reporter) -> Result<()> {
    for assertion in assertions {
        match execute(&assertion.check, env).await {
            Ok(()) => reporter.record(TestOutcome::ok(&assertion.name)),
            Err(e) if e.is_interrupt() => return Err(e),
            Err(e) => {
                tracing::debug!("Step '{}' failed: {}", assertion.name, e);
                reporter.record(TestOutcome::error(&assertion.name, e.to_string()));
                break;
            }
        }
    }
    Ok(())
}

async fn execute(check: &Check, env: &StepEnv<'_>) -> Result<()> {
    let config = env.ctx.config;

    match check {
        Check::Probe { request, expect } => {
            let limits = ProbeLimits::from(&config.probe);
            let response = probe::send(request, env.addr, &limits).await?;
            tracing::trace!("Response: {:?}", response.status_line());
            expect.verify(&response)
        }
        Check::Load {
            duration,
            min_availability,
        } => {
            let window = duration.unwrap_or(Duration::from_secs(config.load.duration_secs));
            let availability = load::run_load(&config.load, env.addr, window, env.ctx.interrupt).await?;
            if availability < *min_availability {
                return Err(Error::TestAssertion(format!(
                    "availability {:.2} % below {:.2} %",
                    availability, min_availability
                )));
            }
            Ok(())
        }
        Check::Upload { path, file, accept } => {
            let file = upload_source(env.scenario_path, file.as_deref());
            let status = upload::upload_file(env.addr, path, &file, UPLOAD_TIMEOUT).await?;
            if !accept.contains(&status) {
                return Err(Error::TestAssertion(format!(
                    "expected status in {:?}, got {}",
                    accept, status
                )));
            }
            Ok(())
        }
    }
}

fn upload_source(scenario_path: &Path, file: Option<&Path>) -> PathBuf {
    match file {
        Some(file) => resolve_dir(scenario_dir(scenario_path), file),
        None => scenario_path.to_path_buf(),
    }
}

fn scenario_dir(path: &Path) -> &Path {
    path.parent().unwrap_or(Path::new("."))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::build::tests::FakeTool;
    use crate::report::OutcomeStatus;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal server answering every connection with `reply`
    async fn canned_server(reply: &'static [u8]) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket.write_all(reply).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        addr
    }

    fn write_scenario(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("scenario.yaml");
        std::fs::write(&path, body).unwrap();
        path
    }

    async fn run(path: &Path, root: &Path, builder: BuildManager) -> (Result<()>, Reporter) {
        let config = Config::default();
        let token = Interrupt::new();
        let ctx = ScenarioContext {
            config: &config,
            root,
            builder: &builder,
            interrupt: &token,
            verbose: false,
        };
        let mut reporter = Reporter::with_writer(33, Box::new(std::io::sink()));
        let result = run_scenario(path, &ctx, &mut reporter).await;
        (result, reporter)
    }

    #[tokio::test]
    async fn test_attach_runs_steps_until_first_failure() {
        let addr = canned_server(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n").await;
        let dir = tempfile::tempdir().unwrap();
        let path = write_scenario(
            dir.path(),
            &format!(
                "server:\n  mode: attach\n  port: {}\nsteps:\n\
                 - action: contract\n  contract: unknown_method\n\
                 - action: contract\n  contract: unimplemented_method\n\
                 - action: contract\n  contract: uri_too_long\n",
                addr.port()
            ),
        );

        let (result, reporter) = run(&path, dir.path(), BuildManager::new(Box::new(FakeTool::succeeding()))).await;
        result.unwrap();

        let outcomes = reporter.outcomes();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].name, "Unknown Method(405) test");
        assert_eq!(outcomes[0].status, OutcomeStatus::Ok);
        assert_eq!(outcomes[1].status, OutcomeStatus::Error);
        assert!(outcomes[1].detail.as_ref().unwrap().contains("501"));
    }

    #[tokio::test]
    async fn test_parse_error_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_scenario(dir.path(), "steps:\n  - action: contract\n    contract: teleport\n");

        let (result, reporter) = run(&path, dir.path(), BuildManager::new(Box::new(FakeTool::succeeding()))).await;
        result.unwrap();

        let outcomes = reporter.outcomes();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].name, "scenario.yaml");
        assert!(outcomes[0].detail.as_ref().unwrap().contains("teleport"));
    }

    #[tokio::test]
    async fn test_build_failure_never_launches() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("launched");
        let path = write_scenario(
            dir.path(),
            &format!(
                "name: built\nserver:\n  command: sh\n  args: [\"-c\", \"touch {}\"]\n  working_dir: .\n  build: true\nsteps: []\n",
                marker.display()
            ),
        );

        let tool = FakeTool::failing();
        let (result, reporter) = run(&path, dir.path(), BuildManager::new(Box::new(tool.clone()))).await;
        result.unwrap();

        assert_eq!(reporter.outcomes()[0].status, OutcomeStatus::BuildFail);
        assert!(!marker.exists());
        // clean, build, clean
        assert_eq!(tool.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_launch_failure_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let path = write_scenario(
            dir.path(),
            &format!(
                "name: crashing\nserver:\n  command: sh\n  args: [\"-c\", \"exit 1\"]\n  working_dir: .\n  port: {}\nsteps:\n\
                 - action: contract\n  contract: unknown_method\n",
                port
            ),
        );

        let (result, reporter) = run(&path, dir.path(), BuildManager::new(Box::new(FakeTool::succeeding()))).await;
        result.unwrap();

        let outcomes = reporter.outcomes();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].name, "crashing");
        assert_eq!(outcomes[0].status, OutcomeStatus::Error);
    }

    #[test]
    fn test_upload_source_defaults_to_scenario() {
        let scenario = Path::new("/tests/system_tests/upload.yaml");
        assert_eq!(upload_source(scenario, None), PathBuf::from("/tests/system_tests/upload.yaml"));
        assert_eq!(
            upload_source(scenario, Some(Path::new("data/big.bin"))),
            PathBuf::from("/tests/system_tests/data/big.bin")
        );
    }
}
