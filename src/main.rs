//! webserv-tester - black-box test harness for an HTTP server
//!
//! Discovers unit, integration and system suites under a test root, builds
//! them with an external build tool, supervises the server under test and
//! reports one line per test.

use std::path::PathBuf;

use clap::{ArgAction, Parser};
use webserv_tester::cli::{self, Context};
use webserv_tester::commands::Commands;
use webserv_tester::common::{config::Config, logging};
use webserv_tester::supervisor::install_interrupt_handler;

/// Exit code for harness-level errors
const EXIT_HARNESS_ERROR: i32 = 2;

/// Exit code after an operator interrupt (128 + SIGINT)
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "webserv-tester", about = "Black-box test harness for an HTTP server")]
#[command(version, long_about = None)]
struct Cli {
    /// Test root containing the category folders
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Configuration file (default: <root>/webserv-tester.toml, then the user config)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v, -vv, -vvv); also passes tool output through
    #[arg(long, short, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref(), &cli.root) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(EXIT_HARNESS_ERROR);
        }
    };

    if let Some(path) = logging::init(cli.verbose, config.logging.file) {
        tracing::info!("Logging to '{}'", path.display());
    }

    let ctx = Context {
        config,
        root: cli.root,
        verbose: cli.verbose,
        interrupt: install_interrupt_handler(),
    };

    let code = match cli::dispatch(cli.command.unwrap_or_default(), ctx).await {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) if e.is_interrupt() => {
            eprintln!("Interrupted");
            EXIT_INTERRUPTED
        }
        Err(e) => {
            eprintln!("Error: {e}");
            EXIT_HARNESS_ERROR
        }
    };

    std::process::exit(code);
}
