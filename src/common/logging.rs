//! Logging and tracing configuration
//!
//! Logs go to stderr so the colored report on stdout stays readable.
//! Optionally a copy is written to the data directory.

use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use super::paths;

/// Log file name inside the log directory
const LOG_FILE: &str = "harness.log";

/// Map the `-v` count to a default filter
fn default_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "webserv_tester=warn,warn",
        1 => "webserv_tester=info,warn",
        2 => "webserv_tester=debug,warn",
        _ => "webserv_tester=trace,info",
    }
}

/// Initialize tracing
///
/// `RUST_LOG` takes precedence over the verbosity flag. Returns the log
/// file path when file logging was requested and could be set up.
pub fn init(verbosity: u8, to_file: bool) -> Option<PathBuf> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)))
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_filter(filter());

    let log_dir = if to_file {
        match paths::ensure_log_dir() {
            Ok(dir) => dir,
            Err(e) => {
                eprintln!("Warning: Could not create log directory: {}", e);
                None
            }
        }
    } else {
        None
    };

    match log_dir {
        Some(dir) => {
            let file_layer = fmt::layer()
                .with_writer(tracing_appender::rolling::never(&dir, LOG_FILE))
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(filter());

            tracing_subscriber::registry()
                .with(stderr_layer)
                .with(file_layer)
                .init();

            Some(dir.join(LOG_FILE))
        }
        None => {
            tracing_subscriber::registry().with(stderr_layer).init();
            None
        }
    }
}
