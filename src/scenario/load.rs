//! Sustained load through the external load generator

use std::net::SocketAddr;
use std::time::Duration;

use crate::common::config::LoadConfig;
use crate::common::{Error, Result};
use crate::supervisor::{run_to_completion, Interrupt, ProcessSpec};

/// Run the load tool for `duration` and return the reported availability
///
/// The tool is given the load window plus the configured grace period to
/// exit on its own before it is killed.
pub async fn run_load(
    config: &LoadConfig,
    addr: SocketAddr,
    duration: Duration,
    interrupt: &Interrupt,
) -> Result<f64> {
    let program = which::which(&config.tool).map_err(|_| Error::ToolNotFound {
        name: config.tool.clone(),
    })?;

    let spec = ProcessSpec::new(program, std::env::temp_dir())
        .args(expand_args(&config.args, addr, duration));
    let limit = duration + Duration::from_secs(config.grace_secs);

    tracing::info!("Running load for {:?}: {}", duration, spec.display());
    let done = run_to_completion(&spec, true, Some(limit), interrupt).await?;

    // siege reports on stderr; other tools may use stdout
    let availability = parse_availability(&done.stderr)
        .or_else(|| parse_availability(&done.stdout))
        .ok_or_else(|| {
            Error::TestAssertion(format!(
                "{} printed no availability (exit {})",
                config.tool, done.status
            ))
        })?;

    tracing::info!("Availability {:.2} %", availability);
    Ok(availability)
}

/// Substitute `{duration}`, `{host}` and `{port}` in the argument template
fn expand_args(template: &[String], addr: SocketAddr, duration: Duration) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            arg.replace("{duration}", &duration.as_secs().to_string())
                .replace("{host}", &addr.ip().to_string())
                .replace("{port}", &addr.port().to_string())
        })
        .collect()
}

/// Find `Availability: <float> %` (or the JSON `"availability": <float>`)
pub fn parse_availability(output: &str) -> Option<f64> {
    output.lines().find_map(|line| {
        let line = line.trim().trim_start_matches('"');
        let (key, value) = line.split_once(':')?;
        if !key.trim_end_matches('"').eq_ignore_ascii_case("availability") {
            return None;
        }
        value
            .trim()
            .trim_end_matches(',')
            .trim_end_matches('%')
            .trim()
            .parse()
            .ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_siege_summary() {
        let output = "\
Lifting the server siege...
Transactions:\t\t       12345 hits
Availability:\t\t      100.00 %
Elapsed time:\t\t        9.99 secs
";
        assert_eq!(parse_availability(output), Some(100.0));
    }

    #[test]
    fn test_parse_partial_and_json() {
        assert_eq!(parse_availability("Availability:  97.31 %"), Some(97.31));
        assert_eq!(
            parse_availability("{\n  \"transactions\": 10,\n  \"availability\": 99.5,\n}"),
            Some(99.5)
        );
        assert_eq!(parse_availability("Transactions: 10 hits"), None);
        assert_eq!(parse_availability(""), None);
    }

    #[test]
    fn test_expand_args() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let args = expand_args(&LoadConfig::default().args, addr, Duration::from_secs(10));
        assert_eq!(args, vec!["-b", "-t10s", "127.0.0.1:8080"]);
    }

    #[tokio::test]
    async fn test_missing_tool() {
        let config = LoadConfig {
            tool: "definitely-not-siege".to_string(),
            ..Default::default()
        };
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let err = run_load(&config, addr, Duration::from_secs(1), &Interrupt::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ToolNotFound { .. }));
    }
}
