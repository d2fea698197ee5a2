//! CLI command handling
//!
//! Dispatches CLI commands and formats their output. Every command
//! returns whether it fully succeeded; harness errors are returned as
//! errors.

use std::path::PathBuf;

use colored::Colorize;

use crate::build::{BuildManager, Make};
use crate::commands::Commands;
use crate::common::config::{resolve_addr, Config};
use crate::common::Result;
use crate::discovery::{Category, SuiteKind, TestSuite};
use crate::probe::{self, ProbeLimits, ProbeRequest};
use crate::report::Reporter;
use crate::runner::Harness;
use crate::scenario::contracts::CONTRACTS;
use crate::supervisor::Interrupt;

/// Global options shared by every command
pub struct Context {
    pub config: Config,
    pub root: PathBuf,
    pub verbose: u8,
    pub interrupt: Interrupt,
}

impl Context {
    fn harness(self) -> Harness {
        let verbose = self.verbose > 0;
        let make = Make::new(&self.config.build, verbose, self.interrupt.clone());
        Harness::new(
            self.config,
            self.root,
            BuildManager::new(Box::new(make)),
            self.interrupt,
            verbose,
        )
    }
}

/// Dispatch a CLI command; `Ok(false)` means some test did not pass
pub async fn dispatch(command: Commands, ctx: Context) -> Result<bool> {
    match command {
        Commands::Run { categories, report } => {
            let categories = selected(categories);
            let name_width = ctx.config.report.name_width;
            let harness = ctx.harness();

            let mut reporter = Reporter::new(name_width);
            let result = harness.run_all(&categories, &mut reporter).await;

            // The partial report is still finished after an interrupt
            reporter.print_summary();
            reporter.finish();
            if let Some(path) = report {
                reporter.write_json(&path)?;
            }

            result?;
            Ok(reporter.all_passed())
        }

        Commands::List { categories } => {
            let categories = selected(categories);
            let harness = ctx.harness();
            let suites = harness.discover(&categories)?;

            for category in &categories {
                println!("{}", category.title().yellow());
                let mut any = false;
                for suite in suites.iter().filter(|s| s.category == *category) {
                    print_suite(suite, &harness.config().build.manifest);
                    any = true;
                }
                if !any {
                    println!("\t{}", "(none)".dimmed());
                }
            }
            Ok(true)
        }

        Commands::Probe { request, host, port } => {
            let server = &ctx.config.server;
            let addr = resolve_addr(
                host.as_deref().unwrap_or(&server.host),
                port.unwrap_or(server.port),
            )?;
            let request = ProbeRequest::unescape(&request);
            let limits = ProbeLimits::from(&ctx.config.probe);

            let response = probe::send(&request, addr, &limits).await?;
            print!("{}", response.text());
            if !response.text().ends_with('\n') {
                println!();
            }
            if response.is_truncated() {
                eprintln!("{}", "(response truncated)".dimmed());
            }
            Ok(true)
        }

        Commands::Contracts => {
            for contract in CONTRACTS {
                println!(
                    "{:<22}{:<34}{}",
                    contract.id.cyan(),
                    contract.title,
                    contract.summary.dimmed()
                );
            }
            Ok(true)
        }
    }
}

/// Chosen categories in run order, or all of them
fn selected(mut categories: Vec<Category>) -> Vec<Category> {
    if categories.is_empty() {
        return Category::ALL.to_vec();
    }
    categories.sort_by_key(|c| Category::ALL.iter().position(|a| a == c));
    categories.dedup();
    categories
}

fn print_suite(suite: &TestSuite, manifest: &str) {
    let kind = match &suite.kind {
        SuiteKind::Buildable { artifact: Some(_), .. } => format!("build ({})", manifest),
        SuiteKind::Buildable { artifact: None, .. } => format!("build ({}, no NAME)", manifest),
        SuiteKind::Scripts { scripts } => format!("{} scenario(s)", scripts.len()),
    };
    println!(
        "\t{:<33}{:<24}{}",
        suite.name,
        kind,
        suite.root.display().to_string().dimmed()
    );
}
