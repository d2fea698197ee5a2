//! CLI command definitions
//!
//! Defines the clap commands for the test harness CLI.

use clap::Subcommand;
use std::path::PathBuf;

use crate::discovery::Category;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build and run every discovered suite (the default)
    Run {
        /// Restrict to a category; can be given multiple times
        #[arg(long = "category", short = 'c', value_enum)]
        categories: Vec<Category>,

        /// Also write a JSON report to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// List discovered suites without building or running them
    #[command(alias = "ls")]
    List {
        /// Restrict to a category; can be given multiple times
        #[arg(long = "category", short = 'c', value_enum)]
        categories: Vec<Category>,
    },

    /// Send one raw request to a running server and print the response
    Probe {
        /// Request text; \r, \n, \t, \0 and \\ escapes are interpreted
        request: String,

        /// Server host (default from config)
        #[arg(long)]
        host: Option<String>,

        /// Server port (default from config)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// List the built-in contracts usable in scenario files
    Contracts,
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Run {
            categories: Vec::new(),
            report: None,
        }
    }
}
