//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod cache_key;
mod plan;
mod report;
mod run;

use anyhow::Result;
use clap::Subcommand;
use std::path::PathBuf;

use crate::config::Settings;
use cache_key::ScopeArg;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the deployment pipeline for an environment
    Run {
        /// Environment name (development | production)
        environment: String,

        #[command(flatten)]
        settings: Settings,
    },
    /// Print the stage plan for an environment without running it
    Plan {
        /// Environment name (development | production)
        environment: String,

        #[command(flatten)]
        settings: Settings,
    },
    /// Render a persisted run report
    Report {
        /// Path to a report JSON file
        file: PathBuf,

        /// Print the summary as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Compute the cache key for a set of inputs
    CacheKey {
        /// Cache scope the key belongs to
        #[arg(short, long, value_enum)]
        scope: ScopeArg,

        /// Inputs as name=path pairs; directories are fingerprinted recursively
        #[arg(short, long = "input", value_parser = parse_key_val, required = true)]
        inputs: Vec<(String, PathBuf)>,

        /// Also look the key up in the cache directory
        #[arg(long)]
        lookup: bool,

        #[command(flatten)]
        settings: Settings,
    },
}

/// Parse a single name=path pair
fn parse_key_val(s: &str) -> Result<(String, PathBuf)> {
    let pos = s
        .find('=')
        .ok_or_else(|| anyhow::anyhow!("invalid NAME=path: no `=` found in `{}`", s))?;
    Ok((s[..pos].to_string(), PathBuf::from(&s[pos + 1..])))
}

/// Handle a CLI command
///
/// Returns the process exit code.
pub async fn handle_command(command: Commands) -> Result<i32> {
    match command {
        Commands::Run {
            environment,
            settings,
        } => run::run_pipeline(&environment, &settings).await,
        Commands::Plan {
            environment,
            settings,
        } => plan::show_plan(&environment, &settings).map(|_| 0),
        Commands::Report { file, json } => report::show_report(&file, json).map(|_| 0),
        Commands::CacheKey {
            scope,
            inputs,
            lookup,
            settings,
        } => cache_key::show_cache_key(scope, &inputs, lookup, &settings).map(|_| 0),
    }
}
