//! Pipeline run command

use anyhow::Result;
use colored::*;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::report::print_report;
use crate::config::{Config, Settings};

/// Runs the pipeline and returns its exit code
///
/// Ctrl-C cancels the run; the report is still written and printed.
pub async fn run_pipeline(environment: &str, settings: &Settings) -> Result<i32> {
    let config = Config::load(settings)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling pipeline");
            on_signal.cancel();
        }
    });

    let (report, path) =
        rollout_engine::run_environment(environment, &config.engine, &config.overrides, cancel)
            .await?;

    print_report(&report);
    println!();
    println!("  Report: {}", path.display().to_string().dimmed());

    Ok(report.exit_code())
}
