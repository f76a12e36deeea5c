//! Report rendering

use anyhow::{Context, Result};
use colored::*;
use rollout_core::domain::report::{PipelineReport, PipelineStatus};
use rollout_core::domain::result::{StageResult, StageStatus};
use rollout_core::dto::report::ReportSummary;
use std::path::Path;

/// Load and display a persisted report
pub fn show_report(path: &Path, json: bool) -> Result<()> {
    let report = rollout_engine::load_report(path)?;

    if json {
        let summary = ReportSummary::from(&report);
        let text =
            serde_json::to_string_pretty(&summary).context("Failed to serialize report summary")?;
        println!("{}", text);
    } else {
        print_report(&report);
    }

    Ok(())
}

/// Print a report: header, one line per stage, then totals
pub fn print_report(report: &PipelineReport) {
    let summary = ReportSummary::from(report);

    let status = match report.status {
        PipelineStatus::Succeeded => report.status.to_string().green().bold(),
        PipelineStatus::Failed => report.status.to_string().red().bold(),
    };

    println!("{}", "Pipeline Report:".bold());
    println!("  Run ID:      {}", report.run_id.to_string().cyan());
    println!("  Environment: {}", report.environment.to_string().bold());
    println!("  Namespace:   {}", report.namespace);
    println!("  Status:      {} ({})", status, report.outcome);
    println!(
        "  Started:     {}",
        report.started_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!("  Duration:    {}", format_millis(summary.duration_ms));

    println!("\n{}", "Stages:".bold());
    println!("{}", "─".repeat(80).dimmed());
    for stage in &report.stages {
        print_stage(stage);
    }
    println!("{}", "─".repeat(80).dimmed());

    println!(
        "  {} succeeded, {} failed, {} cancelled, {} skipped ({} attempts, {} retries)",
        summary.succeeded.to_string().green(),
        summary.failed.to_string().red(),
        summary.cancelled.to_string().yellow(),
        summary.skipped.to_string().dimmed(),
        summary.total_attempts,
        summary.retries
    );
}

fn print_stage(stage: &StageResult) {
    let marker = match stage.status {
        StageStatus::Succeeded => "✓".green(),
        StageStatus::Failed => "✗".red(),
        StageStatus::Cancelled => "■".yellow(),
        StageStatus::Skipped => "○".dimmed(),
        StageStatus::Pending | StageStatus::Running => "·".normal(),
    };

    let duration = stage
        .duration()
        .map(|d| format_millis(d.num_milliseconds()))
        .unwrap_or_else(|| "-".to_string());
    let optional = if stage.required { "" } else { " (optional)" };

    println!(
        "  {} {:<18} {:<10} attempts={} cache={} {}{}",
        marker,
        stage.stage.bold(),
        stage.status.to_string(),
        stage.attempts,
        stage.cache,
        duration.dimmed(),
        optional.dimmed()
    );

    if let Some(error) = &stage.error {
        println!("      {} {}", format!("{}:", error.kind).red(), error.message);
    }
    if let Some(reason) = &stage.skip_reason {
        println!("      {} {}", "skipped:".dimmed(), reason.dimmed());
    }
}

fn format_millis(ms: i64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1000)
    }
}
