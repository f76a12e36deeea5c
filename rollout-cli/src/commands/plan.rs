//! Plan command

use anyhow::Result;
use colored::*;

use crate::config::{Config, Settings};

/// Print the ordered stage plan for an environment
pub fn show_plan(environment: &str, settings: &Settings) -> Result<()> {
    let config = Config::load(settings)?;
    let (profile, plan) = rollout_engine::plan_for(environment, &config.engine, &config.overrides)?;

    println!("{}", "Pipeline Plan:".bold());
    println!("  Environment: {}", profile.environment.to_string().bold());
    println!("  Namespace:   {}", profile.namespace.cyan());
    println!("  Image:       {}", profile.image());
    println!(
        "  Replicas:    {} (HA: {})",
        profile.sizing.replicas, profile.sizing.high_availability
    );
    println!("  Rollback:    {}", config.engine.rollback);
    println!();

    for stage in plan.stages() {
        let deps = if stage.depends_on.is_empty() {
            "-".to_string()
        } else {
            stage.depends_on.join(", ")
        };
        println!(
            "  {} {:<18} after: {:<22} timeout: {:>5}s  attempts: {}  {}",
            format!("{}.", stage.ordinal).dimmed(),
            stage.name.bold(),
            deps,
            stage.timeout_seconds,
            stage.max_attempts(),
            stage.retry_class.as_str().dimmed()
        );
    }

    if config.engine.rollback.is_enabled() {
        let rollback = plan.rollback_stage();
        println!(
            "  {} {:<18} {}",
            format!("{}.", rollback.ordinal).dimmed(),
            rollback.name.bold(),
            "on failure".yellow()
        );
    }

    Ok(())
}
