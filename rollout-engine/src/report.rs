//! Report persistence
//!
//! Every run writes `<dir>/<environment>-<run_id>.json` and refreshes
//! `<dir>/latest-<environment>.json`. Both are written to a temporary file
//! first and renamed into place, so readers never see a partial report.

use anyhow::Context as _;
use rollout_core::domain::profile::Environment;
use rollout_core::domain::report::PipelineReport;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone)]
pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn run_path(&self, report: &PipelineReport) -> PathBuf {
        self.dir
            .join(format!("{}-{}.json", report.environment, report.run_id))
    }

    pub fn latest_path(&self, environment: Environment) -> PathBuf {
        self.dir.join(format!("latest-{}.json", environment))
    }

    /// Writes the run report and the environment's latest pointer
    pub fn persist(&self, report: &PipelineReport) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("cannot create report directory {}", self.dir.display()))?;

        let json = report
            .to_json_pretty()
            .context("cannot serialize pipeline report")?;

        let run_path = self.run_path(report);
        write_atomic(&run_path, &json)?;
        write_atomic(&self.latest_path(report.environment), &json)?;

        info!("Report written to {}", run_path.display());
        Ok(run_path)
    }
}

fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
    let temp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4()));
    fs::write(&temp, contents).with_context(|| format!("cannot write {}", temp.display()))?;
    fs::rename(&temp, path).with_context(|| format!("cannot move report to {}", path.display()))?;
    Ok(())
}

/// Reads a persisted report
pub fn load_report(path: &Path) -> anyhow::Result<PipelineReport> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read report {}", path.display()))?;
    PipelineReport::from_json(&text)
        .with_context(|| format!("{} is not a pipeline report", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rollout_core::domain::profile::EnvironmentProfile;
    use rollout_core::domain::report::RunOutcome;
    use rollout_core::domain::result::{CacheOutcome, StageResult};

    fn report() -> PipelineReport {
        let now = Utc::now();
        let mut build = StageResult::pending("build");
        build.mark_running(now).unwrap();
        build.mark_succeeded(now, 1, CacheOutcome::Hit).unwrap();

        PipelineReport::finalize(
            uuid::Uuid::new_v4(),
            &EnvironmentProfile::development(),
            now,
            vec![build],
            RunOutcome::Completed,
            now,
        )
    }

    #[test]
    fn test_persist_and_load() {
        let dir = std::env::temp_dir().join(format!("rollout-reports-{}", uuid::Uuid::new_v4()));
        let writer = ReportWriter::new(&dir);
        let report = report();

        let path = writer.persist(&report).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            format!("development-{}.json", report.run_id)
        );

        assert_eq!(load_report(&path).unwrap(), report);
        assert_eq!(
            load_report(&dir.join("latest-development.json")).unwrap(),
            report
        );

        let leftovers = fs::read_dir(&dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .map(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(leftovers, 0);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_rejects_garbage() {
        let path = std::env::temp_dir().join(format!("rollout-garbage-{}.json", uuid::Uuid::new_v4()));
        fs::write(&path, "{\"not\": \"a report\"}").unwrap();
        assert!(load_report(&path).is_err());
        fs::remove_file(&path).unwrap();
    }
}
