//! Stage plans
//!
//! A plan is the validated, topologically ordered list of stages for one
//! environment. Ordinals must agree with the dependency graph: every stage
//! comes after everything it depends on.

use rollout_core::domain::profile::EnvironmentProfile;
use rollout_core::domain::stage::{RetryClass, Stage, names};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;
use thiserror::Error;

use crate::config::EngineConfig;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("plan has no stages")]
    Empty,

    #[error("stage '{0}' appears more than once")]
    DuplicateStage(String),

    #[error("stages '{0}' and '{1}' share ordinal {2}")]
    DuplicateOrdinal(String, String, u32),

    #[error("stage '{stage}' depends on unknown stage '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },

    #[error("dependency cycle between stages: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("stage '{stage}' (ordinal {ordinal}) must come after its dependency '{dependency}'")]
    OrdinalOrder {
        stage: String,
        ordinal: u32,
        dependency: String,
    },
}

/// Validated stage list in execution order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    stages: Vec<Stage>,
}

impl StagePlan {
    /// Validates `stages` and orders them topologically (ties by ordinal)
    pub fn new(stages: Vec<Stage>) -> Result<Self, PlanError> {
        if stages.is_empty() {
            return Err(PlanError::Empty);
        }

        let mut by_name: HashMap<&str, &Stage> = HashMap::new();
        let mut by_ordinal: HashMap<u32, &str> = HashMap::new();
        for stage in &stages {
            if by_name.insert(stage.name.as_str(), stage).is_some() {
                return Err(PlanError::DuplicateStage(stage.name.clone()));
            }
            if let Some(other) = by_ordinal.insert(stage.ordinal, stage.name.as_str()) {
                return Err(PlanError::DuplicateOrdinal(
                    other.to_string(),
                    stage.name.clone(),
                    stage.ordinal,
                ));
            }
        }

        for stage in &stages {
            for dep in &stage.depends_on {
                if !by_name.contains_key(dep.as_str()) {
                    return Err(PlanError::UnknownDependency {
                        stage: stage.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let order = topological_order(&stages)?;

        for stage in &stages {
            for dep in &stage.depends_on {
                let dep_ordinal = by_name.get(dep.as_str()).map(|d| d.ordinal).unwrap_or(0);
                if dep_ordinal >= stage.ordinal {
                    return Err(PlanError::OrdinalOrder {
                        stage: stage.name.clone(),
                        ordinal: stage.ordinal,
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let mut remaining: HashMap<String, Stage> = stages
            .into_iter()
            .map(|s| (s.name.clone(), s))
            .collect();
        let stages = order
            .into_iter()
            .filter_map(|name| remaining.remove(&name))
            .collect();

        Ok(Self { stages })
    }

    /// The stage plan for a profile
    ///
    /// Development: provision, build, test, deploy, verify. Production adds
    /// `ha-verify` after deploy and `backup-retention` after provision.
    pub fn for_profile(profile: &EnvironmentProfile, config: &EngineConfig) -> Result<Self, PlanError> {
        let readiness = config.readiness_timeout;

        let mut stages = vec![
            Stage::new(names::PROVISION, 1)
                .with_timeout(Duration::from_secs(30 * 60))
                .with_retries(RetryClass::SafeToRetry, 3),
            Stage::new(names::BUILD, 2)
                .depends_on(names::PROVISION)
                .with_timeout(Duration::from_secs(20 * 60))
                .with_retries(RetryClass::SafeToRetry, 2),
            Stage::new(names::TEST, 3)
                .depends_on(names::BUILD)
                .with_timeout(Duration::from_secs(15 * 60))
                .with_retries(RetryClass::NoRetry, 1),
            Stage::new(names::DEPLOY, 4)
                .depends_on(names::TEST)
                .with_timeout(readiness + Duration::from_secs(5 * 60))
                .with_retries(RetryClass::RetryWithCleanup, 2),
            Stage::new(names::VERIFY, 5)
                .depends_on(names::DEPLOY)
                .with_timeout(readiness * 2 + Duration::from_secs(60))
                .with_retries(RetryClass::SafeToRetry, 3),
        ];

        if profile.is_production() {
            stages.push(
                Stage::new(names::HA_VERIFY, 6)
                    .depends_on(names::DEPLOY)
                    .with_timeout(Duration::from_secs(5 * 60))
                    .with_retries(RetryClass::SafeToRetry, 3),
            );
            stages.push(
                Stage::new(names::BACKUP_RETENTION, 7)
                    .depends_on(names::PROVISION)
                    .with_timeout(Duration::from_secs(5 * 60))
                    .with_retries(RetryClass::SafeToRetry, 2),
            );
        }

        Self::new(stages)
    }

    /// Stage run after a failed pipeline when a rollback policy is set
    pub fn rollback_stage(&self) -> Stage {
        let next = self.stages.iter().map(|s| s.ordinal).max().unwrap_or(0) + 1;
        Stage::new(names::ROLLBACK, next)
            .with_timeout(Duration::from_secs(30 * 60))
            .with_retries(RetryClass::SafeToRetry, 2)
            .optional()
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn get(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Kahn's algorithm; among ready stages the lowest ordinal goes first
fn topological_order(stages: &[Stage]) -> Result<Vec<String>, PlanError> {
    let mut in_degree: HashMap<&str, usize> = stages
        .iter()
        .map(|s| (s.name.as_str(), s.depends_on.len()))
        .collect();
    let ordinal: HashMap<&str, u32> = stages.iter().map(|s| (s.name.as_str(), s.ordinal)).collect();

    let mut ready: BTreeSet<(u32, &str)> = stages
        .iter()
        .filter(|s| s.depends_on.is_empty())
        .map(|s| (s.ordinal, s.name.as_str()))
        .collect();
    let mut order = Vec::with_capacity(stages.len());

    while let Some(next) = ready.pop_first() {
        let (_, name) = next;
        order.push(name.to_string());

        for stage in stages.iter().filter(|s| s.depends_on.iter().any(|d| d == name)) {
            if let Some(degree) = in_degree.get_mut(stage.name.as_str()) {
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    let key = stage.name.as_str();
                    ready.insert((ordinal.get(key).copied().unwrap_or(0), key));
                }
            }
        }
    }

    if order.len() != stages.len() {
        let placed: HashSet<&str> = order.iter().map(String::as_str).collect();
        let mut cyclic: Vec<String> = stages
            .iter()
            .filter(|s| !placed.contains(s.name.as_str()))
            .map(|s| s.name.clone())
            .collect();
        cyclic.sort();
        return Err(PlanError::Cycle(cyclic));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_development_plan() {
        let plan =
            StagePlan::for_profile(&EnvironmentProfile::development(), &EngineConfig::default())
                .unwrap();

        assert_eq!(plan.names(), vec!["provision", "build", "test", "deploy", "verify"]);
        assert_eq!(plan.get("test").unwrap().retry_class, RetryClass::NoRetry);
        assert_eq!(
            plan.get("deploy").unwrap().retry_class,
            RetryClass::RetryWithCleanup
        );
    }

    #[test]
    fn test_production_plan_adds_ha_and_backups() {
        let plan =
            StagePlan::for_profile(&EnvironmentProfile::production(), &EngineConfig::default())
                .unwrap();

        assert_eq!(
            plan.names(),
            vec![
                "provision",
                "build",
                "test",
                "deploy",
                "verify",
                "ha-verify",
                "backup-retention"
            ]
        );
        assert_eq!(plan.get("ha-verify").unwrap().depends_on, vec!["deploy"]);
        assert_eq!(
            plan.get("backup-retention").unwrap().depends_on,
            vec!["provision"]
        );
    }

    #[test]
    fn test_deploy_timeout_covers_readiness_window() {
        let config = EngineConfig::default();
        let plan = StagePlan::for_profile(&EnvironmentProfile::development(), &config).unwrap();
        assert!(plan.get("deploy").unwrap().timeout() > config.readiness_timeout);
    }

    #[test]
    fn test_orders_by_dependencies_not_input_order() {
        let plan = StagePlan::new(vec![
            Stage::new("c", 3).depends_on("b"),
            Stage::new("a", 1),
            Stage::new("b", 2).depends_on("a"),
        ])
        .unwrap();

        assert_eq!(plan.names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_rejects_invalid_graphs() {
        assert_eq!(StagePlan::new(vec![]), Err(PlanError::Empty));

        assert!(matches!(
            StagePlan::new(vec![Stage::new("a", 1), Stage::new("a", 2)]),
            Err(PlanError::DuplicateStage(_))
        ));

        assert!(matches!(
            StagePlan::new(vec![Stage::new("a", 1), Stage::new("b", 1)]),
            Err(PlanError::DuplicateOrdinal(..))
        ));

        assert!(matches!(
            StagePlan::new(vec![Stage::new("a", 1).depends_on("ghost")]),
            Err(PlanError::UnknownDependency { .. })
        ));

        assert_eq!(
            StagePlan::new(vec![
                Stage::new("a", 1).depends_on("b"),
                Stage::new("b", 2).depends_on("a"),
            ]),
            Err(PlanError::Cycle(vec!["a".to_string(), "b".to_string()]))
        );

        assert!(matches!(
            StagePlan::new(vec![Stage::new("a", 2), Stage::new("b", 1).depends_on("a")]),
            Err(PlanError::OrdinalOrder { .. })
        ));
    }

    #[test]
    fn test_rollback_stage_comes_last() {
        let plan =
            StagePlan::for_profile(&EnvironmentProfile::development(), &EngineConfig::default())
                .unwrap();
        let rollback = plan.rollback_stage();
        assert_eq!(rollback.ordinal, 6);
        assert!(!rollback.required);
        assert!(rollback.depends_on.is_empty());
    }
}
