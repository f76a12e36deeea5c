//! Execution context for pipeline stages
//!
//! Contains all state a stage may read during a run:
//! - The frozen environment profile
//! - The cancellation token of the run
//! - The readiness probe settings
//! - A monotonic clock for result timestamps
//! - Values published by upstream stages (image reference, endpoints)

use chrono::{DateTime, Utc};
use rollout_core::domain::profile::EnvironmentProfile;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::probe::ReadinessProbe;

/// Names of values stages publish for their dependents
pub mod keys {
    /// Image reference produced by the build stage
    pub const IMAGE: &str = "image";
    pub const CLUSTER_ENDPOINT: &str = "cluster_endpoint";
    pub const REGISTRY_URL: &str = "registry_url";
}

/// Wall clock that never goes backwards within a run
#[derive(Debug, Default)]
pub struct RunClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl RunClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> DateTime<Utc> {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let now = match *last {
            Some(previous) if previous > Utc::now() => previous,
            _ => Utc::now(),
        };
        *last = Some(now);
        now
    }
}

/// Values published by stages, readable by later stages
#[derive(Debug, Default)]
pub struct StageOutputs {
    values: Mutex<HashMap<String, String>>,
}

impl StageOutputs {
    pub fn publish(&self, key: &str, value: impl Into<String>) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.get(key).cloned()
    }
}

/// Everything a stage receives besides its own collaborators
///
/// Cheap to clone; every clone shares the same clock, outputs and token.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub run_id: Uuid,

    /// Read-only for the whole run
    pub profile: Arc<EnvironmentProfile>,

    pub cancel: CancellationToken,

    pub probe: ReadinessProbe,

    pub clock: Arc<RunClock>,

    pub outputs: Arc<StageOutputs>,
}

impl StageContext {
    pub fn new(
        run_id: Uuid,
        profile: Arc<EnvironmentProfile>,
        cancel: CancellationToken,
        probe: ReadinessProbe,
    ) -> Self {
        Self {
            run_id,
            profile,
            cancel,
            probe,
            clock: Arc::new(RunClock::new()),
            outputs: Arc::new(StageOutputs::default()),
        }
    }

    /// Image to deploy: the one built in this run, else the profile's
    pub fn image(&self) -> String {
        self.outputs
            .get(keys::IMAGE)
            .unwrap_or_else(|| self.profile.image())
    }
}
