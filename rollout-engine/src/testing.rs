//! Fake collaborators shared by the engine's tests

use async_trait::async_trait;
use rollout_core::domain::profile::EnvironmentProfile;
use rollout_tools::{
    BuildRequest, ClusterClient, ContainerBuilder, ExecOutput, InfraProvisioner, PodRef,
    ResourceEndpoints, ResourceRef, ResourceSpec, ResourceState, ToolError,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::context::StageContext;
use crate::error::StageError;
use crate::executor::{StageAction, StageOutput};
use crate::probe::ReadinessProbe;

pub fn context() -> StageContext {
    context_for(EnvironmentProfile::development())
}

pub fn context_for(profile: EnvironmentProfile) -> StageContext {
    StageContext::new(
        Uuid::new_v4(),
        Arc::new(profile),
        CancellationToken::new(),
        ReadinessProbe::new(Duration::from_secs(10), Duration::from_secs(300)),
    )
}

/// Stage action replaying scripted attempt results
pub struct ScriptedAction {
    script: Mutex<VecDeque<Result<StageOutput, StageError>>>,
    last: Mutex<Option<Result<StageOutput, StageError>>>,
    hang: bool,
    pub calls: AtomicU32,
    pub cleanups: AtomicU32,
}

impl ScriptedAction {
    pub fn new(script: Vec<Result<StageOutput, StageError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            hang: false,
            calls: AtomicU32::new(0),
            cleanups: AtomicU32::new(0),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(vec![Ok(StageOutput::done())])
    }

    pub fn failing(err: StageError) -> Self {
        Self::new(vec![Err(err)])
    }

    /// Never finishes an attempt
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::succeeding()
        }
    }
}

#[async_trait]
impl StageAction for ScriptedAction {
    async fn execute(&self, _ctx: &StageContext) -> Result<StageOutput, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }

        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(next) = next {
            *last = Some(next);
        }
        (*last).clone().unwrap_or_else(|| Ok(StageOutput::done()))
    }

    async fn cleanup(&self, _ctx: &StageContext) -> Result<(), StageError> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory cluster: every resource reports the same configurable state
pub struct FakeCluster {
    state: Mutex<ResourceState>,
    exec: Mutex<ExecOutput>,
    pub applied: Mutex<Vec<ResourceSpec>>,
    pub deleted: Mutex<Vec<ResourceRef>>,
    exec_calls: AtomicU32,
    pub condition_calls: AtomicU32,
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self {
            state: Mutex::new(ResourceState::absent()),
            exec: Mutex::new(ExecOutput {
                stdout: String::new(),
                stderr: "no pod".to_string(),
                exit_code: 1,
            }),
            applied: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            exec_calls: AtomicU32::new(0),
            condition_calls: AtomicU32::new(0),
        }
    }
}

impl FakeCluster {
    /// Deployment fully available with `replicas` replicas and a healthy app
    pub fn healthy(replicas: u32) -> Self {
        let cluster = Self::default();
        cluster.set_state(ResourceState::replicas(replicas, replicas, replicas));
        cluster.set_exec(ExecOutput {
            stdout: r#"{"status": "healthy", "version": "1.0.0"}"#.to_string(),
            stderr: String::new(),
            exit_code: 0,
        });
        cluster
    }

    /// Deployment exists but never gets an available replica
    pub fn stuck(desired: u32) -> Self {
        let cluster = Self::default();
        cluster.set_state(ResourceState::replicas(desired, 0, 0));
        cluster
    }

    pub fn set_state(&self, state: ResourceState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn set_exec(&self, output: ExecOutput) {
        *self.exec.lock().unwrap() = output;
    }

    pub fn exec_calls(&self) -> u32 {
        self.exec_calls.load(Ordering::SeqCst)
    }

    pub fn applied_kinds(&self) -> Vec<String> {
        self.applied
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.resource.kind.clone())
            .collect()
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn apply_manifest(&self, spec: &ResourceSpec) -> rollout_tools::Result<()> {
        self.applied.lock().unwrap().push(spec.clone());
        Ok(())
    }

    async fn get_condition(&self, _resource: &ResourceRef) -> rollout_tools::Result<ResourceState> {
        self.condition_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().unwrap().clone())
    }

    async fn exec_in_pod(&self, _pod: &PodRef, _command: &[String]) -> rollout_tools::Result<ExecOutput> {
        self.exec_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.exec.lock().unwrap().clone())
    }

    async fn delete_resource(&self, resource: &ResourceRef) -> rollout_tools::Result<()> {
        self.deleted.lock().unwrap().push(resource.clone());
        Ok(())
    }
}

/// Builder recording requests; fails with queued transient errors first
#[derive(Default)]
pub struct FakeBuilder {
    pub requests: Mutex<Vec<BuildRequest>>,
    failures: Mutex<VecDeque<String>>,
}

impl FakeBuilder {
    pub fn fail_next(&self, message: &str) {
        self.failures.lock().unwrap().push_back(message.to_string());
    }

    pub fn builds(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<BuildRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ContainerBuilder for FakeBuilder {
    async fn build(&self, request: &BuildRequest) -> rollout_tools::Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(message) = self.failures.lock().unwrap().pop_front() {
            return Err(ToolError::Unavailable(message));
        }
        Ok(format!("{}@sha256:{}", request.image, "0".repeat(12)))
    }
}

/// Provisioner counting calls; optionally rejects credentials
#[derive(Default)]
pub struct FakeProvisioner {
    pub applies: AtomicU32,
    pub destroys: AtomicU32,
    unauthorized: bool,
}

impl FakeProvisioner {
    pub fn unauthorized() -> Self {
        Self {
            unauthorized: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl InfraProvisioner for FakeProvisioner {
    async fn apply(&self, profile: &EnvironmentProfile) -> rollout_tools::Result<ResourceEndpoints> {
        self.applies.fetch_add(1, Ordering::SeqCst);
        if self.unauthorized {
            return Err(ToolError::Unauthorized("ExpiredToken".to_string()));
        }

        let mut values = BTreeMap::new();
        values.insert(
            "cluster_endpoint".to_string(),
            format!("https://{}.eks.local", profile.namespace),
        );
        values.insert(
            "ecr_repository_url".to_string(),
            "123456789012.dkr.ecr.us-west-2.amazonaws.com/devops-demo".to_string(),
        );
        Ok(ResourceEndpoints { values })
    }

    async fn destroy(&self, _profile: &EnvironmentProfile) -> rollout_tools::Result<()> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
