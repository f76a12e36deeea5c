//! Environment profile domain types
//!
//! A profile is the full parameter set that distinguishes a development run
//! from a production run. It is built once per run, validated, and then shared
//! read-only with every stage.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Deployment environment identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(ProfileError::UnknownEnvironment(other.to_string())),
        }
    }
}

/// Errors raised while building or validating a profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileError {
    UnknownEnvironment(String),
    Invalid(String),
}

impl fmt::Display for ProfileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileError::UnknownEnvironment(name) => {
                write!(f, "unknown environment '{}' (expected development or production)", name)
            }
            ProfileError::Invalid(msg) => write!(f, "invalid profile: {}", msg),
        }
    }
}

impl std::error::Error for ProfileError {}

/// Compute and replica sizing for an environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSizing {
    /// Instance class for cluster worker nodes (e.g., "t3.medium")
    pub node_instance_class: String,

    /// Number of worker nodes requested from the provisioner
    pub node_count: u32,

    /// Desired application replicas
    pub replicas: u32,

    /// Whether high-availability features (multi-AZ, PDB, HPA) are enabled
    pub high_availability: bool,
}

/// Data retention settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub backup_days: u32,
    pub log_days: u32,
}

/// Immutable per-environment configuration consumed by stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentProfile {
    pub environment: Environment,

    /// Kubernetes namespace the application is deployed into
    pub namespace: String,

    pub sizing: ResourceSizing,

    pub retention: RetentionPolicy,

    /// Guards against destroying the environment's infrastructure
    pub deletion_protection: bool,

    /// Container image repository (without tag)
    pub image_repository: String,

    pub image_tag: String,

    /// Port the application listens on inside the pod
    pub app_port: u16,
}

impl EnvironmentProfile {
    /// Default development profile: single small node, one replica, no HA
    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            namespace: "devops-demo-dev".to_string(),
            sizing: ResourceSizing {
                node_instance_class: "t3.medium".to_string(),
                node_count: 1,
                replicas: 1,
                high_availability: false,
            },
            retention: RetentionPolicy {
                backup_days: 1,
                log_days: 7,
            },
            deletion_protection: false,
            image_repository: "devops-demo".to_string(),
            image_tag: "dev".to_string(),
            app_port: 8000,
        }
    }

    /// Default production profile: HA, three replicas, long retention
    pub fn production() -> Self {
        Self {
            environment: Environment::Production,
            namespace: "devops-demo-prod".to_string(),
            sizing: ResourceSizing {
                node_instance_class: "m5.large".to_string(),
                node_count: 3,
                replicas: 3,
                high_availability: true,
            },
            retention: RetentionPolicy {
                backup_days: 30,
                log_days: 90,
            },
            deletion_protection: true,
            image_repository: "devops-demo".to_string(),
            image_tag: "latest".to_string(),
            app_port: 8000,
        }
    }

    /// Default profile for an environment
    pub fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Development => Self::development(),
            Environment::Production => Self::production(),
        }
    }

    /// Full image reference (`repository:tag`)
    pub fn image(&self) -> String {
        format!("{}:{}", self.image_repository, self.image_tag)
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Validates the profile
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.namespace.trim().is_empty() {
            return Err(ProfileError::Invalid("namespace cannot be empty".into()));
        }

        if self.sizing.replicas == 0 {
            return Err(ProfileError::Invalid("replicas must be at least 1".into()));
        }

        if self.sizing.node_count == 0 {
            return Err(ProfileError::Invalid("node_count must be at least 1".into()));
        }

        if self.app_port == 0 {
            return Err(ProfileError::Invalid(
                "app_port must be between 1 and 65535".into(),
            ));
        }

        if self.image_repository.is_empty() || self.image_tag.is_empty() {
            return Err(ProfileError::Invalid(
                "image repository and tag must be set".into(),
            ));
        }

        if self.sizing.high_availability && self.sizing.replicas < 2 {
            return Err(ProfileError::Invalid(
                "high availability requires at least 2 replicas".into(),
            ));
        }

        if self.is_production() {
            if !self.sizing.high_availability {
                return Err(ProfileError::Invalid(
                    "production must run with high availability enabled".into(),
                ));
            }
            if !self.deletion_protection {
                return Err(ProfileError::Invalid(
                    "production must keep deletion protection enabled".into(),
                ));
            }
        }

        Ok(())
    }
}
