//! Stage actions
//!
//! One action per pipeline stage. Each action owns the collaborators it
//! drives and reads everything else from the [`StageContext`](crate::context::StageContext).

pub mod backup;
pub mod build;
pub mod deploy;
pub mod manifests;
pub mod provision;
pub mod rollback;
pub mod test_image;
pub mod verify;

pub use backup::BackupRetentionStage;
pub use build::{BuildSources, BuildStage};
pub use deploy::DeployStage;
pub use manifests::{ManifestFile, discover_manifests};
pub use provision::ProvisionStage;
pub use rollback::RollbackStage;
pub use test_image::TestStage;
pub use verify::{HaVerifyStage, VerifyStage};
