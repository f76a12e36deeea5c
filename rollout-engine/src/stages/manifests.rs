//! Manifest discovery and ordering
//!
//! Manifests are applied in kind order so that everything a workload refers
//! to exists before the workload itself. Files of the same kind keep their
//! file name order.

use rollout_core::domain::profile::EnvironmentProfile;
use rollout_tools::cluster::render_manifest;
use rollout_tools::{ResourceRef, ResourceSpec};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::context::StageContext;

/// Apply order by lowercase kind; unknown kinds go last
pub const KIND_ORDER: &[&str] = &[
    "namespace",
    "configmap",
    "secret",
    "persistentvolumeclaim",
    "deployment",
    "service",
    "horizontalpodautoscaler",
    "poddisruptionbudget",
    "ingress",
    "cronjob",
];

pub fn kind_rank(kind: &str) -> usize {
    let kind = kind.to_lowercase();
    KIND_ORDER
        .iter()
        .position(|k| *k == kind)
        .unwrap_or(KIND_ORDER.len())
}

/// A manifest template on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestFile {
    /// Lowercase kind
    pub kind: String,
    /// `metadata.name`, possibly containing `${VAR}` placeholders
    pub name: String,
    pub path: PathBuf,
    /// This resource's document; `path` is read whole when unset
    pub template: Option<String>,
}

impl ManifestFile {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            kind: kind.into().to_lowercase(),
            name: name.into(),
            path: path.into(),
            template: None,
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind.eq_ignore_ascii_case(kind)
    }

    /// Resource this file creates once rendered with `variables`
    pub fn resource(&self, namespace: &str, variables: &BTreeMap<String, String>) -> ResourceRef {
        ResourceRef::new(
            self.kind.clone(),
            render_manifest(&self.name, variables),
            namespace,
        )
    }

    pub fn to_spec(&self, namespace: &str, variables: &BTreeMap<String, String>) -> ResourceSpec {
        ResourceSpec {
            resource: self.resource(namespace, variables),
            manifest: self.path.clone(),
            template: self.template.clone(),
            variables: variables.clone(),
        }
    }
}

/// Stable sort into apply order
pub fn order_manifests(files: &mut [ManifestFile]) {
    files.sort_by_key(|f| kind_rank(&f.kind));
}

#[derive(Debug, Deserialize)]
struct ManifestHeader {
    kind: String,
    metadata: ManifestMetadata,
}

#[derive(Debug, Deserialize)]
struct ManifestMetadata {
    name: String,
}

/// One YAML document of a manifest file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestDocument {
    pub kind: String,
    pub name: String,
    /// Raw document text, placeholders intact
    pub template: String,
}

/// Splits a manifest file on `---` separators, dropping empty documents
fn split_documents(text: &str) -> Vec<String> {
    let mut documents = vec![String::new()];
    for line in text.lines() {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed.starts_with("--- ") {
            documents.push(String::new());
            continue;
        }
        if let Some(current) = documents.last_mut() {
            current.push_str(line);
            current.push('\n');
        }
    }

    documents
        .into_iter()
        .filter(|doc| {
            doc.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with('#')
            })
        })
        .collect()
}

/// Reads `kind` and `metadata.name` from every document in `text`
///
/// Documents without both fields are skipped with a warning.
pub fn parse_manifest_documents(text: &str, origin: &Path) -> Vec<ManifestDocument> {
    split_documents(text)
        .into_iter()
        .enumerate()
        .filter_map(|(index, template)| {
            match serde_yaml::from_str::<ManifestHeader>(&template) {
                Ok(header) => Some(ManifestDocument {
                    kind: header.kind,
                    name: header.metadata.name,
                    template,
                }),
                Err(e) => {
                    warn!(
                        "Skipping document {} of {}: {}",
                        index,
                        origin.display(),
                        e
                    );
                    None
                }
            }
        })
        .collect()
}

/// Finds every `*.yaml` / `*.yml` manifest in `dir`, one entry per document, in apply order
pub fn discover_manifests(dir: &Path) -> io::Result<Vec<ManifestFile>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    paths.sort();

    let mut files = Vec::new();
    for path in paths {
        let text = fs::read_to_string(&path)?;
        for doc in parse_manifest_documents(&text, &path) {
            debug!("Found {} '{}' in {}", doc.kind, doc.name, path.display());
            files.push(ManifestFile::new(doc.kind, doc.name, path.clone()).with_template(doc.template));
        }
    }

    order_manifests(&mut files);
    Ok(files)
}

/// Values substituted into every manifest template
pub fn manifest_variables(ctx: &StageContext) -> BTreeMap<String, String> {
    manifest_variables_for(&ctx.profile, &ctx.image())
}

pub fn manifest_variables_for(profile: &EnvironmentProfile, image: &str) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    vars.insert("NAMESPACE".to_string(), profile.namespace.clone());
    vars.insert("ENVIRONMENT".to_string(), profile.environment.to_string());
    vars.insert("IMAGE".to_string(), image.to_string());
    vars.insert("IMAGE_TAG".to_string(), profile.image_tag.clone());
    vars.insert("REPLICAS".to_string(), profile.sizing.replicas.to_string());
    vars.insert("APP_PORT".to_string(), profile.app_port.to_string());
    vars.insert(
        "BACKUP_RETENTION_DAYS".to_string(),
        profile.retention.backup_days.to_string(),
    );
    vars.insert(
        "LOG_RETENTION_DAYS".to_string(),
        profile.retention.log_days.to_string(),
    );
    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::context;

    #[test]
    fn test_parse_header() {
        let text = "# app deployment\napiVersion: apps/v1\nkind: Deployment\nmetadata:\n  labels:\n    app: demo\n  name: devops-demo\n  namespace: ${NAMESPACE}\nspec:\n  replicas: ${REPLICAS}\n  template:\n    metadata:\n      name: ignored\n";
        let docs = parse_manifest_documents(text, Path::new("deployment.yaml"));
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].kind, "Deployment");
        assert_eq!(docs[0].name, "devops-demo");
        assert!(docs[0].template.contains("replicas: ${REPLICAS}"));

        assert!(parse_manifest_documents("kind: Service\n", Path::new("service.yaml")).is_empty());
    }

    #[test]
    fn test_each_document_keeps_its_own_name() {
        let text = "kind: Deployment\nmetadata:\n  name: web\n---\n# second\nkind: Service\nmetadata:\n  name: web-svc\n---\n";
        let docs = parse_manifest_documents(text, Path::new("app.yaml"));

        let pairs: Vec<(&str, &str)> = docs
            .iter()
            .map(|d| (d.kind.as_str(), d.name.as_str()))
            .collect();
        assert_eq!(pairs, vec![("Deployment", "web"), ("Service", "web-svc")]);
        assert!(!docs[0].template.contains("Service"));
        assert!(docs[1].template.contains("name: web-svc"));
    }

    #[test]
    fn test_quoted_kind_and_name() {
        let text = "kind: \"Deployment\"\nmetadata:\n  name: 'devops-demo'\n";
        let docs = parse_manifest_documents(text, Path::new("deployment.yaml"));
        let file = ManifestFile::new(docs[0].kind.clone(), docs[0].name.clone(), "deployment.yaml");

        assert!(file.is_kind("Deployment"));
        assert_eq!(file.name, "devops-demo");
    }

    #[test]
    fn test_nested_name_does_not_shadow_metadata_name() {
        let text = "kind: Deployment\nmetadata:\n  labels:\n    name: frontend\n  name: devops-demo\n";
        let docs = parse_manifest_documents(text, Path::new("deployment.yaml"));
        assert_eq!(docs[0].name, "devops-demo");
    }

    #[test]
    fn test_kind_order_is_stable() {
        let mut files = vec![
            ManifestFile::new("Ingress", "web", "ingress.yaml"),
            ManifestFile::new("Service", "b", "service-b.yaml"),
            ManifestFile::new("Deployment", "app", "deployment.yaml"),
            ManifestFile::new("CustomThing", "x", "custom.yaml"),
            ManifestFile::new("Service", "a", "service-a.yaml"),
            ManifestFile::new("Namespace", "${NAMESPACE}", "namespace.yaml"),
            ManifestFile::new("ConfigMap", "cfg", "configmap.yaml"),
        ];
        order_manifests(&mut files);

        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["${NAMESPACE}", "cfg", "app", "b", "a", "web", "x"]);
    }

    #[test]
    fn test_discover_manifests() {
        let dir = std::env::temp_dir().join(format!("rollout-k8s-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("01-service.yaml"),
            "kind: Service\nmetadata:\n  name: devops-demo\n",
        )
        .unwrap();
        fs::write(
            dir.join("00-deployment.yml"),
            "kind: Deployment\nmetadata:\n  name: devops-demo\n",
        )
        .unwrap();
        fs::write(
            dir.join("namespace.yaml"),
            "kind: Namespace\nmetadata:\n  name: ${NAMESPACE}\n",
        )
        .unwrap();
        fs::write(
            dir.join("02-backup.yaml"),
            "kind: ConfigMap\nmetadata:\n  name: backup-config\n---\nkind: CronJob\nmetadata:\n  name: backup\n",
        )
        .unwrap();
        fs::write(dir.join("README.md"), "not a manifest").unwrap();

        let files = discover_manifests(&dir).unwrap();
        let kinds: Vec<&str> = files.iter().map(|f| f.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec!["namespace", "configmap", "deployment", "service", "cronjob"]
        );

        let cronjob = files.iter().find(|f| f.is_kind("CronJob")).unwrap();
        assert_eq!(cronjob.name, "backup");
        let spec = cronjob.to_spec("devops-demo-prod", &BTreeMap::new());
        let template = spec.template.unwrap();
        assert!(template.contains("name: backup"));
        assert!(!template.contains("backup-config"));

        let service = files.iter().find(|f| f.is_kind("Service")).unwrap();
        assert_eq!(
            service.template.as_deref(),
            Some("kind: Service\nmetadata:\n  name: devops-demo\n")
        );

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_names_are_rendered() {
        let ctx = context();
        let vars = manifest_variables(&ctx);
        let ns = ManifestFile::new("Namespace", "${NAMESPACE}", "namespace.yaml");

        let spec = ns.to_spec(&ctx.profile.namespace, &vars);
        assert_eq!(spec.resource.name, "devops-demo-dev");
        assert_eq!(vars.get("REPLICAS").map(String::as_str), Some("1"));
        assert_eq!(vars.get("IMAGE").map(String::as_str), Some("devops-demo:dev"));
    }
}
