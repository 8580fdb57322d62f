//! Composed deployment descriptor generation.
//!
//! Two renderings share the same serde structs:
//! - the local descriptor covers every service and may carry `build`
//!   sections (the local engine builds in place);
//! - the remote descriptor is restricted to one ssh target's services and
//!   references images only, since remote builds have already tagged
//!   `<service>:latest` by the time it is consumed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::stack::Stack;

/// Hidden directory holding generated artifacts, relative to the project dir.
pub const GENERATED_DIR: &str = ".deckhand";

#[derive(Debug, Serialize)]
struct ComposeFile {
    version: String,
    services: BTreeMap<String, ComposeService>,
}

#[derive(Debug, Default, Serialize)]
struct ComposeService {
    #[serde(skip_serializing_if = "Option::is_none")]
    build: Option<ComposeBuild>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ports: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    volumes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    command: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ComposeBuild {
    context: String,
    dockerfile: String,
}

pub fn compose_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(GENERATED_DIR).join("compose")
}

pub fn compose_file(project_dir: &Path) -> PathBuf {
    compose_dir(project_dir).join("docker-compose.yml")
}

/// Render the full descriptor for the local engine.
pub fn render_local(stack: &Stack) -> Result<String> {
    let mut services = BTreeMap::new();
    for (name, service) in &stack.services {
        let mut svc = ComposeService {
            environment: service.spec.env.clone(),
            ports: service.spec.ports.clone(),
            command: service.spec.command.clone(),
            depends_on: service.depends_on.clone(),
            ..Default::default()
        };

        if !service.spec.image.is_empty() {
            svc.image = Some(service.spec.image.clone());
        } else if !service.spec.build.is_empty() {
            // Build contexts are relative to the project directory, which is
            // what `--project-directory` points the engine at.
            svc.build = Some(ComposeBuild {
                context: service.spec.build.clone(),
                dockerfile: if service.spec.dockerfile.is_empty() {
                    "Dockerfile".to_string()
                } else {
                    service.spec.dockerfile.clone()
                },
            });
        }

        for vol in &service.spec.volumes {
            svc.volumes.push(format!("{}:{}", vol.host, vol.mount));
        }

        services.insert(name.clone(), svc);
    }

    let compose = ComposeFile {
        version: "3.8".to_string(),
        services,
    };
    serde_yaml::to_string(&compose).context("failed to serialize docker-compose.yml")
}

/// Render the minimal descriptor for one ssh target: only its services,
/// image references only.
pub fn render_remote(stack: &Stack, target_name: &str) -> Result<String> {
    let mut services = BTreeMap::new();
    for (name, service) in &stack.services {
        if !service.target.eq_ignore_ascii_case(target_name) {
            continue;
        }

        let image = if !service.spec.image.is_empty() {
            service.spec.image.trim().to_string()
        } else {
            format!("{name}:latest")
        };

        let mut svc = ComposeService {
            image: Some(image),
            environment: service.spec.env.clone(),
            ports: service.spec.ports.clone(),
            depends_on: service.depends_on.clone(),
            ..Default::default()
        };

        for vol in &service.spec.volumes {
            svc.volumes.push(format!("{}:{}", vol.host, vol.mount));
        }

        services.insert(name.clone(), svc);
    }

    let compose = ComposeFile {
        version: "3.9".to_string(),
        services,
    };
    serde_yaml::to_string(&compose).context("failed to serialize remote descriptor")
}

/// Write the local descriptor under `<project>/.deckhand/compose/` and
/// return its path.
pub fn write_local(stack: &Stack, project_dir: &Path) -> Result<PathBuf> {
    let content = render_local(stack)?;
    let dir = compose_dir(project_dir);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create compose directory {}", dir.display()))?;
    let path = compose_file(project_dir);
    std::fs::write(&path, content)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::test_fixtures;

    #[test]
    fn local_descriptor_contains_every_service() {
        let stack = test_fixtures::local_stack();
        let yaml = render_local(&stack).unwrap();
        assert!(yaml.contains("web:"));
        assert!(yaml.contains("db:"));
        assert!(yaml.contains("context: apps/web"));
        assert!(yaml.contains("postgres:16"));
        assert!(yaml.contains("8080:80"));
    }

    #[test]
    fn local_descriptor_prefers_image_over_build() {
        let stack = test_fixtures::local_stack();
        let yaml = render_local(&stack).unwrap();
        // db declares an image, so it must not get a build section
        let db_section = yaml.split("db:").nth(1).unwrap();
        let db_section = db_section.split("web:").next().unwrap();
        assert!(!db_section.contains("build:"));
    }

    #[test]
    fn remote_descriptor_is_restricted_to_target_services() {
        let mut stack = test_fixtures::remote_stack();
        // Add a local-only service that must not appear in the descriptor.
        stack.targets.insert(
            "local".into(),
            serde_yaml::from_str("{type: docker}").unwrap(),
        );
        stack.services.insert(
            "dev-proxy".into(),
            serde_yaml::from_str("{target: local, spec: {image: nginx}}").unwrap(),
        );

        let yaml = render_remote(&stack, "prod").unwrap();
        assert!(yaml.contains("web:"));
        assert!(yaml.contains("cache:"));
        assert!(!yaml.contains("dev-proxy"));
    }

    #[test]
    fn remote_descriptor_resolves_built_image_tags() {
        let stack = test_fixtures::remote_stack();
        let yaml = render_remote(&stack, "prod").unwrap();
        // web has only a build path, so it resolves to the build tag
        assert!(yaml.contains("web:latest"));
        // cache keeps its explicit image
        assert!(yaml.contains("redis:7"));
        // no build sections in the remote descriptor, ever
        assert!(!yaml.contains("build:"));
    }

    #[test]
    fn write_local_creates_hidden_compose_dir() {
        let dir = tempfile::tempdir().unwrap();
        let stack = test_fixtures::local_stack();
        let path = write_local(&stack, dir.path()).unwrap();
        assert!(path.exists());
        assert!(path.ends_with(".deckhand/compose/docker-compose.yml"));
    }
}
