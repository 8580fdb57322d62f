//! Stack model: the declarative description of one deployment run.
//!
//! A stack file maps names to targets (where to deploy) and services (what to
//! deploy). The model is loaded once per invocation and immutable afterwards.

mod validate;

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::errors::StackError;

/// Top-level stack description, deserialized from `stack.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Stack {
    #[serde(rename = "apiVersion", default)]
    pub api_version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub targets: BTreeMap<String, Target>,
    #[serde(default)]
    pub secrets: Vec<String>,
    #[serde(default)]
    pub services: BTreeMap<String, Service>,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

/// Deployment destination discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TargetKind {
    /// Local Docker engine.
    #[serde(rename = "docker")]
    Docker,
    /// Remote host reached over SSH.
    #[serde(rename = "ssh")]
    Ssh,
}

/// A named deployment destination.
///
/// The SSH fields are optional at parse time; completeness is enforced when
/// a run actually resolves an `Ssh` target.
#[derive(Debug, Clone, Deserialize)]
pub struct Target {
    #[serde(rename = "type")]
    pub kind: TargetKind,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub user: String,
    #[serde(rename = "sshKey", default)]
    pub ssh_key: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub workdir: String,
}

/// One deployable unit.
#[derive(Debug, Clone, Deserialize)]
pub struct Service {
    /// Currently only "container" is handled.
    #[serde(default)]
    pub kind: String,
    pub target: String,
    pub spec: ServiceSpec,
    #[serde(rename = "dependsOn", default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceSpec {
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub build: String,
    #[serde(default)]
    pub dockerfile: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// `"hostPort:containerPort"` or bare `"port"` entries.
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub health: Option<Health>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Volume {
    pub host: String,
    pub mount: String,
}

/// Declared health probe. Carried in the model; probing itself is the
/// container engine's job.
#[derive(Debug, Clone, Deserialize)]
pub struct Health {
    #[serde(rename = "httpGet", default)]
    pub http_get: Option<HttpGet>,
    #[serde(default)]
    pub tcp: Option<Tcp>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpGet {
    pub path: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tcp {
    pub port: u16,
}

impl Stack {
    /// Load and validate a stack file.
    pub fn load(path: &Path) -> Result<Self, StackError> {
        let data = std::fs::read_to_string(path).map_err(|source| StackError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let stack: Stack = serde_yaml::from_str(&data)?;
        stack.validate()?;
        Ok(stack)
    }

    /// Parse without touching the filesystem. Used by tests and callers that
    /// already hold the bytes.
    pub fn parse(data: &str) -> Result<Self, StackError> {
        let stack: Stack = serde_yaml::from_str(data)?;
        stack.validate()?;
        Ok(stack)
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;

    pub const LOCAL_STACK: &str = r#"
apiVersion: v1
name: demo
targets:
  local:
    type: docker
services:
  web:
    kind: container
    target: local
    spec:
      build: apps/web
      ports: ["8080:80"]
  db:
    kind: container
    target: local
    spec:
      image: postgres:16
      env:
        POSTGRES_PASSWORD: secret
secrets:
  - POSTGRES_PASSWORD
"#;

    pub const REMOTE_STACK: &str = r#"
apiVersion: v1
name: demo
targets:
  prod:
    type: ssh
    host: 1.2.3.4
    user: ubuntu
    sshKey: /keys/prod.pem
services:
  web:
    kind: container
    target: prod
    spec:
      build: apps/web
      ports: ["8080:80"]
  cache:
    kind: container
    target: prod
    spec:
      image: redis:7
"#;

    pub fn local_stack() -> Stack {
        Stack::parse(LOCAL_STACK).unwrap()
    }

    pub fn remote_stack() -> Stack {
        Stack::parse(REMOTE_STACK).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_local_stack() {
        let stack = test_fixtures::local_stack();
        assert_eq!(stack.name, "demo");
        assert_eq!(stack.targets["local"].kind, TargetKind::Docker);
        assert_eq!(stack.services["web"].spec.build, "apps/web");
        assert_eq!(stack.services["db"].spec.image, "postgres:16");
        assert_eq!(stack.secrets, vec!["POSTGRES_PASSWORD"]);
    }

    #[test]
    fn parses_remote_target_fields() {
        let stack = test_fixtures::remote_stack();
        let prod = &stack.targets["prod"];
        assert_eq!(prod.kind, TargetKind::Ssh);
        assert_eq!(prod.host, "1.2.3.4");
        assert_eq!(prod.user, "ubuntu");
        assert_eq!(prod.ssh_key, "/keys/prod.pem");
        assert!(prod.workdir.is_empty());
    }

    #[test]
    fn rejects_unknown_target_kind() {
        let yaml = r#"
apiVersion: v1
name: demo
targets:
  cluster:
    type: k8s
services:
  web:
    target: cluster
    spec:
      image: nginx
"#;
        assert!(Stack::parse(yaml).is_err());
    }
}
