//! The workflow runner: Preflight → Generate → Build → Deploy → HealthCheck.
//!
//! Any phase error aborts the run immediately, wrapped with the phase name.
//! There is no rollback of work already done; partial side effects stay in
//! place for the operator to inspect.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;

use crate::errors::StackError;
use crate::events::EventStream;
use crate::generate::{compose, dockerfile};
use crate::stack::{Stack, TargetKind};
use crate::workflow::local::LocalEngine;
use crate::workflow::remote::RemoteDeployer;

/// Marker prefixing the single machine-readable result line on stdout.
pub const OUTPUTS_MARKER: &str = "__OUTPUTS__";

/// Port reported for a service with no (or an unparseable) `ports` entry.
pub const DEFAULT_ENDPOINT_PORT: u16 = 8080;

/// Where this run deploys to, decided exactly once at runner construction.
///
/// Every later dispatch matches on this enum; nothing re-scans the target
/// map mid-run.
#[derive(Debug, Clone)]
pub enum ResolvedTarget {
    Local,
    Remote(RemoteTarget),
}

/// A validated, fully-resolved SSH target.
#[derive(Debug, Clone)]
pub struct RemoteTarget {
    pub name: String,
    pub host: String,
    pub user: String,
    pub key_path: PathBuf,
    pub port: u16,
    /// Resolved once; defaults to `/home/<user>/<stack-name>` when the
    /// stack leaves it empty.
    pub workdir: String,
}

impl ResolvedTarget {
    /// Pick the run's target: the first `ssh` target wins, otherwise the
    /// local engine. An ssh target missing host/user/sshKey is a
    /// configuration error here, not later.
    pub fn resolve(stack: &Stack) -> Result<Self, StackError> {
        for (name, target) in &stack.targets {
            if target.kind != TargetKind::Ssh {
                continue;
            }
            if target.host.is_empty() || target.user.is_empty() || target.ssh_key.is_empty() {
                return Err(StackError::IncompleteRemoteTarget {
                    target: name.clone(),
                });
            }
            let workdir = if target.workdir.is_empty() {
                format!("/home/{}/{}", target.user, stack.name)
            } else {
                target.workdir.clone()
            };
            return Ok(ResolvedTarget::Remote(RemoteTarget {
                name: name.clone(),
                host: target.host.clone(),
                user: target.user.clone(),
                key_path: PathBuf::from(&target.ssh_key),
                port: target.port.unwrap_or(22),
                workdir,
            }));
        }
        Ok(ResolvedTarget::Local)
    }
}

/// Reported reachability of one deployed service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Endpoint {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// The machine-readable deploy result, emitted as one
/// `__OUTPUTS__{...}` line for a supervising process to parse.
#[derive(Debug, Serialize)]
pub struct DeploySummary {
    pub status: &'static str,
    pub service_count: usize,
    pub container_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compose_dir: Option<String>,
    pub endpoints: Vec<Endpoint>,
}

pub struct Runner {
    stack: Stack,
    project_dir: PathBuf,
    target: ResolvedTarget,
}

impl Runner {
    pub fn new(stack: Stack, project_dir: PathBuf) -> Result<Self, StackError> {
        let target = ResolvedTarget::resolve(&stack)?;
        Ok(Self {
            stack,
            project_dir,
            target,
        })
    }

    pub fn target(&self) -> &ResolvedTarget {
        &self.target
    }

    /// Run all five phases in order, streaming progress to `stream`.
    pub async fn execute(&self, stream: &EventStream) -> Result<()> {
        stream.info("Phase 1/5: Preflight checks...");
        self.preflight(stream).context("preflight check failed")?;
        stream.success("Preflight checks passed");

        stream.info("Phase 2/5: Generating deployment files...");
        self.generate(stream).context("generate failed")?;
        stream.success("Deployment files generated");

        stream.info("Phase 3/5: Building images...");
        self.build(stream).await.context("build failed")?;
        stream.success("Images built successfully");

        stream.info("Phase 4/5: Deploying containers...");
        self.deploy(stream).await.context("deploy failed")?;
        stream.success("Containers deployed");

        stream.info("Phase 5/5: Health checks...");
        self.health_check(stream).await.context("health check failed")?;
        stream.success("All services healthy");

        Ok(())
    }

    /// Ensure the secrets placeholder exists and required binaries resolve.
    fn preflight(&self, stream: &EventStream) -> Result<()> {
        self.ensure_secrets_placeholder(stream)?;

        match &self.target {
            ResolvedTarget::Local => {
                which::which("docker")
                    .map_err(|_| anyhow::anyhow!("docker not found in PATH"))?;
                stream.info("Docker is available");
            }
            ResolvedTarget::Remote(_) => {
                which::which("ssh").map_err(|_| anyhow::anyhow!("ssh not found in PATH"))?;
                which::which("scp").map_err(|_| anyhow::anyhow!("scp not found in PATH"))?;
                stream.info("ssh/scp are available");
            }
        }

        Ok(())
    }

    /// Create `.env` with a `CHANGE_ME` line per declared secret. An
    /// existing file is left untouched so operator-filled values survive
    /// repeated runs.
    fn ensure_secrets_placeholder(&self, stream: &EventStream) -> Result<()> {
        let env_path = self.project_dir.join(".env");
        if env_path.exists() {
            return Ok(());
        }
        let mut content = String::new();
        for key in &self.stack.secrets {
            content.push_str(&format!("{key}=CHANGE_ME\n"));
        }
        write_private(&env_path, &content)
            .with_context(|| format!("failed to create {}", env_path.display()))?;
        stream.info("Created .env file with placeholder values");
        Ok(())
    }

    /// Write the composed descriptor and any missing Dockerfiles. Always
    /// runs locally; remote delivery happens in later phases.
    fn generate(&self, stream: &EventStream) -> Result<()> {
        stream.info("Generating docker-compose.yml...");
        compose::write_local(&self.stack, &self.project_dir)?;
        stream.success(format!(
            "Generated docker-compose.yml for {} services",
            self.stack.services.len()
        ));

        stream.info("Generating Dockerfiles...");
        let mut generated = 0;
        for (name, service) in &self.stack.services {
            if service.spec.build.is_empty() {
                continue;
            }
            stream.info(format!(
                "Detecting build kind for service '{name}' at path: {}",
                service.spec.build
            ));
            let kind = match dockerfile::detect(&self.project_dir, &service.spec.build) {
                Ok(kind) => kind,
                Err(e) => {
                    stream.warning(format!("Could not detect build kind for '{name}': {e}"));
                    continue;
                }
            };
            stream.info(format!("Detected build kind: {kind}"));

            if dockerfile::write(&self.project_dir, &service.spec.build, kind)? {
                stream.success(format!(
                    "Generated Dockerfile for '{name}' ({kind}) at {}/Dockerfile",
                    service.spec.build
                ));
                generated += 1;
            }
        }
        if generated > 0 {
            stream.success(format!("Generated {generated} Dockerfile(s)"));
        }

        Ok(())
    }

    async fn build(&self, stream: &EventStream) -> Result<()> {
        match &self.target {
            ResolvedTarget::Local => LocalEngine::new(&self.project_dir).build(stream).await,
            ResolvedTarget::Remote(target) => {
                RemoteDeployer::new(&self.stack, &self.project_dir, target)
                    .build(stream)
                    .await
            }
        }
    }

    async fn deploy(&self, stream: &EventStream) -> Result<()> {
        let summary = match &self.target {
            ResolvedTarget::Local => {
                LocalEngine::new(&self.project_dir)
                    .deploy(&self.stack, stream)
                    .await?
            }
            ResolvedTarget::Remote(target) => {
                RemoteDeployer::new(&self.stack, &self.project_dir, target)
                    .deploy(stream)
                    .await?
            }
        };

        let json = serde_json::to_string(&summary).context("failed to serialize outputs")?;
        println!("\n{OUTPUTS_MARKER}{json}");

        stream.success(format!(
            "Deployment completed! Services: {}, Containers: {}",
            summary.service_count, summary.container_count
        ));
        Ok(())
    }

    async fn health_check(&self, stream: &EventStream) -> Result<()> {
        match &self.target {
            ResolvedTarget::Local => LocalEngine::new(&self.project_dir).health_check(stream).await,
            ResolvedTarget::Remote(target) => {
                RemoteDeployer::new(&self.stack, &self.project_dir, target)
                    .health_check(stream)
                    .await
            }
        }
    }
}

fn write_private(path: &Path, content: &str) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(path)?;
        file.write_all(content.as_bytes())
    }
    #[cfg(not(unix))]
    {
        std::fs::write(path, content)
    }
}

/// Extract the reported host port from a service's `ports` list: the first
/// entry, substring before the first `:` when present, otherwise the whole
/// entry. Absent or unparseable entries fall back to the constant default,
/// never to state left over from another service.
pub(crate) fn host_port(ports: &[String]) -> u16 {
    let Some(entry) = ports.first() else {
        return DEFAULT_ENDPOINT_PORT;
    };
    let candidate = match entry.find(':') {
        Some(idx) => &entry[..idx],
        None => entry.as_str(),
    };
    candidate.trim().parse().unwrap_or(DEFAULT_ENDPOINT_PORT)
}

/// Build the endpoint list for every service. `remote_host` switches the
/// rendered URLs from localhost to the deployment host.
pub(crate) fn extract_endpoints(stack: &Stack, remote_host: Option<&str>) -> Vec<Endpoint> {
    stack
        .services
        .iter()
        .map(|(name, service)| {
            let port = host_port(&service.spec.ports);
            let url = match remote_host {
                Some(host) => format!("http://{host}:{port}"),
                None => format!("http://localhost:{port}"),
            };
            Endpoint {
                name: name.clone(),
                url,
                kind: "service".to_string(),
            }
        })
        .collect()
}

/// Shared by both health-check paths.
pub(crate) fn ensure_containers_running(ids_output: &str) -> Result<usize> {
    let count = ids_output.trim().lines().filter(|l| !l.trim().is_empty()).count();
    if count == 0 {
        bail!("no containers are running");
    }
    Ok(count)
}
