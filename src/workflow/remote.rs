//! Remote path: bootstrap Docker over SSH, synchronize artifacts, run
//! remote builds, and bring the stack up on the target host.
//!
//! Every remote step runs sequentially: bootstrap, mkdir, uploads, builds
//! and deploy all mutate shared remote state in an order-dependent way, so
//! no two remote commands ever run concurrently within one run.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::events::EventStream;
use crate::generate::compose;
use crate::stack::{Service, Stack};
use crate::transport::{SshTransport, Transport};
use crate::workflow::runner::{
    DeploySummary, RemoteTarget, ensure_containers_running, extract_endpoints,
};

/// Probe for a usable engine; must print a docker path on success.
const DOCKER_PROBE: &str = "command -v docker && docker compose version";

/// One-shot, OS-family-conditional install. Known package managers only;
/// anything else fails the phase.
const DOCKER_INSTALL_SCRIPT: &str = r#"
if command -v yum &> /dev/null; then
    echo "Detected yum-based distribution"
    sudo yum update -y
    sudo yum install -y docker
    sudo systemctl start docker
    sudo systemctl enable docker
    sudo usermod -aG docker $USER

    sudo mkdir -p /usr/local/lib/docker/cli-plugins
    sudo curl -SL https://github.com/docker/compose/releases/latest/download/docker-compose-linux-x86_64 -o /usr/local/lib/docker/cli-plugins/docker-compose
    sudo chmod +x /usr/local/lib/docker/cli-plugins/docker-compose
elif command -v apt-get &> /dev/null; then
    echo "Detected apt-based distribution"
    sudo apt-get update
    sudo apt-get install -y docker.io docker-compose-v2
    sudo systemctl start docker
    sudo systemctl enable docker
    sudo usermod -aG docker $USER
else
    echo "Unsupported OS family"
    exit 1
fi
"#;

pub(crate) struct RemoteDeployer<'a, T: Transport = SshTransport> {
    stack: &'a Stack,
    project_dir: &'a Path,
    target: &'a RemoteTarget,
    transport: T,
}

impl<'a> RemoteDeployer<'a, SshTransport> {
    pub(crate) fn new(stack: &'a Stack, project_dir: &'a Path, target: &'a RemoteTarget) -> Self {
        Self::with_transport(stack, project_dir, target, SshTransport::new(target))
    }
}

impl<'a, T: Transport> RemoteDeployer<'a, T> {
    pub(crate) fn with_transport(
        stack: &'a Stack,
        project_dir: &'a Path,
        target: &'a RemoteTarget,
        transport: T,
    ) -> Self {
        Self {
            stack,
            project_dir,
            target,
            transport,
        }
    }

    pub(crate) async fn build(&self, stream: &EventStream) -> Result<()> {
        stream.info(format!(
            "Checking Docker installation on {}...",
            self.target.host
        ));
        self.ensure_docker(stream).await?;

        self.transport
            .run(&format!("mkdir -p {}", self.target.workdir))
            .await
            .context("failed to prepare remote working directory")?;

        stream.info("Uploading application sources...");
        self.upload_sources(stream).await?;

        let to_build: Vec<(&String, &Service)> = self
            .remote_services()
            .filter(|(_, svc)| svc.spec.image.trim().is_empty() && !svc.spec.build.is_empty())
            .collect();

        if !to_build.is_empty() {
            stream.info(format!(
                "Building {} service(s) on {}...",
                to_build.len(),
                self.target.host
            ));
            for (i, (name, service)) in to_build.iter().enumerate() {
                let tag = format!("{name}:latest");
                stream.info(format!("[{}/{}] Building {name}...", i + 1, to_build.len()));
                self.build_image(&service.spec.build, &service.spec.dockerfile, &tag)
                    .await
                    .with_context(|| format!("failed to build {name}"))?;
                stream.success(format!("Built {name} successfully"));
            }
        }

        Ok(())
    }

    pub(crate) async fn deploy(&self, stream: &EventStream) -> Result<DeploySummary> {
        let descriptor = compose::render_remote(self.stack, &self.target.name)?;

        stream.info("Uploading deployment descriptor...");
        let remote_compose = format!("{}/docker-compose.yaml", self.target.workdir);
        self.transport
            .upload_bytes(descriptor.as_bytes(), &remote_compose)
            .await
            .context("failed to upload deployment descriptor")?;

        let env_path = self.project_dir.join(".env");
        if env_path.exists() {
            self.transport
                .upload_file(&env_path, &format!("{}/.env", self.target.workdir))
                .await
                .context("failed to upload .env")?;
        }
        stream.success("Configuration files uploaded");

        stream.info("Uploading volume sources...");
        self.upload_volumes(stream).await?;

        stream.info(format!("Starting services on {}...", self.target.host));
        let up = format!(
            "cd {} && docker compose -f docker-compose.yaml up -d",
            self.target.workdir
        );
        self.transport
            .run(&up)
            .await
            .context("docker compose up failed")?;

        let count_cmd = format!(
            "cd {} && docker compose -f docker-compose.yaml ps -q | wc -l",
            self.target.workdir
        );
        let container_count = match self.transport.run(&count_cmd).await {
            Ok(output) => output.trim().parse().unwrap_or(0),
            Err(_) => 0,
        };

        Ok(DeploySummary {
            status: "success",
            service_count: self.stack.services.len(),
            container_count,
            compose_dir: None,
            endpoints: extract_endpoints(self.stack, Some(&self.target.host)),
        })
    }

    pub(crate) async fn health_check(&self, stream: &EventStream) -> Result<()> {
        tokio::time::sleep(Duration::from_secs(2)).await;

        stream.info(format!(
            "Checking container status on {}...",
            self.target.host
        ));
        let ps = format!(
            "cd {} && docker compose -f docker-compose.yaml ps",
            self.target.workdir
        );
        let output = self
            .transport
            .run(&ps)
            .await
            .context("failed to check container status")?;
        stream.info(output);

        let ps_q = format!(
            "cd {} && docker compose -f docker-compose.yaml ps -q",
            self.target.workdir
        );
        let ids = self
            .transport
            .run(&ps_q)
            .await
            .context("failed to get container IDs")?;
        let count = ensure_containers_running(&ids)?;
        stream.success(format!("Found {count} running container(s)"));
        Ok(())
    }

    /// Install Docker only when the probe says it is missing; a present
    /// engine means zero install invocations.
    async fn ensure_docker(&self, stream: &EventStream) -> Result<()> {
        if let Ok(output) = self.transport.run(DOCKER_PROBE).await {
            if output.contains("docker") {
                stream.info("Docker is already installed");
                return Ok(());
            }
        }

        stream.info("Docker not found, installing...");
        self.transport
            .run(DOCKER_INSTALL_SCRIPT)
            .await
            .context("failed to install Docker on remote host")?;
        stream.success("Docker installed successfully");
        Ok(())
    }

    fn remote_services(&self) -> impl Iterator<Item = (&'a String, &'a Service)> {
        let target_name = self.target.name.as_str();
        self.stack
            .services
            .iter()
            .filter(move |(_, svc)| svc.target.eq_ignore_ascii_case(target_name))
    }

    /// Upload each distinct source tree referenced by a remote service's
    /// `build` path. A missing local tree is a warning, not a failure.
    async fn upload_sources(&self, stream: &EventStream) -> Result<()> {
        let roots: BTreeSet<&str> = self
            .remote_services()
            .filter(|(_, svc)| !svc.spec.build.is_empty())
            .map(|(_, svc)| svc.spec.build.as_str())
            .collect();

        for root in roots {
            let rel = root.trim_start_matches("./");
            let local = self.project_dir.join(rel);
            if !local.exists() {
                stream.warning(format!("No source tree at {root}, skipping"));
                continue;
            }
            let parent = remote_parent(&self.target.workdir, rel);
            self.transport
                .upload_dir(&local, &parent)
                .await
                .with_context(|| format!("failed to upload source tree {root}"))?;
            stream.success(format!("Uploaded {root}"));
        }
        Ok(())
    }

    /// Upload every declared volume source so remote paths mirror the
    /// declared relative host paths. Directories copy recursively; single
    /// files need their remote parent created first.
    async fn upload_volumes(&self, stream: &EventStream) -> Result<()> {
        for (_, service) in &self.stack.services {
            for vol in &service.spec.volumes {
                let rel = vol.host.trim_start_matches("./");
                let local = self.project_dir.join(rel);
                let Ok(metadata) = std::fs::metadata(&local) else {
                    stream.warning(format!("Volume not found: {}", vol.host));
                    continue;
                };

                let parent = remote_parent(&self.target.workdir, rel);
                if metadata.is_dir() {
                    self.transport
                        .upload_dir(&local, &parent)
                        .await
                        .with_context(|| format!("failed to upload volume dir {}", vol.host))?;
                } else {
                    self.transport
                        .run(&format!("mkdir -p {parent}"))
                        .await
                        .with_context(|| {
                            format!("failed to create remote directory for {}", vol.host)
                        })?;
                    let remote_path = format!("{}/{rel}", self.target.workdir);
                    self.transport
                        .upload_file(&local, &remote_path)
                        .await
                        .with_context(|| format!("failed to upload volume file {}", vol.host))?;
                }
                stream.info(format!("Uploaded volume: {}", vol.host));
            }
        }
        Ok(())
    }

    async fn build_image(&self, build_path: &str, dockerfile: &str, tag: &str) -> Result<()> {
        let context_dir = format!("{}/{}", self.target.workdir, build_path.trim_start_matches("./"));
        let dockerfile = if dockerfile.is_empty() {
            "Dockerfile"
        } else {
            dockerfile
        };
        let command =
            format!("cd {context_dir} && docker buildx build --load -t {tag} -f {dockerfile} .");
        self.transport.run(&command).await?;
        Ok(())
    }
}

/// Remote directory that a relative path's parent maps to under the workdir.
fn remote_parent(workdir: &str, rel: &str) -> String {
    match rel.rfind('/') {
        Some(idx) if idx > 0 => format!("{workdir}/{}", &rel[..idx]),
        _ => workdir.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::errors::TransportError;
    use crate::stack::test_fixtures;
    use crate::workflow::runner::ResolvedTarget;

    struct FakeTransport {
        commands: Mutex<Vec<String>>,
        docker_present: bool,
    }

    impl FakeTransport {
        fn new(docker_present: bool) -> Self {
            Self {
                commands: Mutex::new(Vec::new()),
                docker_present,
            }
        }

        fn commands(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn run(&self, command: &str) -> Result<String, TransportError> {
            self.commands.lock().unwrap().push(command.to_string());
            if command == DOCKER_PROBE {
                if self.docker_present {
                    return Ok("/usr/bin/docker\nDocker Compose version v2.24".to_string());
                }
                return Err(TransportError::CommandFailed {
                    command: command.to_string(),
                    output: String::new(),
                });
            }
            Ok(String::new())
        }

        async fn upload_file(
            &self,
            _local: &std::path::Path,
            remote_path: &str,
        ) -> Result<(), TransportError> {
            self.commands
                .lock()
                .unwrap()
                .push(format!("upload_file -> {remote_path}"));
            Ok(())
        }

        async fn upload_dir(
            &self,
            _local_dir: &std::path::Path,
            remote_parent: &str,
        ) -> Result<(), TransportError> {
            self.commands
                .lock()
                .unwrap()
                .push(format!("upload_dir -> {remote_parent}"));
            Ok(())
        }
    }

    fn remote_target(stack: &Stack) -> RemoteTarget {
        match ResolvedTarget::resolve(stack).unwrap() {
            ResolvedTarget::Remote(target) => target,
            ResolvedTarget::Local => panic!("fixture must resolve to a remote target"),
        }
    }

    #[tokio::test]
    async fn bootstrap_skips_install_when_probe_finds_docker() {
        let stack = test_fixtures::remote_stack();
        let target = remote_target(&stack);
        let dir = tempfile::tempdir().unwrap();
        let deployer =
            RemoteDeployer::with_transport(&stack, dir.path(), &target, FakeTransport::new(true));
        let stream = EventStream::new(false);

        deployer.ensure_docker(&stream).await.unwrap();

        let commands = deployer.transport.commands();
        assert_eq!(commands, vec![DOCKER_PROBE.to_string()]);
    }

    #[tokio::test]
    async fn bootstrap_installs_exactly_once_when_docker_is_missing() {
        let stack = test_fixtures::remote_stack();
        let target = remote_target(&stack);
        let dir = tempfile::tempdir().unwrap();
        let deployer =
            RemoteDeployer::with_transport(&stack, dir.path(), &target, FakeTransport::new(false));
        let stream = EventStream::new(false);

        deployer.ensure_docker(&stream).await.unwrap();

        let commands = deployer.transport.commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0], DOCKER_PROBE);
        assert!(commands[1].contains("apt-get"));
    }

    #[tokio::test]
    async fn build_tags_only_remote_services_without_an_image() {
        let stack = test_fixtures::remote_stack();
        let target = remote_target(&stack);
        let dir = tempfile::tempdir().unwrap();
        // Provide the web source tree so the upload step finds it.
        std::fs::create_dir_all(dir.path().join("apps/web")).unwrap();
        let deployer =
            RemoteDeployer::with_transport(&stack, dir.path(), &target, FakeTransport::new(true));
        let stream = EventStream::new(false);

        deployer.build(&stream).await.unwrap();

        let commands = deployer.transport.commands();
        let builds: Vec<_> = commands.iter().filter(|c| c.contains("buildx build")).collect();
        assert_eq!(builds.len(), 1);
        assert!(builds[0].contains("-t web:latest"));
        assert!(builds[0].contains("/home/ubuntu/demo/apps/web"));
        // cache has an explicit image and must not be built
        assert!(!commands.iter().any(|c| c.contains("cache:latest")));
        // source tree goes under the mirrored parent
        assert!(
            commands
                .iter()
                .any(|c| c == "upload_dir -> /home/ubuntu/demo/apps")
        );
    }

    #[tokio::test]
    async fn deploy_uploads_descriptor_and_reports_remote_endpoints() {
        let stack = test_fixtures::remote_stack();
        let target = remote_target(&stack);
        let dir = tempfile::tempdir().unwrap();
        let deployer =
            RemoteDeployer::with_transport(&stack, dir.path(), &target, FakeTransport::new(true));
        let stream = EventStream::new(false);

        let summary = deployer.deploy(&stream).await.unwrap();

        assert_eq!(summary.status, "success");
        assert_eq!(summary.service_count, 2);
        assert!(summary.compose_dir.is_none());
        let web = summary.endpoints.iter().find(|e| e.name == "web").unwrap();
        assert_eq!(web.url, "http://1.2.3.4:8080");

        let commands = deployer.transport.commands();
        assert!(
            commands
                .iter()
                .any(|c| c == "upload_file -> /home/ubuntu/demo/docker-compose.yaml")
        );
        assert!(
            commands
                .iter()
                .any(|c| c.contains("docker compose -f docker-compose.yaml up -d"))
        );
    }

    #[test]
    fn remote_parent_mirrors_nested_paths() {
        assert_eq!(remote_parent("/opt/app", "config"), "/opt/app");
        assert_eq!(remote_parent("/opt/app", "apps/web"), "/opt/app/apps");
        assert_eq!(
            remote_parent("/opt/app", "data/certs/tls.pem"),
            "/opt/app/data/certs"
        );
    }

    #[test]
    fn install_script_covers_both_package_managers_and_fails_otherwise() {
        assert!(DOCKER_INSTALL_SCRIPT.contains("yum"));
        assert!(DOCKER_INSTALL_SCRIPT.contains("apt-get"));
        assert!(DOCKER_INSTALL_SCRIPT.contains("exit 1"));
    }
}
