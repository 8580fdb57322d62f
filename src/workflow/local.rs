//! Local engine path: drive `docker compose` against the generated
//! descriptor, streaming subprocess output into the event stream.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::events::EventStream;
use crate::generate::compose;
use crate::stack::Stack;
use crate::workflow::runner::{DeploySummary, ensure_containers_running, extract_endpoints};

pub(crate) struct LocalEngine {
    project_dir: PathBuf,
}

impl LocalEngine {
    pub(crate) fn new(project_dir: &Path) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
        }
    }

    pub(crate) async fn build(&self, stream: &EventStream) -> Result<()> {
        let compose_file = compose::compose_file(&self.project_dir);
        if !compose_file.exists() {
            bail!("docker-compose.yml not found: {}", compose_file.display());
        }

        stream.info("Running docker compose build...");
        self.run_streamed(&["build"], "[build]", stream).await
    }

    pub(crate) async fn deploy(&self, stack: &Stack, stream: &EventStream) -> Result<DeploySummary> {
        stream.info("Running docker compose up -d...");
        self.run_streamed(&["up", "-d", "--build"], "[deploy]", stream)
            .await?;

        let container_count = match self.run_captured(&["ps", "-q"]).await {
            Ok(output) => count_ids(&output),
            Err(_) => 0,
        };

        Ok(DeploySummary {
            status: "success",
            service_count: stack.services.len(),
            container_count,
            compose_dir: Some(compose::compose_dir(&self.project_dir).display().to_string()),
            endpoints: extract_endpoints(stack, None),
        })
    }

    pub(crate) async fn health_check(&self, stream: &EventStream) -> Result<()> {
        // Grace period for containers to come up before we look.
        tokio::time::sleep(Duration::from_secs(2)).await;

        stream.info("Checking container status...");
        let status = self
            .run_captured(&["ps"])
            .await
            .context("failed to check container status")?;
        stream.info(status);

        let ids = self
            .run_captured(&["ps", "-q"])
            .await
            .context("failed to get container IDs")?;
        let count = ensure_containers_running(&ids)?;
        stream.info(format!("Found {count} running container(s)"));
        Ok(())
    }

    fn compose_command(&self, args: &[&str]) -> Command {
        let compose_file = compose::compose_file(&self.project_dir);
        let mut cmd = Command::new("docker");
        cmd.arg("compose")
            .arg("--project-directory")
            .arg(&self.project_dir)
            .arg("-f")
            .arg(&compose_file)
            .args(args)
            .current_dir(&self.project_dir);
        cmd
    }

    /// Run a compose subcommand, pumping stdout and stderr into the event
    /// stream line by line. Both reader tasks are joined before returning so
    /// the tail of the output is never lost; ordering across the two streams
    /// is not guaranteed, within each stream it is.
    async fn run_streamed(&self, args: &[&str], tag: &'static str, stream: &EventStream) -> Result<()> {
        let mut child = self
            .compose_command(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to start docker compose")?;

        let stdout_task = spawn_line_reader(child.stdout.take(), stream.clone(), tag);
        let stderr_task = spawn_line_reader(child.stderr.take(), stream.clone(), tag);

        let status = child
            .wait()
            .await
            .context("failed to wait for docker compose")?;

        let _ = stdout_task.await;
        let _ = stderr_task.await;

        if !status.success() {
            bail!("docker compose {} failed with {status}", args.join(" "));
        }
        Ok(())
    }

    async fn run_captured(&self, args: &[&str]) -> Result<String> {
        let output = self
            .compose_command(args)
            .output()
            .await
            .context("failed to run docker compose")?;
        if !output.status.success() {
            bail!(
                "docker compose {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn spawn_line_reader<R>(
    reader: Option<R>,
    stream: EventStream,
    tag: &'static str,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(reader) = reader else { return };
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            stream.info(format!("{tag} {line}"));
        }
    })
}

fn count_ids(output: &str) -> usize {
    output
        .trim()
        .lines()
        .filter(|line| !line.trim().is_empty())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_ids_handles_empty_and_padded_output() {
        assert_eq!(count_ids(""), 0);
        assert_eq!(count_ids("\n"), 0);
        assert_eq!(count_ids("abc123\n"), 1);
        assert_eq!(count_ids("abc123\ndef456\n"), 2);
    }

    #[tokio::test]
    async fn line_reader_drains_to_completion() {
        let data: &[u8] = b"first\nsecond\n";
        let stream = EventStream::new(false);
        let task = spawn_line_reader(Some(data), stream, "[test]");
        // Joining proves the reader terminates at EOF rather than hanging.
        task.await.unwrap();
    }
}
