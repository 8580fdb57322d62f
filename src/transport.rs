//! Remote execution primitive: run commands and copy files over the
//! system `ssh` and `scp` binaries.
//!
//! All operations block until the subprocess exits and are never retried;
//! failures surface immediately with the captured combined output attached.
//! Authentication is a single private-key identity. Host-key verification
//! is disabled on purpose: the tool's trust model is operator-controlled
//! hosts, and first-contact prompts would wedge unattended runs.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::errors::TransportError;
use crate::workflow::RemoteTarget;

/// Remote execution seam. Production code talks to `SshTransport`; tests
/// substitute fakes to observe command sequences without a network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run a command on the remote host, returning combined stdout+stderr.
    async fn run(&self, command: &str) -> Result<String, TransportError>;

    /// Copy a single local file to an absolute remote path.
    async fn upload_file(&self, local: &Path, remote_path: &str) -> Result<(), TransportError>;

    /// Copy a local directory to the remote host so that its basename lands
    /// under `remote_parent`. The parent is created first.
    async fn upload_dir(&self, local_dir: &Path, remote_parent: &str)
    -> Result<(), TransportError>;

    /// Upload in-memory content by staging it through a temporary file.
    /// The staging file is removed when this returns, on every exit path.
    async fn upload_bytes(&self, content: &[u8], remote_path: &str) -> Result<(), TransportError> {
        let staged = tempfile::NamedTempFile::new().map_err(TransportError::Stage)?;
        std::fs::write(staged.path(), content).map_err(TransportError::Stage)?;
        self.upload_file(staged.path(), remote_path).await
    }
}

pub struct SshTransport {
    host: String,
    user: String,
    key_path: PathBuf,
    port: u16,
}

impl SshTransport {
    pub fn new(target: &RemoteTarget) -> Self {
        Self {
            host: target.host.clone(),
            user: target.user.clone(),
            key_path: target.key_path.clone(),
            port: target.port,
        }
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn run(&self, command: &str) -> Result<String, TransportError> {
        debug!(host = %self.host, command, "running remote command");

        let mut cmd = Command::new("ssh");
        cmd.arg("-i")
            .arg(&self.key_path)
            .args(["-o", "StrictHostKeyChecking=no"]);
        if self.port != 22 {
            cmd.args(["-p", &self.port.to_string()]);
        }
        cmd.arg(self.destination()).arg(command);

        let output = cmd.output().await.map_err(|source| TransportError::Spawn {
            program: "ssh",
            source,
        })?;

        let combined = combine(&output.stdout, &output.stderr);
        if !output.status.success() {
            return Err(TransportError::CommandFailed {
                command: command.to_string(),
                output: combined,
            });
        }
        Ok(combined)
    }

    async fn upload_file(&self, local: &Path, remote_path: &str) -> Result<(), TransportError> {
        debug!(host = %self.host, local = %local.display(), remote_path, "uploading file");
        self.scp(local, remote_path, false).await
    }

    async fn upload_dir(
        &self,
        local_dir: &Path,
        remote_parent: &str,
    ) -> Result<(), TransportError> {
        debug!(host = %self.host, local = %local_dir.display(), remote_parent, "uploading directory");
        self.run(&format!("mkdir -p {remote_parent}")).await?;
        self.scp(local_dir, remote_parent, true).await
    }
}

impl SshTransport {
    async fn scp(
        &self,
        local: &Path,
        remote: &str,
        recursive: bool,
    ) -> Result<(), TransportError> {
        let mut cmd = Command::new("scp");
        cmd.arg("-i")
            .arg(&self.key_path)
            .args(["-o", "StrictHostKeyChecking=no"]);
        if self.port != 22 {
            cmd.args(["-P", &self.port.to_string()]);
        }
        if recursive {
            cmd.arg("-r");
        }
        cmd.arg(local)
            .arg(format!("{}:{}", self.destination(), remote));

        let output = cmd.output().await.map_err(|source| TransportError::Spawn {
            program: "scp",
            source,
        })?;

        if !output.status.success() {
            return Err(TransportError::UploadFailed {
                path: local.to_path_buf(),
                output: combine(&output.stdout, &output.stderr),
            });
        }
        Ok(())
    }
}

fn combine(stdout: &[u8], stderr: &[u8]) -> String {
    let mut out = String::from_utf8_lossy(stdout).into_owned();
    let err = String::from_utf8_lossy(stderr);
    if !err.is_empty() {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&err);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_joins_streams_with_newline() {
        assert_eq!(combine(b"out", b"err"), "out\nerr");
        assert_eq!(combine(b"out\n", b"err"), "out\nerr");
        assert_eq!(combine(b"", b"err"), "err");
        assert_eq!(combine(b"out", b""), "out");
    }
}
