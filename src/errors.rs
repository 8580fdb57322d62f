//! Typed error hierarchy for deckhand.
//!
//! Three top-level enums cover the three subsystems:
//! - `StackError` — stack file loading and validation failures
//! - `TransportError` — ssh/scp execution and upload failures
//! - `TunnelError` — tunnel lifecycle and connection failures
//!
//! Phase-level wrapping (which phase a failure occurred in) happens with
//! `anyhow::Context` in the workflow runner, on top of these.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from loading and validating a stack file.
#[derive(Debug, Error)]
pub enum StackError {
    #[error("failed to read stack file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse stack YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("apiVersion is required")]
    MissingApiVersion,

    #[error("name is required")]
    MissingName,

    #[error("at least one target is required")]
    NoTargets,

    #[error("at least one service is required")]
    NoServices,

    #[error("service '{service}' references undefined target '{target}'")]
    UnknownTarget { service: String, target: String },

    #[error("service '{service}' must have either 'image' or 'build'")]
    MissingImage { service: String },

    #[error("service '{service}' depends on undefined service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },

    #[error("target '{target}' requires host, user and sshKey")]
    IncompleteRemoteTarget { target: String },

    #[error("no ssh target defined in stack")]
    NoRemoteTarget,
}

/// Errors from the ssh/scp transport primitive.
///
/// Remote command and upload failures carry the captured combined output so
/// the operator can diagnose without re-running anything by hand.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("remote command `{command}` failed: {output}")]
    CommandFailed { command: String, output: String },

    #[error("upload of {path} failed: {output}")]
    UploadFailed { path: PathBuf, output: String },

    #[error("failed to stage content for upload: {0}")]
    Stage(#[source] std::io::Error),
}

/// Errors from the tunnel manager.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("tunnel is already running")]
    AlreadyRunning,

    #[error("tunnel is not running")]
    NotRunning,

    #[error("tunnel has been stopped")]
    Stopped,

    #[error("failed to bind local listener on 127.0.0.1:{port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read ssh key {path}: {source}")]
    KeyLoad {
        path: PathBuf,
        #[source]
        source: russh_keys::Error,
    },

    #[error("ssh connection to {host}:{port} failed: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: russh::Error,
    },

    #[error("ssh authentication failed for user '{user}'")]
    AuthFailed { user: String },

    #[error("failed to open forwarding channel to 127.0.0.1:{remote_port}: {source}")]
    ChannelOpen {
        remote_port: u16,
        #[source]
        source: russh::Error,
    },
}
