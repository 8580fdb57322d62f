//! SSH tunnel: forward TCP connections from a local port to one fixed
//! remote port through an authenticated SSH session.
//!
//! The manager is a small state machine (`Idle -> Running -> Stopped`)
//! whose accept loop runs on the caller's own task until stopped. Each
//! accepted connection gets an independent handler that pumps bytes both
//! ways; the handler ends as soon as either direction reaches EOF or
//! errors; the other direction is not drained first. That one-sided
//! teardown is a deliberate tradeoff, not an oversight: metrics scrapes
//! are short-lived request/response exchanges.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use russh::client;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::TunnelError;
use crate::workflow::RemoteTarget;

/// Byte stream to the remote endpoint.
pub type TunnelStream = Box<dyn TunnelIo>;

pub trait TunnelIo: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> TunnelIo for T {}

/// Dialer seam: production code hands the manager an SSH session; tests
/// substitute a plain TCP dialer.
#[async_trait]
pub trait TunnelDial: Send + Sync + 'static {
    async fn dial(&self) -> anyhow::Result<TunnelStream>;

    /// Close the underlying transport session. Invoked once, when the
    /// accept loop exits after `stop`.
    async fn close(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Idle,
    Running,
    Stopped,
}

struct Inner {
    state: TunnelState,
    cancel: Option<CancellationToken>,
}

pub struct TunnelManager<D: TunnelDial> {
    dialer: Arc<D>,
    local_port: u16,
    inner: Mutex<Inner>,
}

impl<D: TunnelDial> TunnelManager<D> {
    pub fn new(dialer: D, local_port: u16) -> Self {
        Self {
            dialer: Arc::new(dialer),
            local_port,
            inner: Mutex::new(Inner {
                state: TunnelState::Idle,
                cancel: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> TunnelState {
        self.lock().state
    }

    /// Bind `127.0.0.1:<local_port>` and accept connections until `stop` is
    /// called. Blocks the calling task for the lifetime of the tunnel.
    pub async fn start(&self) -> Result<(), TunnelError> {
        let cancel = {
            let mut inner = self.lock();
            match inner.state {
                TunnelState::Running => return Err(TunnelError::AlreadyRunning),
                TunnelState::Stopped => return Err(TunnelError::Stopped),
                TunnelState::Idle => {}
            }
            let cancel = CancellationToken::new();
            inner.state = TunnelState::Running;
            inner.cancel = Some(cancel.clone());
            cancel
        };

        let listener = match TcpListener::bind(("127.0.0.1", self.local_port)).await {
            Ok(listener) => listener,
            Err(source) => {
                let mut inner = self.lock();
                inner.state = TunnelState::Idle;
                inner.cancel = None;
                return Err(TunnelError::Bind {
                    port: self.local_port,
                    source,
                });
            }
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.dialer.close().await;
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((conn, peer)) => {
                            debug!(%peer, "accepted tunnel connection");
                            let dialer = Arc::clone(&self.dialer);
                            tokio::spawn(forward(dialer, conn));
                        }
                        Err(e) => {
                            if cancel.is_cancelled() {
                                self.dialer.close().await;
                                return Ok(());
                            }
                            warn!(error = %e, "failed to accept connection");
                        }
                    }
                }
            }
        }
    }

    /// Signal the accept loop to exit. In-flight connections end when their
    /// sockets close.
    pub fn stop(&self) -> Result<(), TunnelError> {
        let mut inner = self.lock();
        match inner.state {
            TunnelState::Running => {
                if let Some(cancel) = inner.cancel.take() {
                    cancel.cancel();
                }
                inner.state = TunnelState::Stopped;
                Ok(())
            }
            TunnelState::Idle | TunnelState::Stopped => Err(TunnelError::NotRunning),
        }
    }
}

/// Pump one accepted connection. Both sockets are released when this
/// returns, whichever direction triggered the teardown.
async fn forward<D: TunnelDial>(dialer: Arc<D>, local: TcpStream) {
    let remote = match dialer.dial().await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "failed to dial remote endpoint");
            return;
        }
    };

    let (mut local_read, mut local_write) = tokio::io::split(local);
    let (mut remote_read, mut remote_write) = tokio::io::split(remote);

    tokio::select! {
        _ = tokio::io::copy(&mut local_read, &mut remote_write) => {}
        _ = tokio::io::copy(&mut remote_read, &mut local_write) => {}
    }
}

/// Accept any host key: the trust model is operator-controlled hosts
/// addressed by the operator's own configuration.
struct TrustedHostHandler;

#[async_trait]
impl client::Handler for TrustedHostHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// An authenticated SSH session that dials one fixed remote port per
/// connection via direct-tcpip channels.
pub struct SshSession {
    handle: client::Handle<TrustedHostHandler>,
    remote_port: u16,
}

impl SshSession {
    pub async fn connect(target: &RemoteTarget, remote_port: u16) -> Result<Self, TunnelError> {
        let key_path = PathBuf::from(&target.key_path);
        let key = russh_keys::load_secret_key(&key_path, None).map_err(|source| {
            TunnelError::KeyLoad {
                path: key_path.clone(),
                source,
            }
        })?;

        let config = Arc::new(client::Config::default());
        let mut handle = client::connect(
            config,
            (target.host.as_str(), target.port),
            TrustedHostHandler,
        )
        .await
        .map_err(|source| TunnelError::Connect {
            host: target.host.clone(),
            port: target.port,
            source,
        })?;

        let authenticated = handle
            .authenticate_publickey(target.user.as_str(), Arc::new(key))
            .await
            .map_err(|source| TunnelError::Connect {
                host: target.host.clone(),
                port: target.port,
                source,
            })?;
        if !authenticated {
            return Err(TunnelError::AuthFailed {
                user: target.user.clone(),
            });
        }

        Ok(Self {
            handle,
            remote_port,
        })
    }
}

#[async_trait]
impl TunnelDial for SshSession {
    async fn dial(&self) -> anyhow::Result<TunnelStream> {
        let channel = self
            .handle
            .channel_open_direct_tcpip("127.0.0.1", u32::from(self.remote_port), "127.0.0.1", 0)
            .await
            .map_err(|source| TunnelError::ChannelOpen {
                remote_port: self.remote_port,
                source,
            })?;
        Ok(Box::new(channel.into_stream()))
    }

    async fn close(&self) {
        let _ = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "tunnel stopped", "en")
            .await;
    }
}
