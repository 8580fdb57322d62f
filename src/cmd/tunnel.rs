use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::errors::StackError;
use crate::stack::Stack;
use crate::tunnel::{SshSession, TunnelManager};
use crate::workflow::ResolvedTarget;

/// Hold open a tunnel from `127.0.0.1:<local_port>` to the stack's ssh
/// target's `<remote_port>` until Ctrl-C. Typically used to let a local
/// collector scrape a remote metrics endpoint.
pub async fn cmd_tunnel(stack_file: &Path, local_port: u16, remote_port: u16) -> Result<()> {
    let stack = Stack::load(stack_file)?;
    let ResolvedTarget::Remote(target) = ResolvedTarget::resolve(&stack)? else {
        return Err(StackError::NoRemoteTarget.into());
    };

    println!("Connecting to {}@{}...", target.user, target.host);
    let session = SshSession::connect(&target, remote_port).await?;

    let manager = Arc::new(TunnelManager::new(session, local_port));
    println!(
        "SSH tunnel started: localhost:{local_port} -> {}:{remote_port}",
        target.host
    );
    println!("Press Ctrl+C to stop");

    let stopper = Arc::clone(&manager);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nStopping tunnel...");
            let _ = stopper.stop();
        }
    });

    manager.start().await?;
    println!("Tunnel stopped");
    Ok(())
}
