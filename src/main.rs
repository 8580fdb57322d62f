use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use deckhand::cmd;

#[derive(Parser)]
#[command(name = "deckhand")]
#[command(version, about = "Container stack deployment orchestrator")]
struct Cli {
    /// Path to the stack description file
    #[arg(short = 'f', long, global = true, default_value = "stack.yaml")]
    stack_file: PathBuf,

    /// Project root directory (defaults to the stack file's directory)
    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy the stack to its resolved target
    Deploy,
    /// Parse and validate the stack file
    Validate,
    /// Forward a local port to a remote port over SSH
    Tunnel {
        /// Local listening port
        #[arg(long, default_value_t = 9100)]
        local_port: u16,

        /// Remote port to forward to (e.g. a node-exporter endpoint)
        #[arg(long, default_value_t = 9100)]
        remote_port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Diagnostics go to stderr; stdout is reserved for the NDJSON event
    // stream and the __OUTPUTS__ result line.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Deploy => cmd::cmd_deploy(&cli.stack_file, cli.project_dir).await,
        Commands::Validate => cmd::cmd_validate(&cli.stack_file),
        Commands::Tunnel {
            local_port,
            remote_port,
        } => cmd::cmd_tunnel(&cli.stack_file, local_port, remote_port).await,
    }
}
