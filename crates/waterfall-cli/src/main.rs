//! Waterfall CLI - host-side client for a waterfall server
//!
//! Usage:
//!   waterfall push <local> <remote>     Copy a local path to the server
//!   waterfall pull <remote> <local>     Copy a server path to the host
//!   waterfall exec <program> [args...]  Run a command on the server
//!   waterfall version                   Print the server version

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use waterfall::{Command, ServiceConfig, TarArchiver};
use waterfall_grpc::{WaterfallClient, client};

/// Waterfall CLI - push, pull and exec against a waterfall server
#[derive(Parser, Debug)]
#[command(name = "waterfall")]
#[command(about = "Host-side client for remote device control")]
struct Args {
    /// Server address
    #[arg(long, default_value = "http://127.0.0.1:8089")]
    addr: String,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Copy a local file or directory to the server
    Push {
        /// Local source path
        src: PathBuf,
        /// Destination path on the server
        dest: String,
    },
    /// Copy a file or directory from the server
    Pull {
        /// Source path on the server
        src: String,
        /// Local destination directory
        dest: PathBuf,
    },
    /// Run a command on the server and exit with its exit code
    Exec {
        /// Working directory on the server
        #[arg(long, default_value = "")]
        dir: String,
        /// Program to run
        program: String,
        /// Arguments to the program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Print the server version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .init();

    let args = Args::parse();
    let mut client = WaterfallClient::connect(args.addr.clone())
        .await
        .with_context(|| format!("failed to connect to {}", args.addr))?;
    let config = ServiceConfig::default();

    match args.command {
        Cmd::Push { src, dest } => {
            let response =
                client::push(&mut client, &src, &dest, Arc::new(TarArchiver), &config).await?;
            if !response.success {
                bail!("push to {dest} failed: {}", response.error);
            }
        }
        Cmd::Pull { src, dest } => {
            client::pull(&mut client, &src, &dest, Arc::new(TarArchiver), &config).await?;
        }
        Cmd::Exec { dir, program, args } => {
            let command = Command {
                path: program,
                args,
                dir,
                pipe_in: false,
            };
            let mut stdout = tokio::io::stdout();
            let mut stderr = tokio::io::stderr();
            let code = client::exec(&mut client, command, &mut stdout, &mut stderr).await?;
            std::process::exit(i32::try_from(code).unwrap_or(i32::MAX));
        }
        Cmd::Version => {
            println!("{}", client::version(&mut client).await?);
        }
    }

    Ok(())
}
