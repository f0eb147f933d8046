//! Waterfall gRPC Server
//!
//! Serves push, pull, exec and port forwarding to remote clients.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use waterfall::ServiceConfig;
use waterfall_grpc::WaterfallServer;

/// Waterfall gRPC Server - remote push, pull, exec and port forwarding
#[derive(Parser, Debug)]
#[command(name = "waterfall-server")]
#[command(about = "gRPC server for remote device control")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8089")]
    addr: SocketAddr,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured chunk size in bytes
    #[arg(long)]
    chunk_size: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServiceConfig::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ServiceConfig::default(),
    };
    if let Some(chunk_size) = args.chunk_size {
        config.chunk_size = chunk_size;
    }
    tracing::debug!(?config, "loaded configuration");

    WaterfallServer::new(args.addr, config).run().await?;

    Ok(())
}
