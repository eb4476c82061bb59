//! `axondb-server` binary.

use axon_core::ServerConfig;
use axon_server::Server;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "axondb-server", about = "Networked key-value and vector database")]
struct Args {
    /// Data-plane bind address (control plane binds the same host at port + 1000)
    #[arg(long, default_value = "127.0.0.1:9090")]
    bind: SocketAddr,

    /// Base directory for all persistent state
    #[arg(long, default_value = "./axondb-data")]
    data_dir: PathBuf,

    /// Connection limit used when no persisted limit exists
    #[arg(long, default_value_t = 100)]
    max_connections: usize,
}

#[tokio::main]
async fn main() -> axon_core::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = ServerConfig {
        bind: args.bind,
        data_dir: args.data_dir,
        max_connections: args.max_connections,
    };

    Server::bind(config).await?.run().await
}
