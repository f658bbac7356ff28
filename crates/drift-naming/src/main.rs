//! Naming server daemon.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use drift_config::{log_naming_info, Config};
use drift_naming::NamingServer;

#[derive(Parser)]
#[command(name = "drift-namingd")]
#[command(version, about = "drift filesystem naming server", long_about = None)]
struct Cli {
    /// Config file (defaults to ./driftfs.toml then ~/.driftfs/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Interface to bind both naming skeletons on
    #[arg(long)]
    host: Option<String>,

    /// Well-known port of the client service interface
    #[arg(long)]
    service_port: Option<u16>,

    /// Well-known port of the storage registration interface
    #[arg(long)]
    registration_port: Option<u16>,
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("cannot resolve {host}:{port}"))?
        .next()
        .with_context(|| format!("{host}:{port} resolved to nothing"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("DRIFT_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load().context("failed to load config")?,
    };

    let host = cli.host.unwrap_or(config.naming.host);
    let service_port = cli.service_port.unwrap_or(config.naming.service_port);
    let registration_port = cli
        .registration_port
        .unwrap_or(config.naming.registration_port);

    let server = NamingServer::new(
        resolve(&host, service_port)?,
        resolve(&host, registration_port)?,
        config.replication.read_threshold,
    )?;
    server.start()?;

    log_naming_info!(
        "naming server running",
        service = server
            .service_address()
            .map(|a| a.to_string())
            .unwrap_or_default(),
        registration = server
            .registration_address()
            .map(|a| a.to_string())
            .unwrap_or_default(),
    );

    server.wait();
    Ok(())
}
