//! Storage server daemon.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use drift_config::{log_storage_info, Config};
use drift_proto::RegistrationStub;
use drift_storage::StorageServer;

#[derive(Parser)]
#[command(name = "drift-storaged")]
#[command(version, about = "drift filesystem storage server", long_about = None)]
struct Cli {
    /// Config file (defaults to ./driftfs.toml then ~/.driftfs/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory to serve
    #[arg(long)]
    root: Option<PathBuf>,

    /// Externally-routable hostname of this machine
    #[arg(long)]
    hostname: Option<String>,

    /// Host of the naming server
    #[arg(long)]
    naming_host: Option<String>,

    /// Registration port of the naming server
    #[arg(long)]
    naming_port: Option<u16>,

    /// Port for the client interface (0 = system-chosen)
    #[arg(long)]
    client_port: Option<u16>,

    /// Port for the command interface (0 = system-chosen)
    #[arg(long)]
    command_port: Option<u16>,
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

    let root = cli.root.unwrap_or(config.storage.root);
    let hostname = cli.hostname.unwrap_or(config.storage.hostname);
    let naming_host = cli.naming_host.unwrap_or(config.naming.host.clone());
    let naming_port = cli.naming_port.unwrap_or(config.naming.registration_port);
    let client_port = cli.client_port.unwrap_or(config.storage.client_port);
    let command_port = cli.command_port.unwrap_or(config.storage.command_port);

    // Binding to the wildcard means registering against localhost.
    let naming_host = if naming_host == "0.0.0.0" {
        "127.0.0.1".to_string()
    } else {
        naming_host
    };

    let naming = RegistrationStub::with_host(&naming_host, naming_port)?;
    let server = StorageServer::new(&root, client_port, command_port)?;
    server.start(&hostname, &naming)?;

    log_storage_info!(
        "storage server running",
        root = root.display().to_string(),
        client = server
            .client_address()
            .map(|a| a.to_string())
            .unwrap_or_default(),
        command = server
            .command_address()
            .map(|a| a.to_string())
            .unwrap_or_default(),
    );

    server.wait();
    Ok(())
}
