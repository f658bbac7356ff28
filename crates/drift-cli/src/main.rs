//! # drift CLI
//!
//! Command-line client for the drift filesystem. Tree operations go to
//! the naming server; `cat` and `put` then talk to the storage server the
//! naming server hands back.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use drift_config::Config;
use drift_proto::{Service, ServiceStub, Storage, VPath};

/// Bytes moved per request during cat/put.
const TRANSFER_CHUNK: u32 = 1 << 20;

#[derive(Parser)]
#[command(name = "drift")]
#[command(version, about = "drift filesystem client", long_about = None)]
struct Cli {
    /// Host of the naming server
    #[arg(long)]
    naming_host: Option<String>,

    /// Service port of the naming server
    #[arg(long)]
    naming_port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the children of a directory
    Ls {
        #[arg(value_name = "PATH", default_value = "/")]
        path: String,
    },

    /// Show whether a path is a directory and, for files, its size
    Stat {
        #[arg(value_name = "PATH")]
        path: String,
    },

    /// Create a directory
    Mkdir {
        #[arg(value_name = "PATH")]
        path: String,
    },

    /// Create an empty file
    Touch {
        #[arg(value_name = "PATH")]
        path: String,
    },

    /// Delete a file or directory subtree
    Rm {
        #[arg(value_name = "PATH")]
        path: String,
    },

    /// Write a file's contents to stdout
    Cat {
        #[arg(value_name = "PATH")]
        path: String,
    },

    /// Upload a local file
    Put {
        /// Local file to upload
        #[arg(value_name = "LOCAL")]
        local: PathBuf,

        /// Destination path in the filesystem
        #[arg(value_name = "PATH")]
        path: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("DRIFT_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("failed to load config")?;

    let host = cli.naming_host.unwrap_or(config.naming.host);
    let host = if host == "0.0.0.0" {
        "127.0.0.1".to_string()
    } else {
        host
    };
    let port = cli.naming_port.unwrap_or(config.naming.service_port);
    let naming = ServiceStub::with_host(&host, port)?;

    match cli.command {
        Commands::Ls { path } => {
            let path: VPath = path.parse()?;
            let mut children = naming.list(&path)?;
            children.sort();
            for child in children {
                println!("{child}");
            }
        }
        Commands::Stat { path } => {
            let path: VPath = path.parse()?;
            if naming.is_directory(&path)? {
                println!("{path}: directory");
            } else {
                let storage = naming.get_storage(&path)?;
                let size = storage.size(&path)?;
                println!("{path}: file, {size} bytes on {storage}");
            }
        }
        Commands::Mkdir { path } => {
            let path: VPath = path.parse()?;
            if !naming.create_directory(&path)? {
                bail!("{path} already exists");
            }
        }
        Commands::Touch { path } => {
            let path: VPath = path.parse()?;
            if !naming.create_file(&path)? {
                bail!("{path} already exists");
            }
        }
        Commands::Rm { path } => {
            let path: VPath = path.parse()?;
            if !naming.delete(&path)? {
                bail!("{path} was not deleted");
            }
        }
        Commands::Cat { path } => {
            let path: VPath = path.parse()?;
            let storage = naming.get_storage(&path)?;
            let size = storage.size(&path)?;

            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            let mut offset = 0u64;
            while offset < size {
                let chunk = (size - offset).min(TRANSFER_CHUNK as u64) as u32;
                let data = storage.read(&path, offset, chunk)?;
                out.write_all(&data)?;
                offset += chunk as u64;
            }
            out.flush()?;
        }
        Commands::Put { local, path } => {
            let path: VPath = path.parse()?;
            let data = std::fs::read(&local)
                .with_context(|| format!("failed to read {}", local.display()))?;

            if !naming.create_file(&path)? {
                bail!("{path} already exists");
            }
            let storage = naming.get_storage(&path)?;
            let mut offset = 0u64;
            for chunk in data.chunks(TRANSFER_CHUNK as usize) {
                storage.write(&path, offset, chunk.to_vec())?;
                offset += chunk.len() as u64;
            }
            println!("{} -> {path} ({} bytes)", local.display(), data.len());
        }
    }

    Ok(())
}
