//! # drift-storage
//!
//! The storage server: file bytes live here. A [`StorageEngine`] performs
//! the actual file operations under a directory root; a [`StorageServer`]
//! exposes the engine over two skeletons — the client-facing [`Storage`]
//! interface and the naming-server-facing [`Command`] interface — and
//! performs the one-shot registration handshake at startup.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info, warn};

use drift_proto::{
    Command, CommandDispatcher, CommandStub, PathError, Registration, RegistrationError,
    RegistrationStub, Storage, StorageDispatcher, StorageError, StorageStub, VPath,
};
use drift_rmi::{RmiError, Skeleton};

/// Bytes pulled per request while copying a file from another storage
/// server.
const COPY_CHUNK: u32 = 1 << 20;

#[derive(Debug, Error)]
pub enum StorageServerError {
    #[error("storage root `{0}` does not exist or is not a directory")]
    RootNotFound(String),

    #[error(transparent)]
    Rmi(#[from] RmiError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// File operations rooted at a local directory.
///
/// One mutex serializes every operation; per-path concurrency control is
/// the naming server's job, so contention here is short and local.
pub struct StorageEngine {
    root: PathBuf,
    fs: Mutex<()>,
}

impl StorageEngine {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            fs: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a path that must name an existing regular file.
    fn resolve_file(&self, file: &VPath) -> Result<PathBuf, StorageError> {
        if file.is_root() {
            return Err(StorageError::NotFound("the root is not a file".to_string()));
        }
        let local = file.to_local(&self.root);
        let meta = std::fs::metadata(&local)
            .map_err(|_| StorageError::NotFound(file.to_string()))?;
        if !meta.is_file() {
            return Err(StorageError::NotFound(format!("{file} is a directory")));
        }
        Ok(local)
    }
}

impl Storage for StorageEngine {
    fn size(&self, file: &VPath) -> Result<u64, StorageError> {
        let _guard = self.fs.lock().unwrap();
        let local = self.resolve_file(file)?;
        let meta = std::fs::metadata(&local).map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(meta.len())
    }

    fn read(&self, file: &VPath, offset: u64, length: u32) -> Result<Vec<u8>, StorageError> {
        let _guard = self.fs.lock().unwrap();
        let local = self.resolve_file(file)?;
        let meta = std::fs::metadata(&local).map_err(|e| StorageError::Io(e.to_string()))?;
        let size = meta.len();

        let end = offset
            .checked_add(length as u64)
            .ok_or_else(|| StorageError::OutOfBounds("offset + length overflows".to_string()))?;
        if end > size {
            return Err(StorageError::OutOfBounds(format!(
                "read of {length} bytes at offset {offset} escapes {file} ({size} bytes)"
            )));
        }

        let mut handle = File::open(&local).map_err(|e| StorageError::Io(e.to_string()))?;
        handle
            .seek(SeekFrom::Start(offset))
            .map_err(|e| StorageError::Io(e.to_string()))?;
        let mut buf = vec![0u8; length as usize];
        handle
            .read_exact(&mut buf)
            .map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(buf)
    }

    fn write(&self, file: &VPath, offset: u64, data: Vec<u8>) -> Result<(), StorageError> {
        let _guard = self.fs.lock().unwrap();
        let local = self.resolve_file(file)?;

        let mut handle = OpenOptions::new()
            .write(true)
            .open(&local)
            .map_err(|e| StorageError::Io(e.to_string()))?;

        if data.is_empty() {
            // Even an empty write must grow the file to `offset`.
            let size = handle
                .metadata()
                .map_err(|e| StorageError::Io(e.to_string()))?
                .len();
            if offset > size {
                handle
                    .set_len(offset)
                    .map_err(|e| StorageError::Io(e.to_string()))?;
            }
            return Ok(());
        }

        handle
            .seek(SeekFrom::Start(offset))
            .map_err(|e| StorageError::Io(e.to_string()))?;
        handle
            .write_all(&data)
            .map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(())
    }
}

impl Command for StorageEngine {
    fn create(&self, file: &VPath) -> Result<bool, StorageError> {
        let _guard = self.fs.lock().unwrap();
        if file.is_root() {
            return Ok(false);
        }
        let local = file.to_local(&self.root);
        if local.exists() {
            return Ok(false);
        }
        if let Some(parent) = local.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(path = %file, error = %e, "create: parent directories failed");
                return Ok(false);
            }
        }
        match File::create(&local) {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!(path = %file, error = %e, "create failed");
                Ok(false)
            }
        }
    }

    fn delete(&self, path: &VPath) -> Result<bool, StorageError> {
        let _guard = self.fs.lock().unwrap();
        if path.is_root() {
            return Ok(false);
        }
        let local = path.to_local(&self.root);
        let meta = match std::fs::symlink_metadata(&local) {
            Ok(meta) => meta,
            Err(_) => return Ok(false),
        };
        let removed = if meta.is_dir() {
            std::fs::remove_dir_all(&local)
        } else {
            std::fs::remove_file(&local)
        };
        match removed {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(path = %path, error = %e, "delete failed");
                Ok(false)
            }
        }
    }

    fn copy(&self, file: &VPath, source: &StorageStub) -> Result<bool, StorageError> {
        if file.is_root() {
            return Err(StorageError::NotFound("the root is not a file".to_string()));
        }

        // Learn the extent first; a missing source file fails here.
        let total = source.size(file)?;

        // Replace whatever is present locally with an empty file.
        {
            let _guard = self.fs.lock().unwrap();
            let local = file.to_local(&self.root);
            if local.exists() {
                let meta =
                    std::fs::symlink_metadata(&local).map_err(|e| StorageError::Io(e.to_string()))?;
                if meta.is_dir() {
                    std::fs::remove_dir_all(&local).map_err(|e| StorageError::Io(e.to_string()))?;
                } else {
                    std::fs::remove_file(&local).map_err(|e| StorageError::Io(e.to_string()))?;
                }
            }
            if let Some(parent) = local.parent() {
                std::fs::create_dir_all(parent).map_err(|e| StorageError::Io(e.to_string()))?;
            }
            File::create(&local).map_err(|e| StorageError::Io(e.to_string()))?;
        }

        // Pull chunks without holding our mutex across the remote reads:
        // two servers copying from each other must not deadlock.
        let mut offset = 0u64;
        while offset < total {
            let chunk = (total - offset).min(COPY_CHUNK as u64) as u32;
            let data = source.read(file, offset, chunk)?;
            self.write(file, offset, data)?;
            offset += chunk as u64;
        }

        debug!(path = %file, bytes = total, source = %source, "copy complete");
        Ok(true)
    }
}

/// A running storage server: the engine plus its two skeletons.
pub struct StorageServer {
    engine: Arc<StorageEngine>,
    client_skeleton: Skeleton<StorageDispatcher<StorageEngine>>,
    command_skeleton: Skeleton<CommandDispatcher<StorageEngine>>,
}

impl StorageServer {
    /// Create a storage server over a local directory. Ports of zero let
    /// the system choose at start time.
    pub fn new(
        root: impl Into<PathBuf>,
        client_port: u16,
        command_port: u16,
    ) -> Result<Self, StorageServerError> {
        let engine = Arc::new(StorageEngine::new(root));

        let client_dispatch = StorageDispatcher::new(Arc::clone(&engine));
        let client_skeleton = if client_port > 0 {
            Skeleton::bind(client_dispatch, any_addr(client_port))?
        } else {
            Skeleton::new(client_dispatch)?
        };

        let command_dispatch = CommandDispatcher::new(Arc::clone(&engine));
        let command_skeleton = if command_port > 0 {
            Skeleton::bind(command_dispatch, any_addr(command_port))?
        } else {
            Skeleton::new(command_dispatch)?
        };

        Ok(Self {
            engine,
            client_skeleton,
            command_skeleton,
        })
    }

    pub fn engine(&self) -> &Arc<StorageEngine> {
        &self.engine
    }

    /// Address of the client (Storage) interface once started.
    pub fn client_address(&self) -> Option<SocketAddr> {
        self.client_skeleton.address()
    }

    /// Address of the naming-server (Command) interface once started.
    pub fn command_address(&self) -> Option<SocketAddr> {
        self.command_skeleton.address()
    }

    /// Start both skeletons and register with the naming server.
    ///
    /// `hostname` is the externally-routable name of this host; the stubs
    /// handed to the naming server carry it. Every path the naming server
    /// reports as a duplicate is deleted locally, and emptied ancestor
    /// directories are pruned up to (but not including) the root.
    pub fn start(
        &self,
        hostname: &str,
        naming: &RegistrationStub,
    ) -> Result<(), StorageServerError> {
        let root = self.engine.root();
        if !root.is_dir() {
            return Err(StorageServerError::RootNotFound(
                root.display().to_string(),
            ));
        }

        self.client_skeleton.start()?;
        self.command_skeleton.start()?;

        let storage_stub = StorageStub::from_skeleton_with_host(&self.client_skeleton, hostname)?;
        let command_stub = CommandStub::from_skeleton_with_host(&self.command_skeleton, hostname)?;

        let files = VPath::list(root)?;
        info!(
            root = %root.display(),
            files = files.len(),
            storage = %storage_stub,
            "registering with naming server"
        );

        let duplicates = naming.register(storage_stub, command_stub, files)?;
        for path in &duplicates {
            debug!(path = %path, "pruning duplicate");
            self.prune_duplicate(path);
        }
        Ok(())
    }

    /// Stop both skeletons. In-flight operations finish naturally.
    pub fn stop(&self) {
        self.client_skeleton.stop();
        self.command_skeleton.stop();
        self.client_skeleton.wait_stopped();
        self.command_skeleton.wait_stopped();
    }

    /// Block until both skeletons have stopped.
    pub fn wait(&self) {
        self.client_skeleton.wait_stopped();
        self.command_skeleton.wait_stopped();
    }

    /// Delete a duplicate reported by the naming server, then remove any
    /// ancestor directories the deletion emptied.
    fn prune_duplicate(&self, path: &VPath) {
        let root = self.engine.root();
        let local = path.to_local(root);
        if let Err(e) = std::fs::remove_file(&local) {
            warn!(path = %path, error = %e, "failed to delete duplicate");
            return;
        }

        let mut current = path.clone();
        while let Ok(parent) = current.parent() {
            if parent.is_root() {
                break;
            }
            let local_parent = parent.to_local(root);
            let empty = match std::fs::read_dir(&local_parent) {
                Ok(mut entries) => entries.next().is_none(),
                Err(_) => break,
            };
            if !empty {
                break;
            }
            if let Err(e) = std::fs::remove_dir(&local_parent) {
                warn!(path = %parent, error = %e, "failed to prune empty directory");
                break;
            }
            current = parent;
        }
    }
}

fn any_addr(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
}
