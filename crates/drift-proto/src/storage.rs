//! The two remote interfaces of a storage server.
//!
//! [`Storage`] is the client-facing bulk-I/O interface (size, read,
//! write). [`Command`] is the naming-server-facing control interface
//! (create, delete, copy); clients never call it. A storage server
//! typically exposes each on its own skeleton so the two can live on
//! different ports.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use drift_rmi::wire::{decode_args, encode_outcome};
use drift_rmi::{Dispatch, InterfaceDesc, MethodSig, Outcome, RmiError, Skeleton, StubHandle};

use crate::path::VPath;

pub const SIZE: MethodSig = MethodSig {
    name: "size",
    params: &["VPath"],
    returns: "u64",
    declares_transport_error: true,
};

pub const READ: MethodSig = MethodSig {
    name: "read",
    params: &["VPath", "u64", "u32"],
    returns: "Vec<u8>",
    declares_transport_error: true,
};

pub const WRITE: MethodSig = MethodSig {
    name: "write",
    params: &["VPath", "u64", "Vec<u8>"],
    returns: "()",
    declares_transport_error: true,
};

pub const STORAGE: InterfaceDesc = InterfaceDesc {
    name: "Storage",
    methods: &[SIZE, READ, WRITE],
};

pub const CREATE: MethodSig = MethodSig {
    name: "create",
    params: &["VPath"],
    returns: "bool",
    declares_transport_error: true,
};

pub const DELETE: MethodSig = MethodSig {
    name: "delete",
    params: &["VPath"],
    returns: "bool",
    declares_transport_error: true,
};

pub const COPY: MethodSig = MethodSig {
    name: "copy",
    params: &["VPath", "StorageStub"],
    returns: "bool",
    declares_transport_error: true,
};

pub const COMMAND: InterfaceDesc = InterfaceDesc {
    name: "Command",
    methods: &[CREATE, DELETE, COPY],
};

/// Errors of the storage interfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("out of bounds: {0}")]
    OutOfBounds(String),

    #[error("i/o error: {0}")]
    Io(String),

    #[error(transparent)]
    Rmi(#[from] RmiError),
}

/// Client-facing file access.
pub trait Storage {
    /// Size of a file in bytes. Fails with `NotFound` for absent paths,
    /// directories, and the root.
    fn size(&self, file: &VPath) -> Result<u64, StorageError>;

    /// Exactly `length` bytes starting at `offset`. Fails with
    /// `OutOfBounds` when `offset + length` escapes the file.
    fn read(&self, file: &VPath, offset: u64, length: u32) -> Result<Vec<u8>, StorageError>;

    /// Overwrite or extend at `offset`. A gap past the current end is
    /// materialized, so the size becomes at least `offset + data.len()`.
    fn write(&self, file: &VPath, offset: u64, data: Vec<u8>) -> Result<(), StorageError>;
}

/// Naming-server-facing control operations.
pub trait Command {
    /// Create an empty file, with any missing parent directories. Returns
    /// `false` for the root and for existing paths.
    fn create(&self, file: &VPath) -> Result<bool, StorageError>;

    /// Delete a file or a whole subtree. Returns `false` for the root and
    /// for absent paths.
    fn delete(&self, path: &VPath) -> Result<bool, StorageError>;

    /// Replace the local file with the bytes held by `source`.
    fn copy(&self, file: &VPath, source: &StorageStub) -> Result<bool, StorageError>;
}

/// Stub for the client-facing [`Storage`] interface.
///
/// Also the identity of a replica in the naming server: two stubs are the
/// same storage server iff they compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageStub {
    handle: StubHandle,
}

impl StorageStub {
    pub fn new(addr: SocketAddr) -> Result<Self, RmiError> {
        Ok(Self {
            handle: StubHandle::new(&STORAGE, addr)?,
        })
    }

    pub fn with_host(host: &str, port: u16) -> Result<Self, RmiError> {
        Ok(Self {
            handle: StubHandle::with_host(&STORAGE, host, port)?,
        })
    }

    pub fn from_skeleton<D: Dispatch>(skeleton: &Skeleton<D>) -> Result<Self, RmiError> {
        Ok(Self {
            handle: StubHandle::from_skeleton(skeleton)?,
        })
    }

    pub fn from_skeleton_with_host<D: Dispatch>(
        skeleton: &Skeleton<D>,
        hostname: &str,
    ) -> Result<Self, RmiError> {
        Ok(Self {
            handle: StubHandle::from_skeleton_with_host(skeleton, hostname)?,
        })
    }

    pub fn handle(&self) -> &StubHandle {
        &self.handle
    }
}

impl std::fmt::Display for StorageStub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.handle.fmt(f)
    }
}

impl Storage for StorageStub {
    fn size(&self, file: &VPath) -> Result<u64, StorageError> {
        self.handle.call(&SIZE, &(file,))?
    }

    fn read(&self, file: &VPath, offset: u64, length: u32) -> Result<Vec<u8>, StorageError> {
        self.handle.call(&READ, &(file, offset, length))?
    }

    fn write(&self, file: &VPath, offset: u64, data: Vec<u8>) -> Result<(), StorageError> {
        self.handle.call(&WRITE, &(file, offset, data))?
    }
}

/// Stub for the naming-server-facing [`Command`] interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandStub {
    handle: StubHandle,
}

impl CommandStub {
    pub fn new(addr: SocketAddr) -> Result<Self, RmiError> {
        Ok(Self {
            handle: StubHandle::new(&COMMAND, addr)?,
        })
    }

    pub fn with_host(host: &str, port: u16) -> Result<Self, RmiError> {
        Ok(Self {
            handle: StubHandle::with_host(&COMMAND, host, port)?,
        })
    }

    pub fn from_skeleton<D: Dispatch>(skeleton: &Skeleton<D>) -> Result<Self, RmiError> {
        Ok(Self {
            handle: StubHandle::from_skeleton(skeleton)?,
        })
    }

    pub fn from_skeleton_with_host<D: Dispatch>(
        skeleton: &Skeleton<D>,
        hostname: &str,
    ) -> Result<Self, RmiError> {
        Ok(Self {
            handle: StubHandle::from_skeleton_with_host(skeleton, hostname)?,
        })
    }

    pub fn handle(&self) -> &StubHandle {
        &self.handle
    }
}

impl std::fmt::Display for CommandStub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.handle.fmt(f)
    }
}

impl Command for CommandStub {
    fn create(&self, file: &VPath) -> Result<bool, StorageError> {
        self.handle.call(&CREATE, &(file,))?
    }

    fn delete(&self, path: &VPath) -> Result<bool, StorageError> {
        self.handle.call(&DELETE, &(path,))?
    }

    fn copy(&self, file: &VPath, source: &StorageStub) -> Result<bool, StorageError> {
        self.handle.call(&COPY, &(file, source))?
    }
}

/// [`Dispatch`] adapter for a [`Storage`] server object.
pub struct StorageDispatcher<S> {
    server: Arc<S>,
}

impl<S> StorageDispatcher<S> {
    pub fn new(server: Arc<S>) -> Self {
        Self { server }
    }
}

impl<S: Storage + Send + Sync + 'static> Dispatch for StorageDispatcher<S> {
    fn interface(&self) -> &'static InterfaceDesc {
        &STORAGE
    }

    fn dispatch(&self, method: &MethodSig, args: &[u8]) -> Result<Outcome, RmiError> {
        match method.name {
            "size" => {
                let (file,): (VPath,) = decode_args(args)?;
                encode_outcome(self.server.size(&file))
            }
            "read" => {
                let (file, offset, length): (VPath, u64, u32) = decode_args(args)?;
                encode_outcome(self.server.read(&file, offset, length))
            }
            "write" => {
                let (file, offset, data): (VPath, u64, Vec<u8>) = decode_args(args)?;
                encode_outcome(self.server.write(&file, offset, data))
            }
            other => Err(RmiError::Dispatch(format!("unrouted method `{other}`"))),
        }
    }
}

/// [`Dispatch`] adapter for a [`Command`] server object.
pub struct CommandDispatcher<C> {
    server: Arc<C>,
}

impl<C> CommandDispatcher<C> {
    pub fn new(server: Arc<C>) -> Self {
        Self { server }
    }
}

impl<C: Command + Send + Sync + 'static> Dispatch for CommandDispatcher<C> {
    fn interface(&self) -> &'static InterfaceDesc {
        &COMMAND
    }

    fn dispatch(&self, method: &MethodSig, args: &[u8]) -> Result<Outcome, RmiError> {
        match method.name {
            "create" => {
                let (file,): (VPath,) = decode_args(args)?;
                encode_outcome(self.server.create(&file))
            }
            "delete" => {
                let (path,): (VPath,) = decode_args(args)?;
                encode_outcome(self.server.delete(&path))
            }
            "copy" => {
                let (file, source): (VPath, StorageStub) = decode_args(args)?;
                encode_outcome(self.server.copy(&file, &source))
            }
            other => Err(RmiError::Dispatch(format!("unrouted method `{other}`"))),
        }
    }
}
