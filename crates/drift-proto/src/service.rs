//! The client-facing interface of the naming server.
//!
//! Clients resolve and manipulate the directory tree here, then go to a
//! storage server (via the stub returned by `get_storage`) for bulk file
//! I/O. The advisory `lock`/`unlock` pair lets a client span several
//! operations under one lock; single operations take their own locks.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use drift_rmi::wire::{decode_args, encode_outcome};
use drift_rmi::{Dispatch, InterfaceDesc, MethodSig, Outcome, RmiError, Skeleton, StubHandle};

use crate::path::VPath;
use crate::storage::StorageStub;

pub const IS_DIRECTORY: MethodSig = MethodSig {
    name: "is_directory",
    params: &["VPath"],
    returns: "bool",
    declares_transport_error: true,
};

pub const LIST: MethodSig = MethodSig {
    name: "list",
    params: &["VPath"],
    returns: "Vec<String>",
    declares_transport_error: true,
};

pub const CREATE_FILE: MethodSig = MethodSig {
    name: "create_file",
    params: &["VPath"],
    returns: "bool",
    declares_transport_error: true,
};

pub const CREATE_DIRECTORY: MethodSig = MethodSig {
    name: "create_directory",
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

pub const GET_STORAGE: MethodSig = MethodSig {
    name: "get_storage",
    params: &["VPath"],
    returns: "StorageStub",
    declares_transport_error: true,
};

pub const LOCK: MethodSig = MethodSig {
    name: "lock",
    params: &["VPath", "bool"],
    returns: "()",
    declares_transport_error: true,
};

pub const UNLOCK: MethodSig = MethodSig {
    name: "unlock",
    params: &["VPath", "bool"],
    returns: "()",
    declares_transport_error: true,
};

pub const SERVICE: InterfaceDesc = InterfaceDesc {
    name: "NamingService",
    methods: &[
        IS_DIRECTORY,
        LIST,
        CREATE_FILE,
        CREATE_DIRECTORY,
        DELETE,
        GET_STORAGE,
        LOCK,
        UNLOCK,
    ],
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error(transparent)]
    Rmi(#[from] RmiError),
}

/// Naming server operations available to clients.
pub trait Service {
    /// Whether the path names a directory. `NotFound` if absent.
    fn is_directory(&self, path: &VPath) -> Result<bool, ServiceError>;

    /// Child names of a directory. `NotFound` if absent or not a
    /// directory.
    fn list(&self, directory: &VPath) -> Result<Vec<String>, ServiceError>;

    /// Create an empty file on some registered storage server. `false` if
    /// the path exists or is the root; `NotFound` if the parent is absent
    /// or not a directory; `IllegalState` with no storage registered.
    fn create_file(&self, file: &VPath) -> Result<bool, ServiceError>;

    /// Create a directory node. `false` if the path exists or is the
    /// root; `NotFound` if the parent is absent or not a directory.
    fn create_directory(&self, directory: &VPath) -> Result<bool, ServiceError>;

    /// Delete a file or directory subtree everywhere it is replicated.
    /// `false` for the root; `NotFound` if absent.
    fn delete(&self, path: &VPath) -> Result<bool, ServiceError>;

    /// A stub for one storage server hosting the file. `NotFound` if
    /// absent or a directory.
    fn get_storage(&self, file: &VPath) -> Result<StorageStub, ServiceError>;

    /// Advisory lock for multi-operation transactions. Blocks until
    /// granted. `NotFound` if the path is absent.
    fn lock(&self, path: &VPath, exclusive: bool) -> Result<(), ServiceError>;

    /// Release an advisory lock taken with `lock`. `InvalidArgument` if
    /// the path is unknown to the lock manager.
    fn unlock(&self, path: &VPath, exclusive: bool) -> Result<(), ServiceError>;
}

/// Stub for the [`Service`] interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceStub {
    handle: StubHandle,
}

impl ServiceStub {
    pub fn new(addr: SocketAddr) -> Result<Self, RmiError> {
        Ok(Self {
            handle: StubHandle::new(&SERVICE, addr)?,
        })
    }

    pub fn with_host(host: &str, port: u16) -> Result<Self, RmiError> {
        Ok(Self {
            handle: StubHandle::with_host(&SERVICE, host, port)?,
        })
    }

    pub fn from_skeleton<D: Dispatch>(skeleton: &Skeleton<D>) -> Result<Self, RmiError> {
        Ok(Self {
            handle: StubHandle::from_skeleton(skeleton)?,
        })
    }

    pub fn handle(&self) -> &StubHandle {
        &self.handle
    }
}

impl std::fmt::Display for ServiceStub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.handle.fmt(f)
    }
}

impl Service for ServiceStub {
    fn is_directory(&self, path: &VPath) -> Result<bool, ServiceError> {
        self.handle.call(&IS_DIRECTORY, &(path,))?
    }

    fn list(&self, directory: &VPath) -> Result<Vec<String>, ServiceError> {
        self.handle.call(&LIST, &(directory,))?
    }

    fn create_file(&self, file: &VPath) -> Result<bool, ServiceError> {
        self.handle.call(&CREATE_FILE, &(file,))?
    }

    fn create_directory(&self, directory: &VPath) -> Result<bool, ServiceError> {
        self.handle.call(&CREATE_DIRECTORY, &(directory,))?
    }

    fn delete(&self, path: &VPath) -> Result<bool, ServiceError> {
        self.handle.call(&DELETE, &(path,))?
    }

    fn get_storage(&self, file: &VPath) -> Result<StorageStub, ServiceError> {
        self.handle.call(&GET_STORAGE, &(file,))?
    }

    fn lock(&self, path: &VPath, exclusive: bool) -> Result<(), ServiceError> {
        self.handle.call(&LOCK, &(path, exclusive))?
    }

    fn unlock(&self, path: &VPath, exclusive: bool) -> Result<(), ServiceError> {
        self.handle.call(&UNLOCK, &(path, exclusive))?
    }
}

/// [`Dispatch`] adapter for a [`Service`] server object.
pub struct ServiceDispatcher<S> {
    server: Arc<S>,
}

impl<S> ServiceDispatcher<S> {
    pub fn new(server: Arc<S>) -> Self {
        Self { server }
    }
}

impl<S: Service + Send + Sync + 'static> Dispatch for ServiceDispatcher<S> {
    fn interface(&self) -> &'static InterfaceDesc {
        &SERVICE
    }

    fn dispatch(&self, method: &MethodSig, args: &[u8]) -> Result<Outcome, RmiError> {
        match method.name {
            "is_directory" => {
                let (path,): (VPath,) = decode_args(args)?;
                encode_outcome(self.server.is_directory(&path))
            }
            "list" => {
                let (directory,): (VPath,) = decode_args(args)?;
                encode_outcome(self.server.list(&directory))
            }
            "create_file" => {
                let (file,): (VPath,) = decode_args(args)?;
                encode_outcome(self.server.create_file(&file))
            }
            "create_directory" => {
                let (directory,): (VPath,) = decode_args(args)?;
                encode_outcome(self.server.create_directory(&directory))
            }
            "delete" => {
                let (path,): (VPath,) = decode_args(args)?;
                encode_outcome(self.server.delete(&path))
            }
            "get_storage" => {
                let (file,): (VPath,) = decode_args(args)?;
                encode_outcome(self.server.get_storage(&file))
            }
            "lock" => {
                let (path, exclusive): (VPath, bool) = decode_args(args)?;
                encode_outcome(self.server.lock(&path, exclusive))
            }
            "unlock" => {
                let (path, exclusive): (VPath, bool) = decode_args(args)?;
                encode_outcome(self.server.unlock(&path, exclusive))
            }
            other => Err(RmiError::Dispatch(format!("unrouted method `{other}`"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn service_interface_is_remote() {
        assert!(SERVICE.is_remote());
        assert_eq!(SERVICE.methods.len(), 8);
    }

    /// A recording fake: enough to prove the dispatcher decodes arguments
    /// and routes to the right method.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl Service for Recorder {
        fn is_directory(&self, path: &VPath) -> Result<bool, ServiceError> {
            self.calls.lock().unwrap().push(format!("is_directory {path}"));
            Ok(true)
        }
        fn list(&self, directory: &VPath) -> Result<Vec<String>, ServiceError> {
            self.calls.lock().unwrap().push(format!("list {directory}"));
            Ok(vec!["a".into(), "b".into()])
        }
        fn create_file(&self, file: &VPath) -> Result<bool, ServiceError> {
            self.calls.lock().unwrap().push(format!("create_file {file}"));
            Ok(false)
        }
        fn create_directory(&self, directory: &VPath) -> Result<bool, ServiceError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("create_directory {directory}"));
            Ok(true)
        }
        fn delete(&self, path: &VPath) -> Result<bool, ServiceError> {
            self.calls.lock().unwrap().push(format!("delete {path}"));
            Err(ServiceError::NotFound(path.to_string()))
        }
        fn get_storage(&self, file: &VPath) -> Result<StorageStub, ServiceError> {
            self.calls.lock().unwrap().push(format!("get_storage {file}"));
            Ok(StorageStub::with_host("127.0.0.1", 9).unwrap())
        }
        fn lock(&self, path: &VPath, exclusive: bool) -> Result<(), ServiceError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("lock {path} {exclusive}"));
            Ok(())
        }
        fn unlock(&self, path: &VPath, exclusive: bool) -> Result<(), ServiceError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("unlock {path} {exclusive}"));
            Ok(())
        }
    }

    fn dispatch_one<R, E>(
        dispatcher: &ServiceDispatcher<Recorder>,
        sig: &MethodSig,
        args: &impl serde::Serialize,
    ) -> Result<R, E>
    where
        R: serde::de::DeserializeOwned,
        E: serde::de::DeserializeOwned,
    {
        let encoded = bincode::serialize(args).unwrap();
        match dispatcher.dispatch(sig, &encoded).unwrap() {
            Outcome::Return(bytes) => Ok(bincode::deserialize(&bytes).unwrap()),
            Outcome::Fault(bytes) => Err(bincode::deserialize(&bytes).unwrap()),
        }
    }

    #[test]
    fn dispatcher_routes_and_decodes() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = ServiceDispatcher::new(recorder.clone());
        let path = VPath::parse("/a/b").unwrap();

        let listed: Result<Vec<String>, ServiceError> =
            dispatch_one(&dispatcher, &LIST, &(&path,));
        assert_eq!(listed.unwrap(), vec!["a".to_string(), "b".to_string()]);

        let deleted: Result<bool, ServiceError> = dispatch_one(&dispatcher, &DELETE, &(&path,));
        assert_eq!(deleted, Err(ServiceError::NotFound("/a/b".to_string())));

        let locked: Result<(), ServiceError> =
            dispatch_one(&dispatcher, &LOCK, &(&path, true));
        assert!(locked.is_ok());

        let calls = recorder.calls.lock().unwrap();
        assert_eq!(
            calls.as_slice(),
            &["list /a/b", "delete /a/b", "lock /a/b true"]
        );
    }

    #[test]
    fn dispatcher_rejects_malformed_arguments() {
        let dispatcher = ServiceDispatcher::new(Arc::new(Recorder::default()));
        let result = dispatcher.dispatch(&LIST, &[0xFF, 0xFF, 0xFF]);
        assert!(matches!(result, Err(RmiError::Codec(_))));
    }
}
