//! The storage-facing interface of the naming server.
//!
//! A storage server calls [`Registration::register`] exactly once at
//! startup, announcing its two stubs and the files it already holds. The
//! naming server mounts the unknown files and answers with the list of
//! duplicates the storage server must delete locally.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use drift_rmi::wire::{decode_args, encode_outcome};
use drift_rmi::{Dispatch, InterfaceDesc, MethodSig, Outcome, RmiError, Skeleton, StubHandle};

use crate::path::VPath;
use crate::storage::{CommandStub, StorageStub};

pub const REGISTER: MethodSig = MethodSig {
    name: "register",
    params: &["StorageStub", "CommandStub", "Vec<VPath>"],
    returns: "Vec<VPath>",
    declares_transport_error: true,
};

pub const REGISTRATION: InterfaceDesc = InterfaceDesc {
    name: "Registration",
    methods: &[REGISTER],
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum RegistrationError {
    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error(transparent)]
    Rmi(#[from] RmiError),
}

pub trait Registration {
    /// Announce a storage server. Returns the paths the caller must
    /// delete locally because they already exist in the tree. Registering
    /// the same client stub twice fails with `IllegalState`.
    fn register(
        &self,
        storage: StorageStub,
        command: CommandStub,
        files: Vec<VPath>,
    ) -> Result<Vec<VPath>, RegistrationError>;
}

/// Stub for the [`Registration`] interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationStub {
    handle: StubHandle,
}

impl RegistrationStub {
    pub fn new(addr: SocketAddr) -> Result<Self, RmiError> {
        Ok(Self {
            handle: StubHandle::new(&REGISTRATION, addr)?,
        })
    }

    pub fn with_host(host: &str, port: u16) -> Result<Self, RmiError> {
        Ok(Self {
            handle: StubHandle::with_host(&REGISTRATION, host, port)?,
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

impl std::fmt::Display for RegistrationStub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.handle.fmt(f)
    }
}

impl Registration for RegistrationStub {
    fn register(
        &self,
        storage: StorageStub,
        command: CommandStub,
        files: Vec<VPath>,
    ) -> Result<Vec<VPath>, RegistrationError> {
        self.handle.call(&REGISTER, &(storage, command, files))?
    }
}

/// [`Dispatch`] adapter for a [`Registration`] server object.
pub struct RegistrationDispatcher<R> {
    server: Arc<R>,
}

impl<R> RegistrationDispatcher<R> {
    pub fn new(server: Arc<R>) -> Self {
        Self { server }
    }
}

impl<R: Registration + Send + Sync + 'static> Dispatch for RegistrationDispatcher<R> {
    fn interface(&self) -> &'static InterfaceDesc {
        &REGISTRATION
    }

    fn dispatch(&self, method: &MethodSig, args: &[u8]) -> Result<Outcome, RmiError> {
        match method.name {
            "register" => {
                let (storage, command, files): (StorageStub, CommandStub, Vec<VPath>) =
                    decode_args(args)?;
                encode_outcome(self.server.register(storage, command, files))
            }
            other => Err(RmiError::Dispatch(format!("unrouted method `{other}`"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_interface_is_remote() {
        assert!(REGISTRATION.is_remote());
        assert!(REGISTRATION
            .find(
                "register",
                &[
                    "StorageStub".to_string(),
                    "CommandStub".to_string(),
                    "Vec<VPath>".to_string()
                ]
            )
            .is_some());
    }
}
