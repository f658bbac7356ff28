//! Client side of the RMI runtime.
//!
//! A [`StubHandle`] is the serializable core of a typed stub: the remote
//! interface name plus the server's host and port. Typed stubs (one per
//! interface, defined alongside the interface) wrap a handle and turn each
//! trait method into a [`StubHandle::call`].
//!
//! Identity — equality, hashing, display — is served locally from the
//! handle and never touches the network, so stubs can live in hash maps
//! and log lines freely. Handles are plain values and may be returned from
//! remote methods; that is how the naming server hands out storage stubs.

use std::fmt;
use std::net::{Shutdown, SocketAddr, TcpStream};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::RmiError;
use crate::iface::{InterfaceDesc, MethodSig};
use crate::skeleton::{Dispatch, Skeleton};
use crate::wire::{read_frame, write_frame, Request, Response};

/// Address and interface of a remote object.
///
/// The host is kept as the string it was created with: a stub built with a
/// hostname override must dial that name, not whatever it resolved to at
/// creation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StubHandle {
    interface: String,
    host: String,
    port: u16,
}

impl StubHandle {
    /// Stub for a remote skeleton at an explicit address.
    pub fn new(desc: &InterfaceDesc, addr: SocketAddr) -> Result<Self, RmiError> {
        desc.ensure_remote()?;
        Ok(Self {
            interface: desc.name.to_string(),
            host: addr.ip().to_string(),
            port: addr.port(),
        })
    }

    /// Stub with an explicit hostname and port.
    pub fn with_host(desc: &InterfaceDesc, host: &str, port: u16) -> Result<Self, RmiError> {
        desc.ensure_remote()?;
        Ok(Self {
            interface: desc.name.to_string(),
            host: host.to_string(),
            port,
        })
    }

    /// Stub for a local skeleton, copying its address. The skeleton must
    /// have a fixed address or have been started.
    pub fn from_skeleton<D: Dispatch>(skeleton: &Skeleton<D>) -> Result<Self, RmiError> {
        let addr = skeleton.address().ok_or(RmiError::NoAddress)?;
        Self::new(skeleton.interface(), addr)
    }

    /// Stub for a local skeleton with the given externally-routable
    /// hostname in place of the skeleton's own (for NAT or multi-homed
    /// hosts). The skeleton's port is kept.
    pub fn from_skeleton_with_host<D: Dispatch>(
        skeleton: &Skeleton<D>,
        hostname: &str,
    ) -> Result<Self, RmiError> {
        let addr = skeleton.address().ok_or(RmiError::NoAddress)?;
        Self::with_host(skeleton.interface(), hostname, addr.port())
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Perform one remote invocation.
    ///
    /// Opens a fresh TCP connection, sends the request frame, reads the
    /// response frame and closes the connection. The outer `Result` is the
    /// transport outcome; the inner one is the method's own result with
    /// its declared error type.
    pub fn call<A, R, E>(&self, sig: &MethodSig, args: &A) -> Result<Result<R, E>, RmiError>
    where
        A: Serialize,
        R: DeserializeOwned,
        E: DeserializeOwned,
    {
        let mut stream =
            TcpStream::connect((self.host.as_str(), self.port)).map_err(|e| RmiError::Connect {
                addr: format!("{}:{}", self.host, self.port),
                detail: e.to_string(),
            })?;

        let request = Request {
            method: sig.name.to_string(),
            param_types: sig.params.iter().map(|p| p.to_string()).collect(),
            return_type: sig.returns.to_string(),
            args: bincode::serialize(args).map_err(RmiError::codec)?,
        };
        write_frame(&mut stream, &request)?;

        let response: Response = read_frame(&mut stream)?;
        let _ = stream.shutdown(Shutdown::Both);

        match response {
            Response::ReturnValue(value) => {
                Ok(Ok(bincode::deserialize(&value).map_err(RmiError::codec)?))
            }
            Response::MethodException(fault) => {
                Ok(Err(bincode::deserialize(&fault).map_err(RmiError::codec)?))
            }
            Response::RmiException(err) => Err(err),
        }
    }
}

impl fmt::Display for StubHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.interface, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    const NOOP: InterfaceDesc = InterfaceDesc {
        name: "Noop",
        methods: &[MethodSig {
            name: "noop",
            params: &[],
            returns: "()",
            declares_transport_error: true,
        }],
    };

    const BROKEN: InterfaceDesc = InterfaceDesc {
        name: "Broken",
        methods: &[MethodSig {
            name: "noop",
            params: &[],
            returns: "()",
            declares_transport_error: false,
        }],
    };

    fn hash_of(handle: &StubHandle) -> u64 {
        let mut hasher = DefaultHasher::new();
        handle.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn equality_and_hash_follow_interface_and_address() {
        // None of these dial anything; the port is never connected to.
        let a = StubHandle::with_host(&NOOP, "10.0.0.1", 9000).unwrap();
        let b = StubHandle::with_host(&NOOP, "10.0.0.1", 9000).unwrap();
        let other_port = StubHandle::with_host(&NOOP, "10.0.0.1", 9001).unwrap();
        let other_host = StubHandle::with_host(&NOOP, "10.0.0.2", 9000).unwrap();

        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(a, other_port);
        assert_ne!(a, other_host);
    }

    #[test]
    fn display_names_interface_and_address() {
        let stub = StubHandle::with_host(&NOOP, "storage.internal", 7000).unwrap();
        assert_eq!(stub.to_string(), "Noop@storage.internal:7000");
    }

    #[test]
    fn non_remote_interface_is_rejected() {
        let result = StubHandle::with_host(&BROKEN, "127.0.0.1", 1);
        assert!(matches!(result, Err(RmiError::NotRemote(_))));
    }

    #[test]
    fn handle_survives_serialization() {
        let stub = StubHandle::with_host(&NOOP, "127.0.0.1", 4242).unwrap();
        let bytes = bincode::serialize(&stub).unwrap();
        let back: StubHandle = bincode::deserialize(&bytes).unwrap();
        assert_eq!(stub, back);
    }
}
