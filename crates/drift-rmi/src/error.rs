use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The transport error kind.
///
/// Everything that can go wrong between the caller and the remote method
/// body — connecting, framing, encoding, method resolution, skeleton
/// lifecycle misuse — is an `RmiError`. The error is serializable because
/// the skeleton ships it back inside the response union; payloads are
/// rendered strings rather than source errors for that reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum RmiError {
    #[error("failed to connect to {addr}: {detail}")]
    Connect { addr: String, detail: String },

    #[error("i/o failure during exchange: {0}")]
    Io(String),

    #[error("serialization failure: {0}")]
    Codec(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("interface `{0}` is not remote: every method must declare the transport error")]
    NotRemote(String),

    #[error("interface `{interface}` has no method `{method}({params})`")]
    UnknownMethod {
        interface: String,
        method: String,
        params: String,
    },

    #[error("`{method}` returns `{declared}`, caller expected `{expected}`")]
    ReturnTypeMismatch {
        method: String,
        declared: String,
        expected: String,
    },

    #[error("skeleton is already started")]
    AlreadyStarted,

    #[error("skeleton has no address yet: bind it to a fixed address or start it first")]
    NoAddress,

    #[error("failed to bind listener on {addr}: {detail}")]
    Bind { addr: String, detail: String },

    #[error("dispatch failure: {0}")]
    Dispatch(String),
}

impl RmiError {
    pub(crate) fn io(err: std::io::Error) -> Self {
        RmiError::Io(err.to_string())
    }

    pub(crate) fn codec(err: bincode::Error) -> Self {
        RmiError::Codec(err.to_string())
    }
}
