//! # drift-rmi
//!
//! Synchronous remote method invocation over TCP.
//!
//! A remote interface is described as data (an [`InterfaceDesc`] listing
//! [`MethodSig`]s); the server side binds a [`Skeleton`] around a
//! [`Dispatch`] adapter, and the client side holds a serializable
//! [`StubHandle`] that opens a fresh connection per call. Every exchange is
//! one length-prefixed bincode [`wire::Request`] answered by one
//! [`wire::Response`], after which the connection is closed.
//!
//! Method identity is resolved on the server by (name, parameter types),
//! and the declared return type is verified before dispatch. User-declared
//! errors travel inside the response union; everything else surfaces as
//! [`RmiError`].

pub mod error;
pub mod iface;
pub mod skeleton;
pub mod stub;
pub mod wire;

pub use error::RmiError;
pub use iface::{InterfaceDesc, MethodSig};
pub use skeleton::{Dispatch, Outcome, Skeleton, SkeletonEvents};
pub use stub::StubHandle;
