//! # drift-proto
//!
//! The shared vocabulary of the drift filesystem: the [`VPath`] type used
//! by every interface, and the four remote interfaces — [`Service`] and
//! [`Registration`] on the naming server, [`Storage`] and [`Command`] on
//! storage servers — each with its typed stub and its dispatcher adapter
//! for [`drift_rmi::Skeleton`].

pub mod path;
pub mod registration;
pub mod service;
pub mod storage;

pub use path::{PathError, VPath};
pub use registration::{Registration, RegistrationDispatcher, RegistrationError, RegistrationStub};
pub use service::{Service, ServiceDispatcher, ServiceError, ServiceStub};
pub use storage::{
    Command, CommandDispatcher, CommandStub, Storage, StorageDispatcher, StorageError, StorageStub,
};
