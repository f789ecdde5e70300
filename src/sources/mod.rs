//! Source gateways and their coordination.
//!
//! A source is a version-controlled repository treated as an atomic unit of
//! dependency. The coordinator hands out one gateway per underlying source;
//! gateways own their on-disk caches and drive the injected VCS adapter.

pub mod coordinator;
pub mod gateway;
pub mod vcs;

pub use coordinator::SourceCoordinator;
pub use gateway::{ExistenceCheck, SourceGateway};
pub use vcs::{GitAdapter, VcsAdapter};
