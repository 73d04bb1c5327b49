//! Ferry Replication - selective per-subscriber distribution
//!
//! An object sent to one subscriber is never visible to another unless it is
//! sent there as well. Objects are grouped into named containers under a
//! per-subscriber root namespace, so the receiving side can tell why an
//! object arrived without looking inside it.
//!
//! Components, leaves first:
//! - `watcher`: disposal detection with a one-tick debounce
//! - `registry`: per-subscriber root namespaces
//! - `container`: named containers with coalesced creation
//! - `tracker`: source -> clone records, idempotent distribute, revoke
//! - `notify`: readiness signals and arrival events
//!
//! `Replicator` is the authoritative-side entry point; `Receiver` is the
//! passive receiving side.

pub mod config;
pub mod container;
pub mod notify;
pub mod receiver;
pub mod registry;
pub mod replicator;
mod session;
pub mod tracker;
pub mod watcher;

pub use config::*;
pub use container::{Container, ContainerManager};
pub use notify::{ItemReplicated, RootReady};
pub use receiver::Receiver;
pub use registry::{NamespaceRegistry, RootNamespace};
pub use replicator::Replicator;
pub use tracker::{ReplicationRecord, ReplicationTracker};
pub use watcher::{watch, DisposalWatch};
