//! Ferry Core - Fundamental types for per-subscriber replication
//!
//! This crate defines the types shared by every other Ferry crate:
//! - Identifiers (SubscriberId, ObjectId, NamespaceToken)
//! - Errors and lookup status codes
//! - Deferred values (resolve once, observed by many waiters)

pub mod deferred;
pub mod error;
pub mod id;

pub use deferred::*;
pub use error::*;
pub use id::*;
