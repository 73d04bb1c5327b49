//! Transport interface
//!
//! Everything the replication core needs from the engine that actually
//! moves and displays objects. Placement is frame based: a detachment is
//! only safe to act on one tick after it is observed, and creation may
//! complete on a later tick than it was requested.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use ferry_core::{ObjectId, ReplicationError, SubscriberId};

/// Kind of placement object to create
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ObjectKind {
    /// Pure grouping object with no content of its own
    #[default]
    Folder,
    /// Content-bearing object (the unit that gets cloned)
    Item,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Folder => write!(f, "Folder"),
            ObjectKind::Item => write!(f, "Item"),
        }
    }
}

/// Transport failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("Parent not found: {0}")]
    ParentNotFound(ObjectId),

    #[error("Parenting {object} under {parent} would create a cycle")]
    Cycle { object: ObjectId, parent: ObjectId },
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

impl From<TransportError> for ReplicationError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ObjectNotFound(id) => ReplicationError::UnknownObject(id),
            other => ReplicationError::Transport(other.to_string()),
        }
    }
}

/// Stream of parent changes for one object (`None` = detached).
/// Closed when the object is destroyed.
pub type ParentWatch = mpsc::UnboundedReceiver<Option<ObjectId>>;

/// Stream of objects added under one parent
pub type ChildWatch = mpsc::UnboundedReceiver<ObjectId>;

/// The engine substrate
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Create a placement object under `parent`
    async fn create(&self, kind: ObjectKind, name: &str, parent: ObjectId)
        -> TransportResult<ObjectId>;

    /// Deep-copy an object; the copy starts detached
    fn clone_object(&self, source: ObjectId) -> TransportResult<ObjectId>;

    /// Re-parent an object, or detach it with `None`
    fn set_parent(&self, object: ObjectId, parent: Option<ObjectId>) -> TransportResult<()>;

    /// Destroy an object and everything under it. Unknown objects are ignored.
    fn destroy(&self, object: ObjectId);

    fn exists(&self, object: ObjectId) -> bool;

    fn parent_of(&self, object: ObjectId) -> Option<ObjectId>;

    fn name_of(&self, object: ObjectId) -> Option<String>;

    /// First child of `parent` named `name`
    fn find_child(&self, parent: ObjectId, name: &str) -> Option<ObjectId>;

    fn children(&self, parent: ObjectId) -> Vec<ObjectId>;

    /// Observe parent changes of `object`
    fn watch_parent(&self, object: ObjectId) -> TransportResult<ParentWatch>;

    /// Observe future child additions under `parent`
    fn watch_children(&self, parent: ObjectId) -> TransportResult<ChildWatch>;

    /// The subscriber-private delivery location.
    ///
    /// Waits until the location exists; `None` if the subscriber leaves first.
    async fn delivery_location(&self, subscriber: SubscriberId) -> Option<ObjectId>;

    /// Resolve on the next scheduling tick
    async fn next_tick(&self);
}
