//! Container manager - named sub-namespaces under a subscriber's root
//!
//! At most one container is ever created per (subscriber, name). The first
//! caller marks the name pending before yielding to the transport; callers
//! that arrive meanwhile park on that creation and re-check once it
//! finishes instead of creating a duplicate. The pending mark is held by a
//! guard, so an owner that is dropped mid-creation still clears it and wakes
//! the parked callers, one of which then takes over.

use std::sync::Arc;

use parking_lot::Mutex;

use ferry_core::{ObjectId, ReplicationError, ReplicationResult, SubscriberId};
use ferry_transport::{ObjectKind, Transport};

use crate::notify::Claim;
use crate::registry::{NamespaceRegistry, RootNamespace};
use crate::session::SessionTable;

/// A named container scoped to one subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub name: String,
    /// Backing placement object
    pub object: ObjectId,
    pub root: RootNamespace,
}

impl Container {
    pub fn subscriber(&self) -> SubscriberId {
        self.root.subscriber
    }
}

/// Ownership of one in-flight creation.
///
/// Clears the pending mark and wakes parked callers on `release`, or on drop
/// if the owner never got that far.
struct PendingClaim {
    sessions: Arc<Mutex<SessionTable>>,
    subscriber: SubscriberId,
    epoch: u64,
    name: String,
    released: bool,
}

impl PendingClaim {
    fn new(
        sessions: Arc<Mutex<SessionTable>>,
        subscriber: SubscriberId,
        epoch: u64,
        name: &str,
    ) -> Self {
        PendingClaim {
            sessions,
            subscriber,
            epoch,
            name: name.to_string(),
            released: false,
        }
    }

    /// Number of callers woken. Fails if the session is gone or was replaced.
    fn release(&mut self) -> ReplicationResult<usize> {
        self.released = true;
        self.sessions
            .lock()
            .live_mut(self.subscriber, self.epoch)
            .map(|session| session.pending.finish(&self.name))
    }
}

impl Drop for PendingClaim {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Ok(woken) = self.release() {
            tracing::debug!(
                subscriber = %self.subscriber,
                container = %self.name,
                woken,
                "container creation abandoned"
            );
        }
    }
}

#[derive(Clone)]
pub struct ContainerManager {
    registry: NamespaceRegistry,
    transport: Arc<dyn Transport>,
    sessions: Arc<Mutex<SessionTable>>,
    container_kind: ObjectKind,
}

impl ContainerManager {
    pub(crate) fn new(
        registry: NamespaceRegistry,
        transport: Arc<dyn Transport>,
        sessions: Arc<Mutex<SessionTable>>,
        container_kind: ObjectKind,
    ) -> Self {
        ContainerManager {
            registry,
            transport,
            sessions,
            container_kind,
        }
    }

    /// Resolve the container, creating it on first use
    pub async fn get_or_create(
        &self,
        subscriber: SubscriberId,
        name: &str,
    ) -> ReplicationResult<Container> {
        let epoch = self.sessions.lock().epoch_of(subscriber)?;
        self.get_or_create_in(subscriber, epoch, name).await
    }

    pub(crate) async fn get_or_create_in(
        &self,
        subscriber: SubscriberId,
        epoch: u64,
        name: &str,
    ) -> ReplicationResult<Container> {
        loop {
            let root = self.registry.ensure_root_in(subscriber, epoch)?.wait().await?;

            if let Some(object) = self.transport.find_child(root.object, name) {
                return Ok(Container {
                    name: name.to_string(),
                    object,
                    root,
                });
            }

            let claim = self.sessions.lock().live_mut(subscriber, epoch)?.pending.claim(name);
            match claim {
                Claim::Wait(ready) => {
                    tracing::debug!(%subscriber, container = name, "joining in-flight creation");
                    // An error here means the session closed; the next pass
                    // reports it.
                    let _ = ready.await;
                }
                Claim::Owner => {
                    let mut claim =
                        PendingClaim::new(self.sessions.clone(), subscriber, epoch, name);
                    // Another owner may have finished between the lookup and the claim.
                    if let Some(object) = self.transport.find_child(root.object, name) {
                        claim.release()?;
                        return Ok(Container {
                            name: name.to_string(),
                            object,
                            root,
                        });
                    }
                    return self.create(claim, root).await;
                }
            }
        }
    }

    async fn create(
        &self,
        mut claim: PendingClaim,
        root: RootNamespace,
    ) -> ReplicationResult<Container> {
        let subscriber = claim.subscriber;
        let name = claim.name.clone();
        tracing::debug!(%subscriber, container = %name, "creating container");
        let created = self
            .transport
            .create(self.container_kind, &name, root.object)
            .await;

        let woken = match claim.release() {
            Ok(woken) => woken,
            Err(err) => {
                if let Ok(object) = created {
                    self.transport.destroy(object);
                }
                return Err(err);
            }
        };
        if woken > 0 {
            tracing::debug!(%subscriber, container = %name, woken, "container ready");
        }

        let object = created.map_err(ReplicationError::from)?;
        Ok(Container { name, object, root })
    }

    /// Destroy everything inside the container, keeping the container.
    ///
    /// Returns the objects that were removed.
    pub async fn clear(
        &self,
        subscriber: SubscriberId,
        name: &str,
    ) -> ReplicationResult<Vec<ObjectId>> {
        let container = self.get_or_create(subscriber, name).await?;
        let children = self.transport.children(container.object);
        for child in &children {
            self.transport.destroy(*child);
        }
        tracing::debug!(%subscriber, container = name, removed = children.len(), "container cleared");
        Ok(children)
    }
}
