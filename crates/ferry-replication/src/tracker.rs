//! Replication tracker - which clone of which source each subscriber holds
//!
//! Records are keyed by the identity of the source object. Callers must
//! pass the original source, never a clone: a clone is a different object
//! and gets its own, unrelated record.

use std::collections::hash_map::Entry;
use std::sync::Arc;

use parking_lot::Mutex;

use ferry_core::{ObjectId, ReplicationError, ReplicationResult, SubscriberId};
use ferry_transport::Transport;

use crate::container::ContainerManager;
use crate::session::SessionTable;
use crate::watcher;

/// One live distribution: `clone` is `subscriber`'s copy of `source`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplicationRecord {
    pub source: ObjectId,
    pub subscriber: SubscriberId,
    pub clone: ObjectId,
}

#[derive(Clone)]
pub struct ReplicationTracker {
    containers: ContainerManager,
    transport: Arc<dyn Transport>,
    sessions: Arc<Mutex<SessionTable>>,
}

impl ReplicationTracker {
    pub(crate) fn new(
        containers: ContainerManager,
        transport: Arc<dyn Transport>,
        sessions: Arc<Mutex<SessionTable>>,
    ) -> Self {
        ReplicationTracker {
            containers,
            transport,
            sessions,
        }
    }

    /// Place a clone of `source` in the subscriber's container.
    ///
    /// Returns the existing clone while a record for (source, subscriber)
    /// is live, whichever container it was placed in.
    pub async fn distribute(
        &self,
        subscriber: SubscriberId,
        container: &str,
        source: ObjectId,
    ) -> ReplicationResult<ObjectId> {
        let epoch = {
            let table = self.sessions.lock();
            let session = table.get(subscriber)?;
            if let Some(clone) = session.records.get(&source) {
                return Ok(*clone);
            }
            session.epoch
        };
        if !self.transport.exists(source) {
            return Err(ReplicationError::UnknownObject(source));
        }

        let target = self
            .containers
            .get_or_create_in(subscriber, epoch, container)
            .await?;

        // Another distribute of the same pair may have finished while we
        // waited for the container.
        if let Some(clone) = self.live_clone(subscriber, epoch, source)? {
            return Ok(clone);
        }

        let clone = self.transport.clone_object(source)?;
        if let Err(err) = self.transport.set_parent(clone, Some(target.object)) {
            self.transport.destroy(clone);
            return Err(err.into());
        }

        let winner = self.record(subscriber, epoch, source, clone)?;
        if winner != clone {
            return Ok(winner);
        }

        let sessions = self.sessions.clone();
        watcher::watch(self.transport.clone(), clone, move || {
            let mut table = sessions.lock();
            if let Ok(session) = table.live_mut(subscriber, epoch) {
                // A revoke followed by a new distribute may already have
                // replaced this clone; only drop the record if it is ours.
                if session.records.get(&source) == Some(&clone) {
                    session.records.remove(&source);
                    tracing::debug!(%subscriber, %source, %clone, "clone disposed, record dropped");
                }
            }
        });

        tracing::debug!(%subscriber, %source, %clone, container, "distributed");
        Ok(clone)
    }

    /// Destroy the subscriber's clone of `source`, if any
    pub fn revoke(&self, subscriber: SubscriberId, source: ObjectId) {
        let clone = self
            .sessions
            .lock()
            .get_mut(subscriber)
            .ok()
            .and_then(|session| session.records.remove(&source));

        if let Some(clone) = clone {
            tracing::debug!(%subscriber, %source, %clone, "revoked");
            self.transport.destroy(clone);
        }
    }

    /// Drop records whose clone is one of `clones` (they were destroyed)
    pub fn forget(&self, subscriber: SubscriberId, clones: &[ObjectId]) -> usize {
        let mut table = self.sessions.lock();
        let Ok(session) = table.get_mut(subscriber) else {
            return 0;
        };
        let before = session.records.len();
        session.records.retain(|_, clone| !clones.contains(clone));
        before - session.records.len()
    }

    /// Current clone of `source` held by `subscriber`
    pub fn clone_of(&self, subscriber: SubscriberId, source: ObjectId) -> Option<ObjectId> {
        let table = self.sessions.lock();
        table.get(subscriber).ok()?.records.get(&source).copied()
    }

    pub fn records(&self, subscriber: SubscriberId) -> Vec<ReplicationRecord> {
        let table = self.sessions.lock();
        let Ok(session) = table.get(subscriber) else {
            return Vec::new();
        };
        session
            .records
            .iter()
            .map(|(source, clone)| ReplicationRecord {
                source: *source,
                subscriber,
                clone: *clone,
            })
            .collect()
    }

    /// Record `clone` for the pair unless another clone got there first.
    ///
    /// Returns the clone that holds the record; a losing clone is destroyed.
    fn record(
        &self,
        subscriber: SubscriberId,
        epoch: u64,
        source: ObjectId,
        clone: ObjectId,
    ) -> ReplicationResult<ObjectId> {
        let existing = {
            let mut table = self.sessions.lock();
            match table.live_mut(subscriber, epoch) {
                Ok(session) => match session.records.entry(source) {
                    Entry::Occupied(entry) => Ok(Some(*entry.get())),
                    Entry::Vacant(entry) => {
                        entry.insert(clone);
                        Ok(None)
                    }
                },
                Err(err) => Err(err),
            }
        };
        match existing {
            Ok(None) => Ok(clone),
            Ok(Some(winner)) => {
                tracing::debug!(%subscriber, %source, %clone, %winner, "lost distribute race");
                self.transport.destroy(clone);
                Ok(winner)
            }
            Err(err) => {
                self.transport.destroy(clone);
                Err(err)
            }
        }
    }

    fn live_clone(
        &self,
        subscriber: SubscriberId,
        epoch: u64,
        source: ObjectId,
    ) -> ReplicationResult<Option<ObjectId>> {
        let mut table = self.sessions.lock();
        let session = table.live_mut(subscriber, epoch)?;
        Ok(session.records.get(&source).copied())
    }
}
