//! Subscriber sessions
//!
//! Every piece of per-subscriber state lives in one `Session`, so a
//! disconnect is a single removal. The epoch distinguishes a reconnected
//! subscriber from the session that work was started against.

use std::collections::HashMap;

use ferry_core::{Deferred, ObjectId, ReplicationError, ReplicationResult, Resolver, SubscriberId};

use crate::notify::PendingCreations;
use crate::registry::RootNamespace;

#[derive(Debug)]
pub(crate) struct Session {
    pub epoch: u64,
    /// Root namespace, once requested
    pub root: Option<Deferred<RootNamespace>>,
    /// Held here so closing the session rejects anyone still waiting
    pub root_resolver: Option<Resolver<RootNamespace>>,
    pub pending: PendingCreations,
    /// source -> live clone
    pub records: HashMap<ObjectId, ObjectId>,
}

impl Session {
    fn new(epoch: u64) -> Self {
        Session {
            epoch,
            root: None,
            root_resolver: None,
            pending: PendingCreations::default(),
            records: HashMap::new(),
        }
    }

    /// Root object, if it has been placed
    pub fn resolved_root(&self) -> Option<RootNamespace> {
        match self.root.as_ref()?.peek() {
            Some(Ok(root)) => Some(root),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct SessionTable {
    sessions: HashMap<SubscriberId, Session>,
    next_epoch: u64,
}

impl SessionTable {
    /// Open a session; joining twice keeps the existing one
    pub fn open(&mut self, subscriber: SubscriberId) -> u64 {
        if let Some(session) = self.sessions.get(&subscriber) {
            return session.epoch;
        }
        self.next_epoch += 1;
        let epoch = self.next_epoch;
        self.sessions.insert(subscriber, Session::new(epoch));
        epoch
    }

    pub fn close(&mut self, subscriber: SubscriberId) -> Option<Session> {
        self.sessions.remove(&subscriber)
    }

    pub fn get(&self, subscriber: SubscriberId) -> ReplicationResult<&Session> {
        self.sessions
            .get(&subscriber)
            .ok_or(ReplicationError::SubscriberGone(subscriber))
    }

    pub fn get_mut(&mut self, subscriber: SubscriberId) -> ReplicationResult<&mut Session> {
        self.sessions
            .get_mut(&subscriber)
            .ok_or(ReplicationError::SubscriberGone(subscriber))
    }

    /// The session for `subscriber`, only if it is still the one at `epoch`
    pub fn live_mut(
        &mut self,
        subscriber: SubscriberId,
        epoch: u64,
    ) -> ReplicationResult<&mut Session> {
        match self.sessions.get_mut(&subscriber) {
            Some(session) if session.epoch == epoch => Ok(session),
            _ => Err(ReplicationError::SubscriberGone(subscriber)),
        }
    }

    pub fn epoch_of(&self, subscriber: SubscriberId) -> ReplicationResult<u64> {
        self.get(subscriber).map(|s| s.epoch)
    }

    pub fn contains(&self, subscriber: SubscriberId) -> bool {
        self.sessions.contains_key(&subscriber)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}
