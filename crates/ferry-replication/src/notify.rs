//! Notification layer
//!
//! Container readiness is tracked per key: each in-flight creation owns the
//! list of callers parked on it, so finishing one creation wakes exactly the
//! callers that asked for that container and nobody else.

use std::collections::HashMap;

use tokio::sync::oneshot;

use ferry_core::{NamespaceToken, ObjectId, SubscriberId};

/// A subscriber's root namespace has been placed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootReady {
    pub subscriber: SubscriberId,
    pub token: NamespaceToken,
}

/// An object landed in a container (receiving side)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReplicated {
    pub container: String,
    pub object: ObjectId,
}

/// Outcome of trying to start a container creation
#[derive(Debug)]
pub(crate) enum Claim {
    /// Caller must create the container and then call `finish`
    Owner,
    /// Creation already in flight; resolves when it finishes
    Wait(oneshot::Receiver<()>),
}

/// Containers currently being created for one subscriber, with the callers
/// waiting on each. Empty whenever no creation is in flight.
#[derive(Debug, Default)]
pub(crate) struct PendingCreations {
    waiting: HashMap<String, Vec<oneshot::Sender<()>>>,
}

impl PendingCreations {
    /// Mark `name` pending, or join the creation already in flight
    pub fn claim(&mut self, name: &str) -> Claim {
        match self.waiting.get_mut(name) {
            Some(waiters) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Claim::Wait(rx)
            }
            None => {
                self.waiting.insert(name.to_string(), Vec::new());
                Claim::Owner
            }
        }
    }

    /// Clear the pending mark, then wake everyone parked on it
    pub fn finish(&mut self, name: &str) -> usize {
        let Some(waiters) = self.waiting.remove(name) else {
            return 0;
        };
        let woken = waiters.len();
        for tx in waiters {
            let _ = tx.send(());
        }
        woken
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_claim_owns_creation() {
        let mut pending = PendingCreations::default();

        assert!(matches!(pending.claim("chairs"), Claim::Owner));
        assert_eq!(pending.len(), 1);
        assert!(matches!(pending.claim("chairs"), Claim::Wait(_)));
        // Different key, independent creation.
        assert!(matches!(pending.claim("tables"), Claim::Owner));
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn test_finish_clears_then_wakes_waiters() {
        let mut pending = PendingCreations::default();
        pending.claim("chairs");
        let mut waiters: Vec<_> = (0..3)
            .map(|_| match pending.claim("chairs") {
                Claim::Wait(rx) => rx,
                Claim::Owner => panic!("second claim must wait"),
            })
            .collect();

        assert_eq!(pending.finish("chairs"), 3);
        assert!(pending.is_empty());
        for rx in &mut waiters {
            assert_eq!(rx.try_recv(), Ok(()));
        }
        assert_eq!(pending.finish("chairs"), 0);
    }

    #[test]
    fn test_dropping_pending_set_releases_waiters() {
        let mut pending = PendingCreations::default();
        pending.claim("chairs");
        let Claim::Wait(mut rx) = pending.claim("chairs") else {
            panic!("second claim must wait");
        };

        drop(pending);
        assert!(rx.try_recv().is_err());
    }
}
