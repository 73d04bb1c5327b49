//! Deferred values - resolved once, observed by any number of waiters
//!
//! A `Deferred<T>` is a cloneable handle onto a result that may not exist
//! yet. The paired `Resolver<T>` settles it exactly once; every clone of the
//! handle, whether it started waiting before or after settlement, observes
//! the same result. Dropping the resolver without settling rejects all
//! waiters with `ReplicationError::NotReady`, so an abandoned computation
//! never leaves anyone hanging.

use std::fmt;

use tokio::sync::watch;

use crate::{ReplicationError, ReplicationResult};

type Slot<T> = Option<ReplicationResult<T>>;

/// Write side of a deferred value
pub struct Resolver<T> {
    tx: watch::Sender<Slot<T>>,
}

/// Read side of a deferred value
pub struct Deferred<T> {
    rx: watch::Receiver<Slot<T>>,
}

impl<T: Clone> Deferred<T> {
    /// Create an unsettled value and the resolver that settles it
    pub fn pending() -> (Resolver<T>, Deferred<T>) {
        let (tx, rx) = watch::channel(None);
        (Resolver { tx }, Deferred { rx })
    }

    /// Create a value that is already resolved
    pub fn ready(value: T) -> Self {
        let (_tx, rx) = watch::channel(Some(Ok(value)));
        Deferred { rx }
    }

    /// Create a value that is already rejected
    pub fn rejected(err: ReplicationError) -> Self {
        let (_tx, rx) = watch::channel(Some(Err(err)));
        Deferred { rx }
    }

    /// Wait for the result
    pub async fn wait(&self) -> ReplicationResult<T> {
        let mut rx = self.rx.clone();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(result) = current {
                return result;
            }
            if rx.changed().await.is_err() {
                // Resolver dropped; it may still have settled right before.
                let last = rx.borrow().clone();
                return last.unwrap_or(Err(ReplicationError::NotReady));
            }
        }
    }

    /// Current result without waiting
    pub fn peek(&self) -> Option<ReplicationResult<T>> {
        self.rx.borrow().clone()
    }

    /// Whether the value has been resolved or rejected
    pub fn is_settled(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Whether the resolver is gone without settling
    pub fn is_abandoned(&self) -> bool {
        !self.is_settled() && self.rx.has_changed().is_err()
    }
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Deferred {
            rx: self.rx.clone(),
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.rx.borrow().as_ref() {
            None => "pending",
            Some(Ok(_)) => "resolved",
            Some(Err(_)) => "rejected",
        };
        write!(f, "Deferred({})", state)
    }
}

impl<T> Resolver<T> {
    /// Settle with a value
    pub fn resolve(self, value: T) {
        self.settle(Ok(value));
    }

    /// Settle with an error
    pub fn reject(self, err: ReplicationError) {
        self.settle(Err(err));
    }

    /// Settle with a result
    pub fn settle(self, result: ReplicationResult<T>) {
        self.tx.send_replace(Some(result));
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("waiters", &self.tx.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SubscriberId;

    #[tokio::test]
    async fn test_ready_and_rejected() {
        assert_eq!(Deferred::ready(5u32).wait().await, Ok(5));

        let err = ReplicationError::SubscriberGone(SubscriberId::new(1));
        assert_eq!(Deferred::<u32>::rejected(err.clone()).wait().await, Err(err));
    }

    #[tokio::test]
    async fn test_every_waiter_sees_one_resolution() {
        let (resolver, deferred) = Deferred::<u64>::pending();

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let d = deferred.clone();
                tokio::spawn(async move { d.wait().await })
            })
            .collect();

        tokio::task::yield_now().await;
        assert!(!deferred.is_settled());
        resolver.resolve(42);

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), Ok(42));
        }
        // Late waiters observe the same value.
        assert_eq!(deferred.wait().await, Ok(42));
        assert_eq!(deferred.peek(), Some(Ok(42)));
    }

    #[tokio::test]
    async fn test_dropped_resolver_rejects_not_ready() {
        let (resolver, deferred) = Deferred::<u64>::pending();
        let waiter = {
            let d = deferred.clone();
            tokio::spawn(async move { d.wait().await })
        };

        tokio::task::yield_now().await;
        drop(resolver);

        assert_eq!(waiter.await.unwrap(), Err(ReplicationError::NotReady));
        assert!(deferred.is_abandoned());
    }

    #[test]
    fn test_debug_reports_state() {
        let (resolver, deferred) = Deferred::<u8>::pending();
        assert_eq!(format!("{:?}", deferred), "Deferred(pending)");
        resolver.reject(ReplicationError::NotReady);
        assert_eq!(format!("{:?}", deferred), "Deferred(rejected)");
    }
}
