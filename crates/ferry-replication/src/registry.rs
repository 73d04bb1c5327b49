//! Namespace registry - one private root namespace per subscriber
//!
//! The root is created lazily on first request, named with a fresh
//! unguessable token and placed in the subscriber's delivery location.
//! Concurrent requests share one deferred value, so the root is created at
//! most once per session.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use ferry_core::{
    Deferred, NamespaceToken, ObjectId, ReplicationError, ReplicationResult, Status, SubscriberId,
};
use ferry_transport::{ObjectKind, Transport};

use crate::notify::RootReady;
use crate::session::SessionTable;
use crate::watcher;

/// A subscriber's top-level private namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootNamespace {
    pub subscriber: SubscriberId,
    pub token: NamespaceToken,
    /// Backing placement object
    pub object: ObjectId,
}

#[derive(Clone)]
pub struct NamespaceRegistry {
    transport: Arc<dyn Transport>,
    sessions: Arc<Mutex<SessionTable>>,
    ready: broadcast::Sender<RootReady>,
    root_kind: ObjectKind,
}

impl NamespaceRegistry {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        sessions: Arc<Mutex<SessionTable>>,
        ready: broadcast::Sender<RootReady>,
        root_kind: ObjectKind,
    ) -> Self {
        NamespaceRegistry {
            transport,
            sessions,
            ready,
            root_kind,
        }
    }

    /// Root namespace of the subscriber's current session
    pub fn ensure_root(&self, subscriber: SubscriberId) -> ReplicationResult<Deferred<RootNamespace>> {
        let epoch = self.sessions.lock().epoch_of(subscriber)?;
        self.ensure_root_in(subscriber, epoch)
    }

    /// Root namespace of the session at `epoch`; `SubscriberGone` if that
    /// session has ended.
    pub(crate) fn ensure_root_in(
        &self,
        subscriber: SubscriberId,
        epoch: u64,
    ) -> ReplicationResult<Deferred<RootNamespace>> {
        let mut table = self.sessions.lock();
        let session = table.live_mut(subscriber, epoch)?;
        if let Some(root) = &session.root {
            return Ok(root.clone());
        }

        let (resolver, deferred) = Deferred::pending();
        session.root = Some(deferred.clone());
        session.root_resolver = Some(resolver);
        drop(table);

        let token = NamespaceToken::generate();
        tracing::debug!(%subscriber, ?token, "creating root namespace");
        tokio::spawn(self.clone().build_root(subscriber, epoch, token, deferred.clone()));
        Ok(deferred)
    }

    /// Token of the placed root, with `NotReady` while it is still pending
    pub fn lookup_token(&self, subscriber: SubscriberId) -> (Status, Option<NamespaceToken>) {
        let table = self.sessions.lock();
        match table.get(subscriber).ok().and_then(|s| s.resolved_root()) {
            Some(root) => (Status::Success, Some(root.token)),
            None => (Status::NotReady, None),
        }
    }

    pub fn subscribe_ready(&self) -> broadcast::Receiver<RootReady> {
        self.ready.subscribe()
    }

    async fn build_root(
        self,
        subscriber: SubscriberId,
        epoch: u64,
        token: NamespaceToken,
        abandoned: Deferred<RootNamespace>,
    ) {
        // Only this task settles the value, so `abandoned` finishing first
        // means the session closed and dropped the resolver.
        let location = tokio::select! {
            location = self.transport.delivery_location(subscriber) => location,
            _ = abandoned.wait() => return,
        };

        let created = match location {
            Some(location) => self
                .transport
                .create(self.root_kind, &token.object_name(), location)
                .await
                .map_err(ReplicationError::from),
            None => Err(ReplicationError::NotReady),
        };

        let mut table = self.sessions.lock();
        let session = match table.live_mut(subscriber, epoch) {
            Ok(session) => session,
            Err(_) => {
                drop(table);
                if let Ok(object) = created {
                    tracing::warn!(%subscriber, %object, "subscriber left during root creation");
                    self.transport.destroy(object);
                }
                return;
            }
        };
        let Some(resolver) = session.root_resolver.take() else {
            return;
        };

        match created {
            Ok(object) => {
                let root = RootNamespace {
                    subscriber,
                    token,
                    object,
                };
                resolver.resolve(root.clone());
                drop(table);

                tracing::debug!(%subscriber, %object, "root namespace ready");
                let _ = self.ready.send(RootReady { subscriber, token });
                self.watch_root(epoch, root);
            }
            Err(err) => {
                // Forget the failed attempt so the next call starts over.
                session.root = None;
                drop(table);
                tracing::debug!(%subscriber, %err, "root namespace failed");
                resolver.reject(err);
            }
        }
    }

    /// Forget the root if its object is removed behind our back
    fn watch_root(&self, epoch: u64, root: RootNamespace) {
        let sessions = self.sessions.clone();
        watcher::watch(self.transport.clone(), root.object, move || {
            let mut table = sessions.lock();
            if let Ok(session) = table.live_mut(root.subscriber, epoch) {
                if session.resolved_root().map(|r| r.object) == Some(root.object) {
                    tracing::debug!(subscriber = %root.subscriber, "root namespace removed");
                    session.root = None;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use ferry_transport::Scene;

    fn registry(scene: &Arc<Scene>) -> (NamespaceRegistry, Arc<Mutex<SessionTable>>) {
        let sessions = Arc::new(Mutex::new(SessionTable::default()));
        let (ready, _) = broadcast::channel(8);
        let registry =
            NamespaceRegistry::new(scene.clone(), sessions.clone(), ready, ObjectKind::Folder);
        (registry, sessions)
    }

    #[tokio::test(start_paused = true)]
    async fn test_root_created_once_under_location() {
        let scene = Arc::new(Scene::new());
        let _heartbeat = scene.spawn_heartbeat();
        let (registry, sessions) = registry(&scene);
        let s = SubscriberId::new(1);
        let location = scene.add_subscriber(s);
        sessions.lock().open(s);
        let mut ready = registry.subscribe_ready();

        let first = registry.ensure_root(s).unwrap();
        let second = registry.ensure_root(s).unwrap();
        assert_eq!(registry.lookup_token(s), (Status::NotReady, None));

        let a = first.wait().await.unwrap();
        let b = second.wait().await.unwrap();
        assert_eq!(a, b);
        assert_eq!(scene.children(location), vec![a.object]);
        assert_eq!(scene.name_of(a.object), Some(a.token.to_string()));
        assert_eq!(registry.lookup_token(s), (Status::Success, Some(a.token)));
        assert_eq!(ready.recv().await.unwrap(), RootReady { subscriber: s, token: a.token });
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_subscriber_is_gone() {
        let scene = Arc::new(Scene::new());
        let (registry, _) = registry(&scene);
        let s = SubscriberId::new(2);

        assert_eq!(
            registry.ensure_root(s).err(),
            Some(ReplicationError::SubscriberGone(s))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_mid_creation_rejects_not_ready() {
        let scene = Arc::new(Scene::new());
        let _heartbeat = scene.spawn_heartbeat();
        let (registry, sessions) = registry(&scene);
        let s = SubscriberId::new(3);
        sessions.lock().open(s);

        // No delivery location yet, so creation is parked.
        let root = registry.ensure_root(s).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!root.is_settled());

        sessions.lock().close(s);
        assert_eq!(root.wait().await, Err(ReplicationError::NotReady));
    }

    #[tokio::test(start_paused = true)]
    async fn test_location_vanishing_allows_retry() {
        let scene = Arc::new(Scene::new());
        let _heartbeat = scene.spawn_heartbeat();
        let (registry, sessions) = registry(&scene);
        let s = SubscriberId::new(4);
        sessions.lock().open(s);

        let root = registry.ensure_root(s).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        scene.remove_subscriber(s);
        assert_eq!(root.wait().await, Err(ReplicationError::NotReady));

        scene.add_subscriber(s);
        let retried = registry.ensure_root(s).unwrap().wait().await.unwrap();
        assert!(scene.exists(retried.object));
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_root_is_recreated_with_new_token() {
        let scene = Arc::new(Scene::new());
        let _heartbeat = scene.spawn_heartbeat();
        let (registry, sessions) = registry(&scene);
        let s = SubscriberId::new(5);
        scene.add_subscriber(s);
        sessions.lock().open(s);

        let first = registry.ensure_root(s).unwrap().wait().await.unwrap();
        scene.destroy(first.object);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = registry.ensure_root(s).unwrap().wait().await.unwrap();
        assert_ne!(first.object, second.object);
        assert_ne!(first.token, second.token);
    }
}
