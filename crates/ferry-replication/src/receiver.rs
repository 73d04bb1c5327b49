//! Receiver - the passive receiving side
//!
//! Never asks for anything: it watches the subscriber's delivery location
//! for the root namespace, the root for containers and each container for
//! items. Children that already existed when observation started are
//! replayed, so an initial batch that raced the receiver is not missed.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use ferry_core::{
    Deferred, NamespaceToken, ObjectId, ReplicationError, ReplicationResult, Resolver, Status,
    SubscriberId,
};
use ferry_transport::{ChildWatch, Transport};

use crate::config::ReceiverConfig;
use crate::container::Container;
use crate::notify::ItemReplicated;
use crate::registry::RootNamespace;

struct Slot {
    deferred: Deferred<Container>,
    resolver: Option<Resolver<Container>>,
}

impl Slot {
    fn pending() -> Self {
        let (resolver, deferred) = Deferred::pending();
        Slot {
            deferred,
            resolver: Some(resolver),
        }
    }
}

struct State {
    root_resolver: Option<Resolver<RootNamespace>>,
    containers: HashMap<String, Slot>,
    observers: Vec<JoinHandle<()>>,
}

struct Inner {
    subscriber: SubscriberId,
    transport: Arc<dyn Transport>,
    root: Deferred<RootNamespace>,
    state: Mutex<State>,
    items: broadcast::Sender<ItemReplicated>,
}

/// Receiving-side view of one subscriber's namespaces
pub struct Receiver {
    inner: Arc<Inner>,
    task: JoinHandle<()>,
}

impl Receiver {
    /// Start observing `location`, the subscriber's delivery location.
    ///
    /// `token` yields the root namespace token once the authoritative side
    /// has assigned it. Call `subscribe_items` before yielding to the
    /// runtime to see the replayed initial batch.
    pub fn attach<F>(
        transport: Arc<dyn Transport>,
        subscriber: SubscriberId,
        location: ObjectId,
        token: F,
    ) -> Self
    where
        F: Future<Output = ReplicationResult<NamespaceToken>> + Send + 'static,
    {
        Self::attach_with_config(transport, subscriber, location, token, ReceiverConfig::default())
    }

    pub fn attach_with_config<F>(
        transport: Arc<dyn Transport>,
        subscriber: SubscriberId,
        location: ObjectId,
        token: F,
        config: ReceiverConfig,
    ) -> Self
    where
        F: Future<Output = ReplicationResult<NamespaceToken>> + Send + 'static,
    {
        let (root_resolver, root) = Deferred::pending();
        let (items, _) = broadcast::channel(config.event_capacity.max(1));
        let inner = Arc::new(Inner {
            subscriber,
            transport,
            root,
            state: Mutex::new(State {
                root_resolver: Some(root_resolver),
                containers: HashMap::new(),
                observers: Vec::new(),
            }),
            items,
        });

        let task = tokio::spawn(inner.clone().observe_root(location, token));
        Receiver { inner, task }
    }

    pub fn subscriber(&self) -> SubscriberId {
        self.inner.subscriber
    }

    /// The root namespace, once it shows up in the delivery location
    pub async fn root_namespace(&self) -> ReplicationResult<RootNamespace> {
        self.inner.root.wait().await
    }

    pub fn lookup_root(&self) -> (Status, Option<RootNamespace>) {
        match self.inner.root.peek() {
            Some(Ok(root)) => (Status::Success, Some(root)),
            _ => (Status::NotReady, None),
        }
    }

    /// A container, once it shows up under the root namespace
    pub async fn container(&self, name: &str) -> ReplicationResult<Container> {
        let deferred = {
            let mut state = self.inner.state.lock();
            state
                .containers
                .entry(name.to_string())
                .or_insert_with(Slot::pending)
                .deferred
                .clone()
        };
        deferred.wait().await
    }

    /// Names of the containers seen so far
    pub fn known_containers(&self) -> Vec<String> {
        let state = self.inner.state.lock();
        let mut names: Vec<_> = state
            .containers
            .iter()
            .filter(|(_, slot)| slot.resolver.is_none())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Arrival events, one per object placed into a container
    pub fn subscribe_items(&self) -> broadcast::Receiver<ItemReplicated> {
        self.inner.items.subscribe()
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.task.abort();
        let mut state = self.inner.state.lock();
        for observer in state.observers.drain(..) {
            observer.abort();
        }
        // Dropping the resolvers rejects anyone still waiting.
        state.containers.clear();
        state.root_resolver = None;
    }
}

impl Inner {
    async fn observe_root<F>(self: Arc<Self>, location: ObjectId, token: F)
    where
        F: Future<Output = ReplicationResult<NamespaceToken>>,
    {
        let token = match token.await {
            Ok(token) => token,
            Err(err) => return self.settle_root(Err(err)),
        };
        let name = token.object_name();

        // A missing location means the subscriber is not (or no longer) there.
        let mut added = match self.transport.watch_children(location) {
            Ok(added) => added,
            Err(_) => return self.settle_root(Err(ReplicationError::NotReady)),
        };
        let object = match self.transport.find_child(location, &name) {
            Some(object) => object,
            None => loop {
                match added.recv().await {
                    Some(child) if self.transport.name_of(child).as_deref() == Some(name.as_str()) => {
                        break child;
                    }
                    Some(_) => {}
                    None => return self.settle_root(Err(ReplicationError::NotReady)),
                }
            },
        };
        drop(added);

        let root = RootNamespace {
            subscriber: self.subscriber,
            token,
            object,
        };
        tracing::debug!(subscriber = %self.subscriber, %object, "root namespace observed");
        self.settle_root(Ok(root.clone()));
        self.observe_containers(root).await;
    }

    async fn observe_containers(self: Arc<Self>, root: RootNamespace) {
        let Some((existing, mut added)) = self.replay(root.object) else {
            return;
        };
        for child in existing {
            self.discover_container(&root, child);
        }
        while let Some(child) = added.recv().await {
            self.discover_container(&root, child);
        }
    }

    async fn observe_items(self: Arc<Self>, container: String, object: ObjectId) {
        let Some((existing, mut added)) = self.replay(object) else {
            return;
        };
        for item in existing {
            self.announce(&container, item);
        }
        while let Some(item) = added.recv().await {
            self.announce(&container, item);
        }
    }

    /// Subscribe to additions first, then list what is already there.
    ///
    /// Additions queued before the listing was taken are folded into it, so
    /// the returned stream only carries what happens afterwards.
    fn replay(&self, parent: ObjectId) -> Option<(Vec<ObjectId>, ChildWatch)> {
        let mut added = self.transport.watch_children(parent).ok()?;
        let mut existing = self.transport.children(parent);
        while let Ok(child) = added.try_recv() {
            if !existing.contains(&child) && self.transport.parent_of(child) == Some(parent) {
                existing.push(child);
            }
        }
        Some((existing, added))
    }

    fn discover_container(self: &Arc<Self>, root: &RootNamespace, object: ObjectId) {
        let Some(name) = self.transport.name_of(object) else {
            return;
        };
        let mut state = self.state.lock();
        let slot = state
            .containers
            .entry(name.clone())
            .or_insert_with(Slot::pending);
        let Some(resolver) = slot.resolver.take() else {
            // Same name seen twice; the first one wins.
            return;
        };
        resolver.resolve(Container {
            name: name.clone(),
            object,
            root: root.clone(),
        });
        tracing::debug!(subscriber = %self.subscriber, container = %name, "container observed");
        let observer = tokio::spawn(self.clone().observe_items(name, object));
        state.observers.push(observer);
    }

    fn announce(&self, container: &str, object: ObjectId) {
        tracing::trace!(subscriber = %self.subscriber, container, %object, "item replicated");
        let _ = self.items.send(ItemReplicated {
            container: container.to_string(),
            object,
        });
    }

    fn settle_root(&self, result: ReplicationResult<RootNamespace>) {
        if let Some(resolver) = self.state.lock().root_resolver.take() {
            resolver.settle(result);
        }
    }
}
