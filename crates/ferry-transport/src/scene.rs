//! In-memory scene - a tick-driven object tree implementing `Transport`
//!
//! Objects live in an arena keyed by `ObjectId`. Time advances in ticks,
//! either by calling `step()` or by a heartbeat task. Creation through the
//! `Transport` trait lands on the tick after it was requested, which is
//! what makes concurrent creation requests observable to each other.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use ferry_core::{ObjectId, SubscriberId};

use crate::link::{
    ChildWatch, ObjectKind, ParentWatch, Transport, TransportError, TransportResult,
};

/// Scene configuration
#[derive(Clone, Debug)]
pub struct SceneConfig {
    /// Heartbeat interval
    pub tick_interval: Duration,
}

impl Default for SceneConfig {
    fn default() -> Self {
        SceneConfig {
            tick_interval: Duration::from_millis(16),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SceneStats {
    pub created: u64,
    pub cloned: u64,
    pub destroyed: u64,
}

struct Node {
    kind: ObjectKind,
    name: String,
    parent: Option<ObjectId>,
    children: Vec<ObjectId>,
    payload: Bytes,
    parent_watchers: Vec<mpsc::UnboundedSender<Option<ObjectId>>>,
    child_watchers: Vec<mpsc::UnboundedSender<ObjectId>>,
}

impl Node {
    fn new(kind: ObjectKind, name: &str, payload: Bytes) -> Self {
        Node {
            kind,
            name: name.to_string(),
            parent: None,
            children: Vec::new(),
            payload,
            parent_watchers: Vec::new(),
            child_watchers: Vec::new(),
        }
    }

    fn notify_parent(&mut self, parent: Option<ObjectId>) {
        self.parent_watchers.retain(|tx| tx.send(parent).is_ok());
    }

    fn notify_child(&mut self, child: ObjectId) {
        self.child_watchers.retain(|tx| tx.send(child).is_ok());
    }
}

#[derive(Default)]
struct SceneState {
    objects: HashMap<ObjectId, Node>,
    next_id: u64,
    locations: HashMap<SubscriberId, watch::Sender<Option<ObjectId>>>,
    stats: SceneStats,
}

impl SceneState {
    fn allocate(&mut self) -> ObjectId {
        self.next_id += 1;
        ObjectId::new(self.next_id)
    }

    fn insert(
        &mut self,
        kind: ObjectKind,
        name: &str,
        parent: Option<ObjectId>,
        payload: Bytes,
    ) -> TransportResult<ObjectId> {
        if let Some(parent) = parent {
            if !self.objects.contains_key(&parent) {
                return Err(TransportError::ParentNotFound(parent));
            }
        }
        let id = self.allocate();
        self.objects.insert(id, Node::new(kind, name, payload));
        if parent.is_some() {
            self.attach(id, parent)?;
        }
        Ok(id)
    }

    /// Move `object` under `parent`, notifying both sides
    fn attach(&mut self, object: ObjectId, parent: Option<ObjectId>) -> TransportResult<()> {
        let old = self
            .objects
            .get(&object)
            .ok_or(TransportError::ObjectNotFound(object))?
            .parent;
        if old == parent {
            return Ok(());
        }

        if let Some(parent) = parent {
            if !self.objects.contains_key(&parent) {
                return Err(TransportError::ParentNotFound(parent));
            }
            if self.is_within(object, parent) {
                return Err(TransportError::Cycle { object, parent });
            }
        }

        if let Some(old) = old.and_then(|p| self.objects.get_mut(&p)) {
            old.children.retain(|c| *c != object);
        }
        if let Some(node) = self.objects.get_mut(&object) {
            node.parent = parent;
            node.notify_parent(parent);
        }
        if let Some(new) = parent.and_then(|p| self.objects.get_mut(&p)) {
            new.children.push(object);
            new.notify_child(object);
        }
        Ok(())
    }

    /// Whether `candidate` is `object` itself or somewhere below it
    fn is_within(&self, object: ObjectId, mut candidate: ObjectId) -> bool {
        loop {
            if candidate == object {
                return true;
            }
            match self.objects.get(&candidate).and_then(|n| n.parent) {
                Some(up) => candidate = up,
                None => return false,
            }
        }
    }

    fn subtree(&self, root: ObjectId) -> Vec<ObjectId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.objects.get(&id) {
                out.push(id);
                stack.extend(node.children.iter().copied());
            }
        }
        out
    }

    fn destroy(&mut self, object: ObjectId) {
        if !self.objects.contains_key(&object) {
            return;
        }
        if let Err(err) = self.attach(object, None) {
            tracing::warn!(%object, %err, "detach before destroy failed");
        }
        for id in self.subtree(object) {
            if let Some(mut node) = self.objects.remove(&id) {
                // Descendants keep their parent until removal; announce the
                // detachment before the watch streams close.
                if id != object {
                    node.notify_parent(None);
                }
                self.stats.destroyed += 1;
            }
        }
    }

    fn deep_clone(&mut self, source: ObjectId, parent: Option<ObjectId>) -> TransportResult<ObjectId> {
        let (kind, name, payload, children) = {
            let node = self
                .objects
                .get(&source)
                .ok_or(TransportError::ObjectNotFound(source))?;
            (node.kind, node.name.clone(), node.payload.clone(), node.children.clone())
        };
        let id = self.allocate();
        let mut copy = Node::new(kind, &name, payload);
        copy.parent = parent;
        self.objects.insert(id, copy);
        for child in children {
            let child_copy = self.deep_clone(child, Some(id))?;
            if let Some(node) = self.objects.get_mut(&id) {
                node.children.push(child_copy);
            }
        }
        Ok(id)
    }
}

/// In-memory scene
pub struct Scene {
    state: Mutex<SceneState>,
    tick: watch::Sender<u64>,
    config: SceneConfig,
}

impl Scene {
    /// Create a scene with default configuration
    pub fn new() -> Self {
        Self::with_config(SceneConfig::default())
    }

    /// Create a scene with custom configuration
    pub fn with_config(config: SceneConfig) -> Self {
        let (tick, _) = watch::channel(0);
        Scene {
            state: Mutex::new(SceneState::default()),
            tick,
            config,
        }
    }

    /// Advance one tick, waking everything parked in `next_tick`
    pub fn step(&self) -> u64 {
        self.tick.send_modify(|t| *t += 1);
        *self.tick.borrow()
    }

    pub fn current_tick(&self) -> u64 {
        *self.tick.borrow()
    }

    /// Step the scene every `tick_interval` until it is dropped
    pub fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Scene> = Arc::downgrade(self);
        let period = self.config.tick_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(scene) => {
                        scene.step();
                    }
                    None => break,
                }
            }
        })
    }

    /// Insert an object synchronously (hosts use this for source objects)
    pub fn insert(
        &self,
        kind: ObjectKind,
        name: &str,
        parent: Option<ObjectId>,
        payload: impl Into<Bytes>,
    ) -> TransportResult<ObjectId> {
        let mut state = self.state.lock();
        let id = state.insert(kind, name, parent, payload.into())?;
        state.stats.created += 1;
        Ok(id)
    }

    pub fn payload_of(&self, object: ObjectId) -> Option<Bytes> {
        self.state.lock().objects.get(&object).map(|n| n.payload.clone())
    }

    pub fn kind_of(&self, object: ObjectId) -> Option<ObjectKind> {
        self.state.lock().objects.get(&object).map(|n| n.kind)
    }

    /// Materialize a subscriber's private delivery location
    pub fn add_subscriber(&self, subscriber: SubscriberId) -> ObjectId {
        let mut state = self.state.lock();
        if let Some(existing) = state.locations.get(&subscriber).and_then(|tx| *tx.borrow()) {
            return existing;
        }
        let id = state.allocate();
        let name = format!("Subscriber-{}", subscriber);
        state.objects.insert(id, Node::new(ObjectKind::Folder, &name, Bytes::new()));
        state.stats.created += 1;
        state
            .locations
            .entry(subscriber)
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(id));
        tracing::debug!(%subscriber, location = %id, "delivery location ready");
        id
    }

    /// Tear down a subscriber's delivery location and everything in it
    pub fn remove_subscriber(&self, subscriber: SubscriberId) {
        let mut state = self.state.lock();
        let location = state.locations.remove(&subscriber).and_then(|tx| {
            let location = *tx.borrow();
            location
        });
        if let Some(location) = location {
            state.destroy(location);
        }
    }

    pub fn location_of(&self, subscriber: SubscriberId) -> Option<ObjectId> {
        self.state
            .lock()
            .locations
            .get(&subscriber)
            .and_then(|tx| *tx.borrow())
    }

    pub fn object_count(&self) -> usize {
        self.state.lock().objects.len()
    }

    pub fn stats(&self) -> SceneStats {
        self.state.lock().stats.clone()
    }

    /// All objects below `root`, excluding `root`
    pub fn descendants(&self, root: ObjectId) -> Vec<ObjectId> {
        let state = self.state.lock();
        let mut all = state.subtree(root);
        all.retain(|id| *id != root);
        all
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for Scene {
    async fn create(
        &self,
        kind: ObjectKind,
        name: &str,
        parent: ObjectId,
    ) -> TransportResult<ObjectId> {
        if !self.exists(parent) {
            return Err(TransportError::ParentNotFound(parent));
        }
        // Placement lands on the next frame.
        self.next_tick().await;
        let mut state = self.state.lock();
        let id = state.insert(kind, name, Some(parent), Bytes::new())?;
        state.stats.created += 1;
        tracing::trace!(%id, %parent, name, "created");
        Ok(id)
    }

    fn clone_object(&self, source: ObjectId) -> TransportResult<ObjectId> {
        let mut state = self.state.lock();
        let id = state.deep_clone(source, None)?;
        state.stats.cloned += 1;
        Ok(id)
    }

    fn set_parent(&self, object: ObjectId, parent: Option<ObjectId>) -> TransportResult<()> {
        self.state.lock().attach(object, parent)
    }

    fn destroy(&self, object: ObjectId) {
        self.state.lock().destroy(object);
    }

    fn exists(&self, object: ObjectId) -> bool {
        self.state.lock().objects.contains_key(&object)
    }

    fn parent_of(&self, object: ObjectId) -> Option<ObjectId> {
        self.state.lock().objects.get(&object).and_then(|n| n.parent)
    }

    fn name_of(&self, object: ObjectId) -> Option<String> {
        self.state.lock().objects.get(&object).map(|n| n.name.clone())
    }

    fn find_child(&self, parent: ObjectId, name: &str) -> Option<ObjectId> {
        let state = self.state.lock();
        let node = state.objects.get(&parent)?;
        node.children
            .iter()
            .copied()
            .find(|c| state.objects.get(c).map_or(false, |n| n.name == name))
    }

    fn children(&self, parent: ObjectId) -> Vec<ObjectId> {
        self.state
            .lock()
            .objects
            .get(&parent)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    fn watch_parent(&self, object: ObjectId) -> TransportResult<ParentWatch> {
        let mut state = self.state.lock();
        let node = state
            .objects
            .get_mut(&object)
            .ok_or(TransportError::ObjectNotFound(object))?;
        let (tx, rx) = mpsc::unbounded_channel();
        node.parent_watchers.push(tx);
        Ok(rx)
    }

    fn watch_children(&self, parent: ObjectId) -> TransportResult<ChildWatch> {
        let mut state = self.state.lock();
        let node = state
            .objects
            .get_mut(&parent)
            .ok_or(TransportError::ObjectNotFound(parent))?;
        let (tx, rx) = mpsc::unbounded_channel();
        node.child_watchers.push(tx);
        Ok(rx)
    }

    async fn delivery_location(&self, subscriber: SubscriberId) -> Option<ObjectId> {
        let mut rx = {
            let mut state = self.state.lock();
            state
                .locations
                .entry(subscriber)
                .or_insert_with(|| watch::channel(None).0)
                .subscribe()
        };
        loop {
            let current = *rx.borrow_and_update();
            if current.is_some() {
                return current;
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }

    async fn next_tick(&self) {
        let mut rx = self.tick.subscribe();
        let start = *rx.borrow_and_update();
        while rx.changed().await.is_ok() {
            if *rx.borrow_and_update() > start {
                return;
            }
        }
    }
}
