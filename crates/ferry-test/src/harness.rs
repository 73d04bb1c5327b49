//! Test harness

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use ferry_core::{ObjectId, SubscriberId};
use ferry_replication::{Receiver, Replicator, ReplicatorConfig};
use ferry_transport::{ObjectKind, Scene, SceneConfig};

/// Install a fmt subscriber honouring `RUST_LOG`; safe to call repeatedly
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// A scene with a running heartbeat and a replicator on top of it
pub struct Harness {
    pub scene: Arc<Scene>,
    pub replicator: Replicator,
    tick_interval: Duration,
    heartbeat: JoinHandle<()>,
}

impl Harness {
    /// Must be called from inside a tokio runtime
    pub fn new() -> Self {
        HarnessBuilder::new().build().0
    }

    /// Bring a subscriber online on both sides
    pub fn connect(&self, id: u64) -> SubscriberId {
        let subscriber = SubscriberId::new(id);
        self.scene.add_subscriber(subscriber);
        self.replicator.subscriber_joined(subscriber);
        subscriber
    }

    /// Take a subscriber offline on both sides
    pub fn disconnect(&self, subscriber: SubscriberId) {
        self.replicator.subscriber_left(subscriber);
        self.scene.remove_subscriber(subscriber);
    }

    /// Receiving side for a connected subscriber
    pub fn receiver(&self, subscriber: SubscriberId) -> Option<Receiver> {
        let location = self.scene.location_of(subscriber)?;
        let replicator = self.replicator.clone();
        Some(Receiver::attach(
            self.scene.clone(),
            subscriber,
            location,
            async move { replicator.root(subscriber).await.map(|root| root.token) },
        ))
    }

    /// Authoritative source object, outside every subscriber's location
    pub fn source(&self, name: &str) -> ObjectId {
        self.scene
            .insert(ObjectKind::Item, name, None, Bytes::copy_from_slice(name.as_bytes()))
            .unwrap_or_default()
    }

    /// Let `n` heartbeat ticks pass
    pub async fn ticks(&self, n: u32) {
        tokio::time::sleep(self.tick_interval * n + Duration::from_millis(1)).await;
    }

    /// Objects under `subscriber`'s location carrying `source`'s payload
    pub fn copies_of(&self, subscriber: SubscriberId, source: ObjectId) -> Vec<ObjectId> {
        let (Some(location), Some(payload)) =
            (self.scene.location_of(subscriber), self.scene.payload_of(source))
        else {
            return Vec::new();
        };
        self.scene
            .descendants(location)
            .into_iter()
            .filter(|id| self.scene.payload_of(*id).as_ref() == Some(&payload))
            .collect()
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.heartbeat.abort();
    }
}

/// Harness builder
pub struct HarnessBuilder {
    subscribers: usize,
    scene: SceneConfig,
    replicator: ReplicatorConfig,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        HarnessBuilder {
            subscribers: 0,
            scene: SceneConfig::default(),
            replicator: ReplicatorConfig::default(),
        }
    }

    /// Connect subscribers 1..=count on build
    pub fn with_subscribers(mut self, count: usize) -> Self {
        self.subscribers = count;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.scene.tick_interval = interval;
        self
    }

    pub fn with_replicator_config(mut self, config: ReplicatorConfig) -> Self {
        self.replicator = config;
        self
    }

    /// Build the harness; must run inside a tokio runtime
    pub fn build(self) -> (Harness, Vec<SubscriberId>) {
        let tick_interval = self.scene.tick_interval;
        let scene = Arc::new(Scene::with_config(self.scene));
        let heartbeat = scene.spawn_heartbeat();
        let replicator = Replicator::with_config(scene.clone(), self.replicator);
        let harness = Harness {
            scene,
            replicator,
            tick_interval,
            heartbeat,
        };
        let subscribers = (1..=self.subscribers as u64)
            .map(|id| harness.connect(id))
            .collect();
        (harness, subscribers)
    }
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}
