//! Replicator - authoritative-side entry point
//!
//! Wires the registry, container manager and tracker around one session
//! table. The host reports subscriber connects and disconnects; everything
//! else is driven by the calls below.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use ferry_core::{NamespaceToken, ObjectId, ReplicationResult, Status, SubscriberId};
use ferry_transport::Transport;

use crate::config::ReplicatorConfig;
use crate::container::{Container, ContainerManager};
use crate::notify::RootReady;
use crate::registry::{NamespaceRegistry, RootNamespace};
use crate::session::SessionTable;
use crate::tracker::{ReplicationRecord, ReplicationTracker};

#[derive(Clone)]
pub struct Replicator {
    transport: Arc<dyn Transport>,
    sessions: Arc<Mutex<SessionTable>>,
    registry: NamespaceRegistry,
    containers: ContainerManager,
    tracker: ReplicationTracker,
}

impl Replicator {
    /// Create a replicator with default configuration
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, ReplicatorConfig::default())
    }

    /// Create a replicator with custom configuration
    pub fn with_config(transport: Arc<dyn Transport>, config: ReplicatorConfig) -> Self {
        let sessions = Arc::new(Mutex::new(SessionTable::default()));
        let (ready, _) = broadcast::channel(config.event_capacity.max(1));
        let registry =
            NamespaceRegistry::new(transport.clone(), sessions.clone(), ready, config.root_kind);
        let containers = ContainerManager::new(
            registry.clone(),
            transport.clone(),
            sessions.clone(),
            config.container_kind,
        );
        let tracker = ReplicationTracker::new(containers.clone(), transport.clone(), sessions.clone());

        Replicator {
            transport,
            sessions,
            registry,
            containers,
            tracker,
        }
    }

    // ========================================================================
    // SESSION LIFECYCLE
    // ========================================================================

    /// Start tracking a connected subscriber
    pub fn subscriber_joined(&self, subscriber: SubscriberId) {
        let epoch = self.sessions.lock().open(subscriber);
        tracing::info!(%subscriber, epoch, "subscriber joined");
    }

    /// Purge everything held for a subscriber.
    ///
    /// Pending lookups reject, parked creations wake and fail, records are
    /// dropped, and the root namespace (with every clone in it) is destroyed.
    pub fn subscriber_left(&self, subscriber: SubscriberId) {
        let Some(session) = self.sessions.lock().close(subscriber) else {
            return;
        };
        let root = session.resolved_root();
        let records = session.records.len();
        drop(session);

        if let Some(root) = root {
            self.transport.destroy(root.object);
        }
        tracing::info!(%subscriber, records, "subscriber left");
    }

    pub fn is_connected(&self, subscriber: SubscriberId) -> bool {
        self.sessions.lock().contains(subscriber)
    }

    // ========================================================================
    // NAMESPACES
    // ========================================================================

    /// The subscriber's root namespace, created on first use
    pub async fn root(&self, subscriber: SubscriberId) -> ReplicationResult<RootNamespace> {
        self.registry.ensure_root(subscriber)?.wait().await
    }

    /// Synchronous token lookup for the receiving side
    pub fn lookup_token(&self, subscriber: SubscriberId) -> (Status, Option<NamespaceToken>) {
        self.registry.lookup_token(subscriber)
    }

    /// Fires once per root namespace placement
    pub fn subscribe_root_ready(&self) -> broadcast::Receiver<RootReady> {
        self.registry.subscribe_ready()
    }

    pub async fn get_container(
        &self,
        subscriber: SubscriberId,
        container: &str,
    ) -> ReplicationResult<Container> {
        self.containers.get_or_create(subscriber, container).await
    }

    /// Empty a container; records for clones inside it are dropped at once
    pub async fn clear_container(
        &self,
        subscriber: SubscriberId,
        container: &str,
    ) -> ReplicationResult<()> {
        let removed = self.containers.clear(subscriber, container).await?;
        self.tracker.forget(subscriber, &removed);
        Ok(())
    }

    // ========================================================================
    // REPLICATION
    // ========================================================================

    /// Place a clone of `source` in the subscriber's container
    pub async fn replicate_to(
        &self,
        subscriber: SubscriberId,
        container: &str,
        source: ObjectId,
    ) -> ReplicationResult<ObjectId> {
        self.tracker.distribute(subscriber, container, source).await
    }

    /// Withdraw the subscriber's clone of `source`; no-op when there is none
    pub fn dereplicate_from(&self, subscriber: SubscriberId, source: ObjectId) {
        self.tracker.revoke(subscriber, source);
    }

    pub fn clone_of(&self, subscriber: SubscriberId, source: ObjectId) -> Option<ObjectId> {
        self.tracker.clone_of(subscriber, source)
    }

    pub fn records(&self, subscriber: SubscriberId) -> Vec<ReplicationRecord> {
        self.tracker.records(subscriber)
    }

    pub fn record_count(&self, subscriber: SubscriberId) -> usize {
        self.records(subscriber).len()
    }

    /// Containers of `subscriber` currently mid-creation
    pub fn pending_count(&self, subscriber: SubscriberId) -> usize {
        self.sessions
            .lock()
            .get(subscriber)
            .map_or(0, |session| session.pending.len())
    }

    pub fn subscriber_count(&self) -> usize {
        self.sessions.lock().len()
    }
}
