//! Configuration

use ferry_transport::ObjectKind;

/// Authoritative-side configuration
#[derive(Clone, Debug)]
pub struct ReplicatorConfig {
    /// Kind of the per-subscriber root placement object
    pub root_kind: ObjectKind,
    /// Kind of each named container
    pub container_kind: ObjectKind,
    /// Buffered root-ready events per listener
    pub event_capacity: usize,
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        ReplicatorConfig {
            root_kind: ObjectKind::Folder,
            container_kind: ObjectKind::Folder,
            event_capacity: 64,
        }
    }
}

/// Receiving-side configuration
#[derive(Clone, Debug)]
pub struct ReceiverConfig {
    /// Buffered arrival events per listener
    pub event_capacity: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig { event_capacity: 256 }
    }
}
