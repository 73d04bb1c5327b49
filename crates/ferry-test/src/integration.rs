//! End-to-end Integration Test Suite
//!
//! Drives the replicator and receivers over a heartbeat-ticked scene:
//! - Container creation coalescing
//! - Idempotent distribution and revocation
//! - Disposal debounce
//! - Disconnect purge and subscriber isolation
