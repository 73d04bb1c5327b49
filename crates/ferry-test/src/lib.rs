//! Ferry Test Harness - end-to-end replication scenarios
//!
//! This crate provides:
//! - A harness wiring a scene, its heartbeat, a replicator and receivers
//! - Tracing setup for test runs
//! - Scenario and property suites exercising the whole stack

pub mod harness;
pub mod integration;
pub mod properties;

pub use harness::*;
