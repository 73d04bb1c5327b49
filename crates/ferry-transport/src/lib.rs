//! Ferry Transport Layer - the substrate objects travel through
//!
//! This crate provides:
//! - The `Transport` trait consumed by the replication core
//! - `Scene`, an in-memory tick-driven implementation

pub mod link;
pub mod scene;

pub use link::*;
pub use scene::{Scene, SceneConfig, SceneStats};
