//! Core data model for the cycling workflow scheduling engine.
//!
//! This crate holds the parts of the system that are pure and side-effect
//! free: cycle-point algebra, the validated configuration schema, the
//! task-definition registry and graph parser, the prerequisite/output
//! model, and the broadcast store. The scheduler daemon and the read-only
//! query surface (in the `engine` and `query` crates) both build on this.

pub mod broadcast;
pub mod config;
pub mod cycling;
pub mod defaults;
pub mod error;
pub mod graph;
pub mod prerequisite;
pub mod summary;
pub mod taskdef;
pub mod utils;

pub use config::EngineConfig;
pub use cycling::{CyclePoint, CyclingMode, Interval, Sequence};

/// Result type alias used throughout the shared crate.
pub type Result<T> = anyhow::Result<T>;
