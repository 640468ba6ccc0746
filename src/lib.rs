//! Dependency lineage analysis and checkpointed safe upgrades for npm, pip
//! and go projects.
//!
//! - [`pipeline::AnalyzePipeline`] resolves a project, fetches registry
//!   metadata and builds a [`report::Report`] of stale and risky packages.
//! - [`apply::ApplyEngine`] upgrades or replaces a dependency behind an
//!   approval gate, with a checkpoint and automatic rollback on failure.

pub mod apply;
pub mod audit;
pub mod checkpoint;
pub mod config;
pub mod detect;
pub mod events;
pub mod executor;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod process;
pub mod registry;
pub mod report;
pub mod resolve;
pub mod traits;

/// Per-project working directory for the registry cache and checkpoints.
pub const TOOL_DIR: &str = ".lineage-tmp";

pub use apply::{ApplyEngine, ApplyOptions, ApplyOutcome, ApplyRequest};
pub use checkpoint::{Checkpoint, CheckpointStore, RollbackOptions};
pub use config::ProjectConfig;
pub use events::{Event, EventBus, EventKind};
pub use executor::*;
pub use model::*;
pub use pipeline::{Analysis, AnalyzePipeline};
pub use traits::*;
