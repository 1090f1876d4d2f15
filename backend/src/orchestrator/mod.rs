//! The orchestrator: the step executor (`Kernel`) that drives one
//! session's simulation forward one step at a time.
//!
//! See `engine.rs` for the nine-phase step implementation and
//! `checkpoint.rs` for the snapshot/restore data model it builds on.

mod checkpoint;
mod engine;

pub use checkpoint::{compute_config_hash, validate_snapshot, KernelSnapshot};
pub use engine::Kernel;
