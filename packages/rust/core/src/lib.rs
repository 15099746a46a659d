//! Batch orchestration for extruder.
//!
//! [`run_batch`] drives every identifier of a batch through the extraction
//! pipeline concurrently, aggregates the successful field reads, and
//! checkpoints resolved identifiers in the snapshot.

pub mod orchestrator;

pub use orchestrator::{BatchConfig, BatchOutcome, run_batch};
