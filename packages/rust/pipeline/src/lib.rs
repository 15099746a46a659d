//! Per-entity extraction pipeline: remote client, stage handlers, runner.
//!
//! The remote system's authentication only works with the synchronous HTTP
//! client, so [`RemoteClient`] dispatches every call onto a worker thread
//! and awaits it back on the scheduler. On top of that sit the five stage
//! handlers and [`run_pipeline`], the sequential short-circuiting runner.

pub mod client;
pub mod runner;
pub mod stages;

pub use client::{RemoteClient, RemoteResponse, status_success};
pub use runner::run_pipeline;
