//! Shared types, error model, and configuration for extruder.
//!
//! This crate is the foundation depended on by all other extruder crates.
//! It provides:
//! - [`ExtruderError`] — the unified error type
//! - Domain types ([`EntityRecord`], [`TaskDocument`], [`Event`], [`StageCall`])
//! - The [`EventSink`] subscriber trait and stock sinks
//! - The [`EsupDate`] codec for remote date values
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod date;
pub mod error;
pub mod event;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, RemoteConfig, WebConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from, resolve_base_url,
};
pub use date::EsupDate;
pub use error::{ExtruderError, Result};
pub use event::{ConsoleSink, Event, EventSink, SilentSink, StageCall, StageKind};
pub use types::{EntityRecord, ResultRow, TaskDocument, TaskParameter};
