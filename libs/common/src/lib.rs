//! Conductor Common - shared tracing initialization and layered
//! configuration used by every binary in the workspace.

pub mod config;
pub mod telemetry;

pub use config::{Settings, SettingsError};
pub use telemetry::init_tracing;
