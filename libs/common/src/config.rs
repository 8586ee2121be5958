//! Layered application configuration: `default < file < environment`,
//! loaded with the `config` crate. Every binary calls `dotenvy::dotenv()`
//! before reading env-only settings in `main`.

use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Process-wide settings shared by `apps/api`, `apps/worker` and
/// `apps/cli`. Optional fields fall back to an inline default rather
/// than failing startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_bind_address")]
    pub http_bind_address: String,
    #[serde(default = "default_poll_interval_ms")]
    pub worker_poll_interval_ms: u64,
    #[serde(default)]
    pub plugin_dir: Option<PathBuf>,
    #[serde(default = "default_max_step_depth")]
    pub max_step_depth: usize,
    #[serde(default = "default_max_step_nodes")]
    pub max_step_nodes: usize,
}

fn default_database_url() -> String {
    "postgres://localhost/conductor".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_step_depth() -> usize {
    10
}

fn default_max_step_nodes() -> usize {
    1000
}

impl Settings {
    /// Load settings from `config/default.toml` (if present), then a
    /// `CONDUCTOR_CONFIG_FILE` override (if set), then `CONDUCTOR_*`
    /// environment variables, each layer overriding the last.
    pub fn load() -> Result<Self, SettingsError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false));

        if let Ok(path) = std::env::var("CONDUCTOR_CONFIG_FILE") {
            builder = builder.add_source(config::File::with_name(&path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("CONDUCTOR")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder.build()?;
        settings.try_deserialize().map_err(SettingsError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_falls_back_to_defaults_when_nothing_set() {
        std::env::remove_var("CONDUCTOR_DATABASE_URL");
        let settings = Settings::load().unwrap();
        assert_eq!(settings.max_step_depth, 10);
        assert_eq!(settings.max_step_nodes, 1000);
    }

    #[test]
    fn environment_override_takes_precedence() {
        std::env::set_var("CONDUCTOR_HTTP_BIND_ADDRESS", "127.0.0.1:9999");
        let settings = Settings::load().unwrap();
        assert_eq!(settings.http_bind_address, "127.0.0.1:9999");
        std::env::remove_var("CONDUCTOR_HTTP_BIND_ADDRESS");
    }
}
