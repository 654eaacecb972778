// config lets you read a separate config file, overridden by the environment
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;
use crate::session::FlushMode;

const DEFAULT_FILE: &str = "relstore";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Database file; an in-memory database when absent.
    pub path: Option<String>,
    pub flush_mode: FlushMode,
    pub busy_timeout_ms: u64,
    pub foreign_keys: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self { path: None, flush_mode: FlushMode::Auto, busy_timeout_ms: 5000, foreign_keys: true }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// An `EnvFilter` directive, used when `RUST_LOG` is not set.
    pub filter: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self { filter: "info".to_owned() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// JSON file holding the entity model.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub log: LogSettings,
    pub model: ModelSettings,
}

impl Settings {
    /// Defaults, then the settings file (`relstore.toml` or the given one, if
    /// it exists), then `RELSTORE_*` variables such as `RELSTORE_DATABASE__PATH`.
    pub fn load(file: Option<&str>) -> Result<Self> {
        let defaults = Settings::default();
        let settings = Config::builder()
            .set_default("database.busy_timeout_ms", defaults.database.busy_timeout_ms)?
            .set_default("database.flush_mode", "auto")?
            .set_default("database.foreign_keys", defaults.database.foreign_keys)?
            .set_default("log.filter", defaults.log.filter)?
            .add_source(File::with_name(file.unwrap_or(DEFAULT_FILE)).required(file.is_some()))
            .add_source(
                Environment::with_prefix("RELSTORE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
