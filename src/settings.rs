//! Optional file-based configuration for embedding applications.

use serde::Deserialize;

use crate::error::Result;
use crate::persist::PersistenceMode;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Path of the database file; in-memory when absent.
    pub database: Option<String>,
    /// Cached resource aggregates per session; 0 keeps everything.
    pub cache_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: None,
            cache_capacity: 0,
        }
    }
}

impl Settings {
    /// Read settings from a config file (any format the `config` crate
    /// understands, e.g. `trellis.json` or `trellis.toml`).
    pub fn load(path: &str) -> Result<Settings> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }

    pub fn persistence_mode(&self) -> PersistenceMode {
        match &self.database {
            Some(path) => PersistenceMode::File(path.clone()),
            None => PersistenceMode::InMemory,
        }
    }
}
