//! Runtime settings, layered from defaults, an optional TOML file and
//! `CRMOCK__`-prefixed environment variables.

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::{CrmockError, Result};
use crate::persist::PersistenceMode;

const DEFAULT_FILE: &str = "crmock";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseSettings {
    /// `memory` or `file`
    pub mode: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogSettings {
    pub filter: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub log: LogSettings,
}

impl Settings {
    /// Reads `path` if given (it must then exist), otherwise `crmock.toml`
    /// from the working directory when present.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = match path {
            Some(path) => File::with_name(path).format(FileFormat::Toml).required(true),
            None => File::with_name(DEFAULT_FILE)
                .format(FileFormat::Toml)
                .required(false),
        };
        let settings = Config::builder()
            .set_default("database.mode", "memory")?
            .set_default("database.path", "crmock.db")?
            .set_default("log.filter", "info")?
            .add_source(file)
            .add_source(Environment::with_prefix("CRMOCK").separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    pub fn persistence_mode(&self) -> Result<PersistenceMode> {
        match self.database.mode.to_ascii_lowercase().as_str() {
            "memory" => Ok(PersistenceMode::InMemory),
            "file" => Ok(PersistenceMode::File(self.database.path.clone())),
            other => Err(CrmockError::Config(format!(
                "unknown database mode '{other}', expected memory or file"
            ))),
        }
    }
}
