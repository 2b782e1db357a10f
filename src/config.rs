//! Run configuration
//!
//! Configuration lives in a JSON file located by `--config` or the
//! `KILN_CONFIG` environment variable. It names the data sources records
//! can be extracted from and the warehouse database to load into.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::db::DbFlavor;

/// Environment variable consulted when `--config` is not given
pub const CONFIG_ENV_VAR: &str = "KILN_CONFIG";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// Extraction endpoints, keyed by the name given to `--source`
    #[serde(default)]
    pub data_sources: HashMap<String, SourceConfig>,

    pub database: DatabaseConfig,
}

/// Connection parameters for one tenant service
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SourceConfig {
    pub url: String,
    pub tenant: String,
    pub user: String,
    pub password: String,

    /// Directory extraction writes its temporary load directories under
    pub extract_dir: PathBuf,

    /// Interface paths retrieved without pagination
    #[serde(default)]
    pub direct_interfaces: Vec<String>,
}

/// Warehouse connection and role parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database_name: String,
    pub admin_user: String,
    pub admin_password: String,

    /// Roles granted SELECT on loaded tables
    pub reader_roles: Vec<String>,

    /// SQL dialect of the warehouse; defaults to postgresql
    #[serde(default = "default_flavor")]
    pub flavor: String,
}

fn default_flavor() -> String {
    "postgresql".to_string()
}

impl Config {
    /// Load and parse the configuration file
    pub fn load(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading configuration file {}", path.display()))?;
        let config: Config = serde_json::from_str(&text)
            .with_context(|| format!("parsing configuration file {}", path.display()))?;
        Ok(config)
    }

    /// Resolve the configuration file path from the option or environment
    pub fn locate(cli_path: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = cli_path {
            return Ok(path.to_path_buf());
        }
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Ok(PathBuf::from(path));
        }
        Err(anyhow!(
            "no configuration file: pass --config or set {}",
            CONFIG_ENV_VAR
        ))
    }

    /// Look up a named data source
    pub fn source(&self, name: &str) -> Result<&SourceConfig> {
        self.data_sources
            .get(name)
            .ok_or_else(|| anyhow!("unknown data source: {}", name))
    }
}

impl DatabaseConfig {
    pub fn flavor(&self) -> Result<DbFlavor> {
        DbFlavor::from_name(&self.flavor)
            .ok_or_else(|| anyhow!("unknown database flavor: {}", self.flavor))
    }
}

impl SourceConfig {
    /// Whether an interface path bypasses paged retrieval
    pub fn is_direct(&self, source_path: &str) -> bool {
        self.direct_interfaces.iter().any(|p| p == source_path)
    }
}
