use crate::error::Result;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "coursectl.toml";
pub const ENV_PREFIX: &str = "COURSECTL_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database holding courses, categories and users.
    pub database_path: PathBuf,
    /// Root of the archive store; snapshots and extractions land here.
    pub backup_temp_dir: PathBuf,
    /// Admin account to act as. Falls back to the first site admin.
    pub admin_username: Option<String>,
    /// Remove the working directory once a restore controller is destroyed.
    pub cleanup_temp: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("coursectl.sqlite3"),
            backup_temp_dir: std::env::temp_dir().join("coursectl-backup"),
            admin_username: None,
            cleanup_temp: false,
        }
    }
}

impl Config {
    /// Layers defaults, the TOML file and `COURSECTL_*` variables, last wins.
    /// An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        match path {
            Some(p) => {
                if !p.is_file() {
                    return Err(crate::Error::Config(format!(
                        "config file not found: {}",
                        p.display()
                    )));
                }
                figment = figment.merge(Toml::file(p));
            }
            None => figment = figment.merge(Toml::file(DEFAULT_CONFIG_FILE)),
        }
        let config: Config = figment.merge(Env::prefixed(ENV_PREFIX)).extract()?;
        Ok(config)
    }
}
