use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use toml::to_string_pretty;

use crate::session::Flow;

const CONFIG_FILE: &str = ".gitlink/config.toml";

#[derive(Debug, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub flow: Flow,
    pub api: Api,
}

#[derive(Serialize, Deserialize)]
pub struct Api {
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
}

impl fmt::Debug for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Api")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "********"))
            .finish()
    }
}

impl Settings {
    pub fn new(api: Api, flow: Flow) -> Self {
        Self { api, flow }
    }

    pub fn path(dir: &str) -> PathBuf {
        Path::new(dir).join(CONFIG_FILE)
    }

    /// Reads `<dir>/.gitlink/config.toml`, overridden by `GITLINK_*`
    /// environment variables (`GITLINK_API__TOKEN`).
    pub fn load(dir: &str) -> Result<Self, ConfigError> {
        let path = Self::path(dir);

        if !path.is_file() {
            return Err(ConfigError::Message("No config file found".to_string()));
        }

        Config::builder()
            .add_source(File::from(path.as_path()))
            .add_source(
                Environment::with_prefix("GITLINK")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }

    pub fn save(&self, dir: &str) -> Result<PathBuf, io::Error> {
        let path = Self::path(dir);

        if let Some(prefix) = path.parent() {
            std::fs::create_dir_all(prefix)?;
        }

        let data = self.save_as_string()?;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        file.write_all(data.as_bytes())?;

        Ok(path)
    }

    pub fn save_as_string(&self) -> Result<String, io::Error> {
        to_string_pretty(self).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl Api {
    pub fn new(base_url: String, token: Option<String>) -> Self {
        Self { base_url, token }
    }
}
