//! Store configuration, read from `<root>/lrs.toml`.

use crate::core::error::LrsError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CONFIG_FILE_NAME: &str = "lrs.toml";

fn default_endpoint() -> String {
    "http://localhost:8080/xapi/".to_string()
}

fn default_actor_homepage() -> String {
    "https://lms.example.com".to_string()
}

fn default_database_file() -> String {
    "lrs.db".to_string()
}

fn default_true() -> bool {
    true
}

fn default_clock_skew() -> i64 {
    300
}

fn default_log_filter() -> String {
    "cmi5_lrs=info".to_string()
}

fn default_xapi_version() -> String {
    "1.0.3".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LrsConfig {
    /// xAPI endpoint handed to launched content.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Value of the `auth` launch parameter. Omitted from launch URLs when empty.
    #[serde(default)]
    pub auth_token: String,

    /// cmi5 fetch URL handed to content, if the deployment issues fetch tokens.
    #[serde(default)]
    pub fetch_url: Option<String>,

    /// homePage used for account actors built by the LRS itself (authority, launch actor).
    #[serde(default = "default_actor_homepage")]
    pub actor_homepage: String,

    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Append brokered mutations to `broker.events.jsonl`.
    #[serde(default = "default_true")]
    pub audit: bool,

    /// How far in the future a client timestamp may be before the statement is rejected.
    #[serde(default = "default_clock_skew")]
    pub max_clock_skew_secs: i64,

    /// Open sessions idle longer than this are reported as abandoned at read time.
    #[serde(default)]
    pub abandon_after_secs: Option<u64>,

    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    #[serde(default = "default_xapi_version")]
    pub xapi_version: String,
}

impl Default for LrsConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            auth_token: String::new(),
            fetch_url: None,
            actor_homepage: default_actor_homepage(),
            database_file: default_database_file(),
            audit: true,
            max_clock_skew_secs: default_clock_skew(),
            abandon_after_secs: None,
            log_filter: default_log_filter(),
            xapi_version: default_xapi_version(),
        }
    }
}

impl LrsConfig {
    /// Loads `<root>/lrs.toml`. A missing file yields defaults; a malformed one is an error.
    pub fn load(root: &Path) -> Result<Self, LrsError> {
        let path = root.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path).map_err(LrsError::IoError)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, LrsError> {
        let config: LrsConfig = toml::from_str(content)
            .map_err(|e| LrsError::ConfigError(format!("{}: {}", CONFIG_FILE_NAME, e)))?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), LrsError> {
        if self.database_file.trim().is_empty() {
            return Err(LrsError::ConfigError(
                "database_file must not be empty".to_string(),
            ));
        }
        if self.max_clock_skew_secs < 0 {
            return Err(LrsError::ConfigError(
                "max_clock_skew_secs must be >= 0".to_string(),
            ));
        }
        url::Url::parse(&self.endpoint)
            .map_err(|e| LrsError::ConfigError(format!("endpoint '{}': {}", self.endpoint, e)))?;
        Ok(())
    }

    /// Writes the config as TOML, used by `init` to seed a store.
    pub fn write(&self, root: &Path) -> Result<(), LrsError> {
        let body = toml::to_string_pretty(self)
            .map_err(|e| LrsError::ConfigError(e.to_string()))?;
        fs::write(root.join(CONFIG_FILE_NAME), body).map_err(LrsError::IoError)
    }
}
