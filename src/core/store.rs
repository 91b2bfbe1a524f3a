//! Store handle for an LRS workspace.
//!
//! A store is a directory holding the SQLite database, the broker audit log and
//! the optional `lrs.toml`. Every component is scoped to one store.

use crate::core::config::LrsConfig;
use crate::core::error::LrsError;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_STORE_DIR: &str = ".cmi5-lrs";
pub const AUDIT_LOG_NAME: &str = "broker.events.jsonl";

#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute or caller-relative path to the store root directory
    pub root: PathBuf,
    pub config: LrsConfig,
}

impl Store {
    /// Opens a store rooted at `root`, creating the directory if needed.
    pub fn open(root: &Path) -> Result<Self, LrsError> {
        fs::create_dir_all(root).map_err(LrsError::IoError)?;
        let config = LrsConfig::load(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
        })
    }

    pub fn with_config(root: &Path, config: LrsConfig) -> Result<Self, LrsError> {
        fs::create_dir_all(root).map_err(LrsError::IoError)?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join(&self.config.database_file)
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.root.join(AUDIT_LOG_NAME)
    }
}
