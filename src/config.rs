use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::store::StoreError;
use crate::types::{Points, Principal};

pub const DEFAULT_STATE_DIR: &str = "loyalty.state";
pub const DEFAULT_MAX_SUPPLY: Points = 1_000;
pub const CONFIG_FILE: &str = "config.json";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerConfig {
    pub state_dir: PathBuf,
    pub max_supply: Points,
    pub owner: Principal,
}

impl LedgerConfig {
    pub fn new(state_dir: impl Into<PathBuf>, owner: impl Into<Principal>) -> Self {
        Self {
            state_dir: state_dir.into(),
            max_supply: DEFAULT_MAX_SUPPLY,
            owner: owner.into(),
        }
    }

    pub fn with_max_supply(mut self, max_supply: Points) -> Self {
        self.max_supply = max_supply;
        self
    }

    pub fn config_path(state_dir: &Path) -> PathBuf {
        state_dir.join(CONFIG_FILE)
    }

    pub fn load(state_dir: &Path) -> Result<Self, StoreError> {
        let path = Self::config_path(state_dir);
        let bytes = fs::read(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Json { path, source })
    }

    pub fn save(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.state_dir).map_err(|source| StoreError::Io {
            path: self.state_dir.clone(),
            source,
        })?;
        let path = Self::config_path(&self.state_dir);
        let bytes = serde_json::to_vec_pretty(self).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, bytes).map_err(|source| StoreError::Io { path, source })
    }
}
