use std::{
    path::PathBuf,
    sync::{Mutex, MutexGuard},
};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::{
    error::BagError,
    utils::fs::{read_json, write_json_atomic},
};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_folder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_user: Option<String>,
    /// Keys written by other tools are carried through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Key/value config persisted as JSON. Every call reads the file afresh
/// and every mutation rewrites it in full.
pub struct SettingsStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn load(&self) -> AppConfig {
        let _guard = self.guard();
        self.read()
    }

    /// Applies `merge` to the current contents and saves the result.
    pub fn update<F>(&self, merge: F) -> Result<AppConfig, BagError>
    where
        F: FnOnce(&mut AppConfig),
    {
        let _guard = self.guard();
        let mut config = self.read();
        merge(&mut config);
        write_json_atomic(&self.path, &config)?;
        Ok(config)
    }

    pub fn last_folder(&self) -> Option<String> {
        self.load().last_folder
    }

    pub fn set_last_folder(&self, folder: &str) -> Result<AppConfig, BagError> {
        self.update(|config| config.last_folder = Some(folder.to_string()))
    }

    pub fn set_last_user(&self, user: &str) -> Result<AppConfig, BagError> {
        self.update(|config| config.last_user = Some(user.to_string()))
    }

    fn read(&self) -> AppConfig {
        match read_json::<AppConfig>(&self.path) {
            Ok(config) => config.unwrap_or_default(),
            Err(err) => {
                warn!("Ignoring unreadable config: {err}");
                AppConfig::default()
            }
        }
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        match self.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
