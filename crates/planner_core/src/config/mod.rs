use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "config.json";
const DATA_FILE_NAME: &str = "planner_data.json";
const BACKUP_DIR_NAME: &str = "backups";
const CONFIG_ENV_VAR: &str = "PLANNER_CONFIG_PATH";
const DATA_DIR_ENV_VAR: &str = "PLANNER_DATA_DIR";

pub const DEFAULT_USER_ID: &str = "default_user";
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Where the document lives and how a freshly bootstrapped document is
/// seeded. Once a document exists its own `system.settings` win over
/// `auto_backup` / `backup_retention_days` / `compression_enabled` here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_file: PathBuf,
    /// Defaults to `backups/` next to `data_file`.
    pub backup_dir: Option<PathBuf>,
    pub default_user_id: String,
    pub auto_backup: bool,
    pub backup_retention_days: u32,
    pub compression_enabled: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::in_dir(default_data_dir())
    }
}

impl StoreConfig {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            data_file: dir.as_ref().join(DATA_FILE_NAME),
            backup_dir: None,
            default_user_id: DEFAULT_USER_ID.to_string(),
            auto_backup: true,
            backup_retention_days: DEFAULT_RETENTION_DAYS,
            compression_enabled: false,
        }
    }

    pub fn backup_dir(&self) -> PathBuf {
        match &self.backup_dir {
            Some(dir) => dir.clone(),
            None => self
                .data_file
                .parent()
                .map(|parent| parent.join(BACKUP_DIR_NAME))
                .unwrap_or_else(|| PathBuf::from(BACKUP_DIR_NAME)),
        }
    }
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: StoreConfig,
    pub error: Option<AppError>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub data_dir: Option<PathBuf>,
    pub data_file: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
    pub default_user_id: Option<String>,
    pub auto_backup: Option<bool>,
    pub backup_retention_days: Option<u32>,
}

fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV_VAR)
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    let base = if cfg!(windows) {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    } else {
        std::env::var("HOME")
            .ok()
            .map(|home| PathBuf::from(home).join(".local").join("share"))
    };
    base.unwrap_or_else(|| PathBuf::from(".")).join("planner")
}

pub fn config_path() -> Result<PathBuf, AppError> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR)
        && !path.trim().is_empty()
    {
        return Ok(PathBuf::from(path));
    }

    if cfg!(windows) {
        let appdata =
            std::env::var("APPDATA").map_err(|_| AppError::invalid_data("APPDATA is not set"))?;
        Ok(PathBuf::from(appdata).join("planner").join(CONFIG_FILE_NAME))
    } else {
        let home = std::env::var("HOME").map_err(|_| AppError::invalid_data("HOME is not set"))?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join("planner")
            .join(CONFIG_FILE_NAME))
    }
}

pub fn load_config_with_fallback() -> ConfigLoad {
    match config_path() {
        Ok(path) => load_config_with_fallback_from_path(&path),
        Err(err) => ConfigLoad {
            config: StoreConfig::default(),
            error: Some(err),
        },
    }
}

fn load_config_with_fallback_from_path(path: &Path) -> ConfigLoad {
    if !path.exists() {
        return ConfigLoad {
            config: StoreConfig::default(),
            error: None,
        };
    }

    match load_config_from_path(path) {
        Ok(config) => ConfigLoad {
            config,
            error: None,
        },
        Err(err) => ConfigLoad {
            config: StoreConfig::default(),
            error: Some(err),
        },
    }
}

fn load_config_from_path(path: &Path) -> Result<StoreConfig, AppError> {
    let content = std::fs::read_to_string(path).map_err(|err| AppError::io_at(path, err))?;
    let config = serde_json::from_str(&content).map_err(|err| {
        AppError::invalid_data(format!("invalid JSON in {}: {}", path.display(), err))
    })?;
    Ok(normalize_config(config))
}

fn normalize_config(mut config: StoreConfig) -> StoreConfig {
    let trimmed = config.default_user_id.trim();
    config.default_user_id = if trimmed.is_empty() {
        DEFAULT_USER_ID.to_string()
    } else {
        trimmed.to_string()
    };
    config
}

pub fn merge_overrides(base: &StoreConfig, overrides: &ConfigOverrides) -> StoreConfig {
    let mut merged = base.clone();
    if let Some(dir) = overrides.data_dir.as_ref() {
        let relocated = StoreConfig::in_dir(dir);
        merged.data_file = relocated.data_file;
        merged.backup_dir = None;
    }
    if let Some(data_file) = overrides.data_file.as_ref() {
        merged.data_file = data_file.clone();
    }
    if let Some(backup_dir) = overrides.backup_dir.as_ref() {
        merged.backup_dir = Some(backup_dir.clone());
    }
    if let Some(user_id) = overrides.default_user_id.as_ref() {
        merged.default_user_id = user_id.clone();
    }
    if let Some(auto_backup) = overrides.auto_backup {
        merged.auto_backup = auto_backup;
    }
    if let Some(days) = overrides.backup_retention_days {
        merged.backup_retention_days = days;
    }

    normalize_config(merged)
}
