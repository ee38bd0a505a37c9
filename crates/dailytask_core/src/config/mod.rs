use crate::error::AppError;
use crate::verification::VerificationSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::Duration;

const CONFIG_FILE_NAME: &str = "config.json";
const CONFIG_ENV_VAR: &str = "DAILYTASK_CONFIG_PATH";

pub const DEFAULT_VERIFICATION_SECONDS: u64 = 60;
pub const DEFAULT_COOLDOWN_SECONDS: u64 = 120;
pub const DEFAULT_COMPLETION_GRACE_SECONDS: u64 = 30;
pub const DEFAULT_MAX_RETRIES: u32 = 5;
/// Upper bound for every configured duration: one year.
pub const MAX_DURATION_SECONDS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_verification_seconds")]
    pub verification_seconds: u64,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_completion_grace_seconds")]
    pub completion_grace_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub store_path: Option<String>,
    #[serde(default)]
    pub members_path: Option<String>,
}

fn default_verification_seconds() -> u64 {
    DEFAULT_VERIFICATION_SECONDS
}

fn default_cooldown_seconds() -> u64 {
    DEFAULT_COOLDOWN_SECONDS
}

fn default_completion_grace_seconds() -> u64 {
    DEFAULT_COMPLETION_GRACE_SECONDS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            verification_seconds: DEFAULT_VERIFICATION_SECONDS,
            cooldown_seconds: DEFAULT_COOLDOWN_SECONDS,
            completion_grace_seconds: DEFAULT_COMPLETION_GRACE_SECONDS,
            max_retries: DEFAULT_MAX_RETRIES,
            store_path: None,
            members_path: None,
        }
    }
}

impl Config {
    pub fn verification_settings(&self) -> Result<VerificationSettings, AppError> {
        if self.verification_seconds == 0 {
            return Err(AppError::invalid_data(
                "verification_seconds must be greater than zero",
            ));
        }
        // Repeat completions are matched by age; grace must end inside the cooldown.
        if self.cooldown_seconds > 0 && self.completion_grace_seconds >= self.cooldown_seconds {
            return Err(AppError::invalid_data(
                "completion_grace_seconds must be shorter than cooldown_seconds",
            ));
        }

        Ok(VerificationSettings {
            verification: seconds(self.verification_seconds, "verification_seconds")?,
            cooldown: seconds(self.cooldown_seconds, "cooldown_seconds")?,
            completion_grace: seconds(self.completion_grace_seconds, "completion_grace_seconds")?,
            max_retries: self.max_retries,
        })
    }
}

fn seconds(value: u64, field: &str) -> Result<Duration, AppError> {
    if value > MAX_DURATION_SECONDS {
        return Err(AppError::invalid_data(format!(
            "{field} must be at most {MAX_DURATION_SECONDS}"
        )));
    }
    Ok(Duration::seconds(value as i64))
}

#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: Config,
    pub error: Option<AppError>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub verification_seconds: Option<u64>,
    pub cooldown_seconds: Option<u64>,
    pub completion_grace_seconds: Option<u64>,
    pub max_retries: Option<u32>,
    pub store_path: Option<String>,
    pub members_path: Option<String>,
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
        Ok(PathBuf::from(appdata)
            .join("dailytask")
            .join(CONFIG_FILE_NAME))
    } else {
        let home = std::env::var("HOME").map_err(|_| AppError::invalid_data("HOME is not set"))?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join("dailytask")
            .join(CONFIG_FILE_NAME))
    }
}

pub fn load_config_with_fallback() -> ConfigLoad {
    match config_path() {
        Ok(path) => load_config_with_fallback_from_path(&path),
        Err(err) => ConfigLoad {
            config: Config::default(),
            error: Some(err),
        },
    }
}

fn load_config_with_fallback_from_path(path: &Path) -> ConfigLoad {
    if !path.exists() {
        return ConfigLoad {
            config: Config::default(),
            error: None,
        };
    }

    match load_config_from_path(path) {
        Ok(config) => ConfigLoad {
            config,
            error: None,
        },
        Err(err) => ConfigLoad {
            config: Config::default(),
            error: Some(err),
        },
    }
}

fn load_config_from_path(path: &Path) -> Result<Config, AppError> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| AppError::io(format!("{}: {}", path.display(), err)))?;
    serde_json::from_str(&content).map_err(|err| {
        AppError::invalid_data(format!("invalid JSON in {}: {}", path.display(), err))
    })
}

pub fn merge_overrides(base: &Config, overrides: &ConfigOverrides) -> Config {
    let mut merged = base.clone();
    if let Some(value) = overrides.verification_seconds {
        merged.verification_seconds = value;
    }
    if let Some(value) = overrides.cooldown_seconds {
        merged.cooldown_seconds = value;
    }
    if let Some(value) = overrides.completion_grace_seconds {
        merged.completion_grace_seconds = value;
    }
    if let Some(value) = overrides.max_retries {
        merged.max_retries = value;
    }
    if let Some(path) = overrides.store_path.as_ref() {
        merged.store_path = Some(path.clone());
    }
    if let Some(path) = overrides.members_path.as_ref() {
        merged.members_path = Some(path.clone());
    }

    merged
}
