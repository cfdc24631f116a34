//! Configuration for the rlink embedding bridge
//!
//! The configuration lives in a TOML file (`~/.config/rlink/rlink.toml` by
//! default, or wherever `RLINK_CONFIG` points) and selects which R
//! installation a session drives and how values are marshaled.

pub mod r_paths;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use which::which;

pub use r_paths::{resolve_r_executable, resolve_r_home, RPathError};

/// Default recursion bound for marshaling nested records
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Environment variable overriding the config file location
pub const CONFIG_ENV_VAR: &str = "RLINK_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Could not determine home directory")]
    NoHomeDirectory,

    #[error("Unknown backend '{0}' (expected auto, process or reference)")]
    UnknownBackend(String),

    #[error("Invalid value '{value}' for '{key}'")]
    InvalidValue { key: String, value: String },

    #[error("R is not installed or not on PATH. Set 'r-home' or 'r-executable' in the config")]
    RNotFound,

    #[error(transparent)]
    RPath(#[from] RPathError),
}

/// Which runtime implementation a session drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// An R interpreter driven as a child process
    #[default]
    Process,
    /// Use an installed R when one resolves, the reference runtime otherwise
    Auto,
    /// The in-process reference runtime, a small R subset for tests
    Reference,
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Backend::Auto),
            "process" | "r" => Ok(Backend::Process),
            "reference" => Ok(Backend::Reference),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Backend::Auto => "auto",
            Backend::Process => "process",
            Backend::Reference => "reference",
        };
        f.write_str(name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r_home: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r_executable: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_runtime_output: Option<bool>,
}

impl Config {
    pub fn path() -> Result<PathBuf, ConfigError> {
        // Honor explicit override via RLINK_CONFIG for tests / isolated runs.
        if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
            let trimmed = env_path.trim();
            if !trimmed.is_empty() {
                return Ok(PathBuf::from(trimmed));
            }
        }

        #[cfg(not(target_os = "windows"))]
        let default = dirs::home_dir()
            .ok_or(ConfigError::NoHomeDirectory)?
            .join(".config")
            .join("rlink")
            .join("rlink.toml");

        #[cfg(target_os = "windows")]
        let default = dirs::config_dir()
            .ok_or(ConfigError::NoHomeDirectory)?
            .join("rlink")
            .join("rlink.toml");

        Ok(default)
    }

    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "r-home" => self.r_home.clone(),
            "r-executable" => self.r_executable.clone(),
            "backend" => self.backend.clone(),
            "max-depth" => self.max_depth.map(|d| d.to_string()),
            "log-runtime-output" => self.log_runtime_output.map(|b| b.to_string()),
            _ => None,
        }
    }

    pub fn set(&mut self, key: &str, value: String) -> Result<(), ConfigError> {
        let invalid = |value: String| ConfigError::InvalidValue {
            key: key.to_string(),
            value,
        };
        match key {
            "r-home" => self.r_home = Some(value),
            "r-executable" => self.r_executable = Some(value),
            "backend" => {
                Backend::from_str(&value)?;
                self.backend = Some(value);
            }
            "max-depth" => match value.parse::<usize>() {
                Ok(depth) if depth > 0 => self.max_depth = Some(depth),
                _ => return Err(invalid(value)),
            },
            "log-runtime-output" => match value.parse::<bool>() {
                Ok(flag) => self.log_runtime_output = Some(flag),
                Err(_) => return Err(invalid(value)),
            },
            _ => return Err(invalid(value)),
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.r_home.is_none()
            && self.r_executable.is_none()
            && self.backend.is_none()
            && self.max_depth.is_none()
            && self.log_runtime_output.is_none()
    }

    pub fn values_iter(&self) -> Vec<(&str, String)> {
        ["r-home", "r-executable", "backend", "max-depth", "log-runtime-output"]
            .into_iter()
            .filter_map(|key| self.get(key).map(|value| (key, value)))
            .collect()
    }

    pub fn get_backend(&self) -> Result<Backend, ConfigError> {
        self.backend
            .as_deref()
            .map_or(Ok(Backend::default()), Backend::from_str)
    }

    pub fn get_max_depth(&self) -> usize {
        self.max_depth.unwrap_or(DEFAULT_MAX_DEPTH)
    }

    /// Locate the R executable: explicit path, then `r-home`, then `PATH`
    ///
    /// A path found on `PATH` is remembered in this config value but not saved.
    pub fn ensure_r_executable(&mut self) -> Result<PathBuf, ConfigError> {
        if let Some(ref path) = self.r_executable {
            let path = PathBuf::from(path);
            if path.is_file() {
                return Ok(path);
            }
            // Path was in config but doesn't exist, fall through to discovery
            self.r_executable = None;
        }

        if let Some(ref home) = self.r_home {
            return Ok(resolve_r_executable(Path::new(home))?);
        }

        match which("R") {
            Ok(path) => {
                self.r_executable = Some(path.to_string_lossy().trim().to_string());
                Ok(path)
            }
            Err(_) => Err(ConfigError::RNotFound),
        }
    }
}
