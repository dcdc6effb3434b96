//! SF-014: Settings file (`sushi-forms.yaml`).
//!
//! ```yaml
//! definitions_dir: apps
//! timeout_ms: 2000
//! max_source_bytes: 262144
//! log_level: info
//! ```
//!
//! Every key is optional. Relative `definitions_dir` values are resolved
//! against the settings file's directory.

use super::error::SettingsError;
use crate::sandbox::{EvalOptions, DEFAULT_MAX_SOURCE_BYTES, DEFAULT_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default settings file name looked up in the working directory.
pub const DEFAULT_SETTINGS_FILE: &str = "sushi-forms.yaml";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Parsed settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Directory holding `<Name>App.*` definitions
    #[serde(default = "default_definitions_dir")]
    pub definitions_dir: PathBuf,

    /// Evaluation deadline per definition
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Largest definition file accepted
    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_definitions_dir() -> PathBuf {
    PathBuf::from("apps")
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT.as_millis() as u64
}

fn default_max_source_bytes() -> u64 {
    DEFAULT_MAX_SOURCE_BYTES
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            definitions_dir: default_definitions_dir(),
            timeout_ms: default_timeout_ms(),
            max_source_bytes: default_max_source_bytes(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Limits for the evaluator.
    pub fn eval_options(&self) -> EvalOptions {
        EvalOptions {
            timeout: Duration::from_millis(self.timeout_ms),
            max_source_bytes: self.max_source_bytes,
        }
    }

    /// Check value ranges. Returns a list of errors (empty = valid).
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.timeout_ms == 0 {
            errors.push("timeout_ms must be greater than 0".to_string());
        }
        if self.max_source_bytes == 0 {
            errors.push("max_source_bytes must be greater than 0".to_string());
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            errors.push(format!(
                "log_level '{}' is not one of {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            ));
        }
        if self.definitions_dir.as_os_str().is_empty() {
            errors.push("definitions_dir must not be empty".to_string());
        }
        errors
    }
}

/// Parse settings from a YAML string.
pub fn parse_settings(yaml: &str, path: &Path) -> Result<Settings, SettingsError> {
    // an empty file is valid and means "all defaults"
    if yaml.trim().is_empty() {
        return Ok(Settings::default());
    }
    serde_yaml_ng::from_str(yaml).map_err(|source| SettingsError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

/// Load, resolve and validate a settings file.
pub fn load_settings(path: &Path) -> Result<Settings, SettingsError> {
    let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut settings = parse_settings(&content, path)?;

    let errors = settings.validate();
    if !errors.is_empty() {
        return Err(SettingsError::Invalid(errors.join("; ")));
    }

    if settings.definitions_dir.is_relative() {
        if let Some(base) = path.parent() {
            settings.definitions_dir = base.join(&settings.definitions_dir);
        }
    }
    Ok(settings)
}

/// Load `path` if given, else the default file if present, else defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<Settings, SettingsError> {
    match path {
        Some(p) => load_settings(p),
        None => {
            let default = Path::new(DEFAULT_SETTINGS_FILE);
            if default.is_file() {
                load_settings(default)
            } else {
                Ok(Settings::default())
            }
        }
    }
}
