//! Tool settings
//!
//! Reads settings from:
//! - `.packpilot.yaml` / `.packpilot.yml` / `.packpilot.json` (working directory)
//! - the same names in the home directory
//!
//! Command-line flags take precedence over the file.

use crate::describe::{DEFAULT_TIMEOUT_SECONDS, DEFAULT_USER_AGENT, MAX_TIMEOUT_SECONDS};
use crate::export::DEFAULT_ASSIGNMENT_GROUP;
use crate::metadata::ParseMode;
use crate::rules::DEFAULT_RULES_FILE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SETTINGS_FILE_NAMES: &[&str] = &[".packpilot.yaml", ".packpilot.yml", ".packpilot.json"];

/// Settings file error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Metadata parsing settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseConfig {
    /// Treat non-`Key: Value` lines as continuations
    pub multiline: bool,
}

impl ParseConfig {
    pub fn mode(&self) -> ParseMode {
        if self.multiline {
            ParseMode::Multiline
        } else {
            ParseMode::Simple
        }
    }
}

/// Description lookup settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescribeConfig {
    /// Query winget-pkgs on GitHub; off means the offline fallback text
    pub enabled: bool,

    pub timeout_seconds: u64,

    pub user_agent: String,
}

impl Default for DescribeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Main settings structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Rules file; relative paths in a settings file are relative to that file
    pub rules_path: Option<PathBuf>,

    /// Where `recipe --output` writes when no directory is given
    pub output_dir: Option<PathBuf>,

    pub parse: ParseConfig,

    pub describe: DescribeConfig,

    /// Azure AD group named in the README assignment reminder
    pub assignment_group: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rules_path: None,
            output_dir: None,
            parse: ParseConfig::default(),
            describe: DescribeConfig::default(),
            assignment_group: DEFAULT_ASSIGNMENT_GROUP.to_string(),
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let mut settings: Self = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "Unknown settings file format: {}",
                    ext
                )))
            }
        };

        settings.validate()?;

        let base_dir = path.parent().unwrap_or(Path::new("."));
        for slot in [&mut settings.rules_path, &mut settings.output_dir] {
            if let Some(p) = slot.as_mut().filter(|p| p.is_relative()) {
                *p = base_dir.join(&*p);
            }
        }

        log::debug!("loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Load settings from the first default location that exists
    pub fn load_default() -> Result<Self, ConfigError> {
        for name in SETTINGS_FILE_NAMES {
            let path = PathBuf::from(name);
            if path.exists() {
                return Self::load(&path);
            }
        }

        if let Some(home) = dirs::home_dir() {
            for name in SETTINGS_FILE_NAMES {
                let path = home.join(name);
                if path.exists() {
                    return Self::load(&path);
                }
            }
        }

        Ok(Self::default())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_TIMEOUT_SECONDS).contains(&self.describe.timeout_seconds) {
            return Err(ConfigError::Invalid(format!(
                "describe.timeout_seconds must be between 1 and {}, got {}",
                MAX_TIMEOUT_SECONDS, self.describe.timeout_seconds
            )));
        }
        if self.assignment_group.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "assignment_group must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Merge CLI arguments into the settings
    pub fn merge_cli(
        &mut self,
        rules_path: Option<PathBuf>,
        output_dir: Option<PathBuf>,
        multiline: Option<bool>,
        describe: Option<bool>,
    ) {
        if let Some(p) = rules_path {
            self.rules_path = Some(p);
        }
        if let Some(d) = output_dir {
            self.output_dir = Some(d);
        }
        if let Some(m) = multiline {
            self.parse.multiline = m;
        }
        if let Some(d) = describe {
            self.describe.enabled = d;
        }
    }

    /// Rules file to load
    pub fn rules_path(&self) -> PathBuf {
        self.rules_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RULES_FILE))
    }
}
