//! PackPilot - packaging recipe generator
//!
//! Turns the output of a metadata-gathering PowerShell script plus an installer
//! filename into a deployment recipe for Intune / Patch My PC:
//! - silent install and uninstall commands, resolved from a rules table
//! - detection guidance (registry paths, PowerShell detection script)
//! - export files (JSON, Markdown, PowerShell, Intune manifest)
//!
//! # Pipeline
//!
//! ```text
//! pasted text -> metadata::parse -> RecipeRequest -> Recipe::build(&RuleTable) -> export
//! ```

pub mod config;
pub mod describe;
pub mod detection;
pub mod export;
pub mod installer;
pub mod metadata;
pub mod recipe;
pub mod resolver;
pub mod rules;
pub mod template;

use std::path::PathBuf;
use thiserror::Error;

pub use metadata::{parse, parse_with_mode, ParseMode, ParsedMetadata};
pub use recipe::{Recipe, RecipeRequest};
pub use resolver::{Resolution, ResolveInput, UninstallCommand, UninstallSource};
pub use rules::{RuleRecord, RuleTable};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name written into generated artifacts
pub const PACKAGER_NAME: &str = "PackPilot Pro";

/// Errors that can occur in packpilot
///
/// Everything here is a configuration or input error. Gaps in pasted
/// metadata are never errors; they degrade to placeholders instead.
#[derive(Error, Debug)]
pub enum PackPilotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Rules file not found: {}", .0.display())]
    RulesNotFound(PathBuf),

    #[error("Invalid rules file: {0}")]
    InvalidRules(String),

    #[error("Rule '{key}' is missing required field '{field}'")]
    MissingField { key: String, field: &'static str },

    #[error("Unknown installer type: {0}")]
    UnknownInstallerType(String),

    #[error("Template error in rule '{key}': {message}")]
    Template { key: String, message: String },

    #[error("Invalid recipe: {0}")]
    InvalidRecipe(String),

    #[error("Invalid installer: {0}")]
    InvalidInstaller(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl PackPilotError {
    /// Whether this error comes from the rules table (fatal for the whole run)
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            PackPilotError::RulesNotFound(_)
                | PackPilotError::InvalidRules(_)
                | PackPilotError::MissingField { .. }
                | PackPilotError::UnknownInstallerType(_)
                | PackPilotError::Template { .. }
                | PackPilotError::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PackPilotError>;
