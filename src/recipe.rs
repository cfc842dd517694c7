//! Recipe: user-confirmed metadata plus resolved commands for one installer
//!
//! A [`RecipeRequest`] is built once from parsed metadata and explicit
//! overrides, then turned into an immutable [`Recipe`] by [`Recipe::build`].
//! Nothing is kept between runs.

use crate::installer;
use crate::metadata::ParsedMetadata;
use crate::resolver::{self, ResolveInput, UninstallCommand};
use crate::rules::{RuleTable, INTERACTIVE};
use crate::{PackPilotError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MIN_TIMEOUT_MINUTES: u32 = 5;
pub const MAX_TIMEOUT_MINUTES: u32 = 120;
pub const DEFAULT_TIMEOUT_MINUTES: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Architecture {
    #[default]
    #[serde(rename = "64-bit")]
    X64,
    #[serde(rename = "32-bit")]
    X86,
    Any,
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::X64 => write!(f, "64-bit"),
            Architecture::X86 => write!(f, "32-bit"),
            Architecture::Any => write!(f, "Any"),
        }
    }
}

impl FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "64-bit" | "64bit" | "64" | "x64" | "amd64" | "x86_64" => Ok(Architecture::X64),
            "32-bit" | "32bit" | "32" | "x86" | "i386" | "i686" => Ok(Architecture::X86),
            "any" | "neutral" | "both" => Ok(Architecture::Any),
            _ => Err(format!("Unknown architecture: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InstallContext {
    #[default]
    System,
    User,
}

impl fmt::Display for InstallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallContext::System => write!(f, "System"),
            InstallContext::User => write!(f, "User"),
        }
    }
}

impl FromStr for InstallContext {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "system" | "machine" | "device" | "allusers" => Ok(InstallContext::System),
            "user" | "currentuser" | "peruser" => Ok(InstallContext::User),
            _ => Err(format!("Unknown install context: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Low => "Low",
            Priority::Normal => "Normal",
            Priority::High => "High",
            Priority::Critical => "Critical",
        };
        f.write_str(s)
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Category {
    #[default]
    Productivity,
    Development,
    Security,
    Utilities,
    Communication,
    Other,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "productivity" => Ok(Category::Productivity),
            "development" => Ok(Category::Development),
            "security" => Ok(Category::Security),
            "utilities" | "utility" => Ok(Category::Utilities),
            "communication" => Ok(Category::Communication),
            "other" => Ok(Category::Other),
            _ => Err(format!("Unknown category: {}", s)),
        }
    }
}

/// Input for one recipe: parsed metadata plus whatever the user overrode
#[derive(Debug, Clone)]
pub struct RecipeRequest {
    /// Installer filename as uploaded
    pub filename: String,
    pub metadata: ParsedMetadata,
    pub app_name: Option<String>,
    pub vendor: Option<String>,
    pub version: Option<String>,
    pub architecture: Option<Architecture>,
    pub install_context: Option<InstallContext>,
    pub apps_features_name: Option<String>,
    /// Rules key; detected from the filename when unset
    pub installer_type_key: Option<String>,
    /// Wrap the installer with ServiceUI
    pub interactive: bool,
    pub requires_restart: bool,
    pub create_shortcut: bool,
    pub timeout_minutes: u32,
    pub priority: Priority,
    pub category: Category,
    pub description: Option<String>,
}

impl RecipeRequest {
    pub fn new(filename: impl Into<String>, metadata: ParsedMetadata) -> Self {
        Self {
            filename: filename.into(),
            metadata,
            app_name: None,
            vendor: None,
            version: None,
            architecture: None,
            install_context: None,
            apps_features_name: None,
            installer_type_key: None,
            interactive: false,
            requires_restart: false,
            create_shortcut: true,
            timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
            priority: Priority::default(),
            category: Category::default(),
            description: None,
        }
    }

    /// Rules key this request resolves against
    pub fn installer_type_key(&self) -> String {
        if self.interactive {
            return INTERACTIVE.to_string();
        }
        match non_blank(self.installer_type_key.as_deref()) {
            Some(key) => key.to_string(),
            None => installer::detect_installer_type(&self.filename, false).to_string(),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Resolved, user-confirmed packaging recipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    pub app_name: String,
    pub vendor: String,
    pub version: String,
    pub architecture: Architecture,
    pub install_context: InstallContext,
    pub apps_features_name: String,
    pub installer_type_key: String,
    pub installer_type: String,
    pub uploaded_filename: String,
    pub is_interactive: bool,
    pub requires_restart: bool,
    pub create_shortcut: bool,
    pub timeout_minutes: u32,
    pub priority: Priority,
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub install_command: String,
    pub uninstall: UninstallCommand,
    pub detection_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_code: Option<String>,
    /// RFC 3339 creation time
    pub created: String,
}

impl Recipe {
    /// Validate the request and resolve its commands
    ///
    /// App name falls back to metadata, then to a name derived from the
    /// filename. Vendor and version have no fallback and must be present.
    pub fn build(request: &RecipeRequest, table: &RuleTable) -> Result<Self> {
        installer::validate_installer_name(&request.filename)?;

        if !(MIN_TIMEOUT_MINUTES..=MAX_TIMEOUT_MINUTES).contains(&request.timeout_minutes) {
            return Err(PackPilotError::InvalidRecipe(format!(
                "timeout must be between {} and {} minutes, got {}",
                MIN_TIMEOUT_MINUTES, MAX_TIMEOUT_MINUTES, request.timeout_minutes
            )));
        }

        let metadata = &request.metadata;
        let app_name = non_blank(request.app_name.as_deref())
            .or_else(|| non_blank(metadata.app_name()))
            .map(String::from)
            .unwrap_or_else(|| installer::default_app_name(&request.filename));
        let vendor = non_blank(request.vendor.as_deref()).or_else(|| non_blank(metadata.publisher()));
        let version = non_blank(request.version.as_deref()).or_else(|| non_blank(metadata.version()));

        let mut missing = Vec::new();
        if app_name.trim().is_empty() {
            missing.push("app name");
        }
        if vendor.is_none() {
            missing.push("vendor");
        }
        if version.is_none() {
            missing.push("version");
        }
        if !missing.is_empty() {
            return Err(PackPilotError::InvalidRecipe(format!(
                "missing required field(s): {}",
                missing.join(", ")
            )));
        }
        let vendor = vendor.unwrap_or_default().to_string();
        let version = version.unwrap_or_default().to_string();

        let architecture = request
            .architecture
            .or_else(|| metadata.architecture().and_then(|a| a.parse().ok()))
            .unwrap_or_default();
        let install_context = request
            .install_context
            .or_else(|| metadata.install_context().and_then(|c| c.parse().ok()))
            .unwrap_or_default();
        let apps_features_name = non_blank(request.apps_features_name.as_deref())
            .or_else(|| non_blank(metadata.apps_and_features_name()))
            .unwrap_or(&app_name)
            .to_string();

        let key = request.installer_type_key();
        let mut input = ResolveInput::new(key.as_str(), request.filename.as_str());
        input.app_name = Some(app_name.clone());
        input.vendor = Some(vendor.clone());
        input.version = Some(version.clone());
        let input = input.with_metadata(metadata);
        let resolution = resolver::resolve(table, &input)?;

        log::info!(
            "built recipe for {} {} ({})",
            app_name,
            version,
            resolution.installer_type
        );

        Ok(Self {
            app_name,
            vendor,
            version,
            architecture,
            install_context,
            apps_features_name,
            installer_type_key: resolution.installer_type_key,
            installer_type: resolution.installer_type,
            uploaded_filename: request.filename.clone(),
            is_interactive: request.interactive,
            requires_restart: request.requires_restart || resolution.requires_restart,
            create_shortcut: request.create_shortcut,
            timeout_minutes: request.timeout_minutes,
            priority: request.priority,
            category: request.category,
            description: request.description.clone(),
            install_command: resolution.install_command,
            uninstall: resolution.uninstall,
            detection_method: resolution.detection_method,
            product_code: resolution.product_code,
            created: chrono::Local::now().to_rfc3339(),
        })
    }

    /// App name reduced to `[A-Za-z0-9._-]`, used in export file names
    ///
    /// Everything else becomes `_` and leading dots are dropped, so the
    /// result is always a single path component.
    pub fn file_slug(&self) -> String {
        let slug: String = self
            .app_name
            .trim()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let slug = slug.trim_start_matches('.');
        if slug.is_empty() {
            "app".to_string()
        } else {
            slug.to_string()
        }
    }

    pub fn uninstall_command(&self) -> &str {
        &self.uninstall.command
    }
}
