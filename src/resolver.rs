//! Install/uninstall command resolution
//!
//! Uninstall resolution order:
//! 1. the rule's uninstall template, when every placeholder can be filled
//! 2. the extracted uninstall string, normalized (MSI, NSIS, Inno Setup)
//! 3. a generic `msiexec /x {PRODUCT_CODE}` placeholder for MSI packages
//! 4. an explicit "cannot determine" message

use crate::metadata::ParsedMetadata;
use crate::rules::{RuleTable, MSI};
use crate::template::{self, TemplateVars};
use crate::{PackPilotError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Standard 8-4-4-4-12 GUID, braces optional
static GUID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{?([0-9A-Fa-f]{8}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{12})\}?")
        .unwrap()
});

static MSIEXEC_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bmsiexec(\.exe)?\b").unwrap());

/// Inno Setup uninstallers: unins000.exe, unins001.exe, ...
static INNO_UNINSTALLER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^unins\d{3}\.exe$").unwrap());

/// Uninstall command for MSI packages whose product code is not known yet
pub const MSI_PLACEHOLDER_UNINSTALL: &str = "msiexec /x {PRODUCT_CODE} /qn /norestart";

/// Returned when nothing supports a silent uninstall command
pub const UNDETERMINED_UNINSTALL: &str = "Cannot determine uninstall command automatically. \
Look up the UninstallString under HKLM\\SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Uninstall \
after a test installation and add the vendor's silent switch.";

const NSIS_SILENT_FLAGS: &[&str] = &["/S"];
const INNO_SILENT_FLAGS: &[&str] = &["/VERYSILENT", "/SUPPRESSMSGBOXES", "/NORESTART"];

/// Where an uninstall command came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UninstallSource {
    /// Rule template filled from metadata
    Template,
    /// msiexec uninstall string reduced to `/x <product code>`
    MsiNormalized,
    /// NSIS uninstaller with `/S` appended
    NsisNormalized,
    /// Inno Setup uninstaller with `/VERYSILENT` flags appended
    InnoNormalized,
    /// Extracted uninstall string used as-is
    RawString,
    /// Generic msiexec command with a `{PRODUCT_CODE}` marker
    MsiPlaceholder,
    /// Nothing to go on
    Undetermined,
}

impl std::fmt::Display for UninstallSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UninstallSource::Template => write!(f, "rule template"),
            UninstallSource::MsiNormalized => write!(f, "MSI uninstall string"),
            UninstallSource::NsisNormalized => write!(f, "NSIS uninstall string"),
            UninstallSource::InnoNormalized => write!(f, "Inno Setup uninstall string"),
            UninstallSource::RawString => write!(f, "uninstall string (unchanged)"),
            UninstallSource::MsiPlaceholder => write!(f, "MSI placeholder"),
            UninstallSource::Undetermined => write!(f, "undetermined"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UninstallCommand {
    pub command: String,
    pub source: UninstallSource,
}

impl UninstallCommand {
    fn new(command: impl Into<String>, source: UninstallSource) -> Self {
        Self {
            command: command.into(),
            source,
        }
    }

    /// Whether the command still needs a human to fill something in
    pub fn is_placeholder(&self) -> bool {
        matches!(
            self.source,
            UninstallSource::MsiPlaceholder | UninstallSource::Undetermined
        ) || self.command.contains("{PRODUCT_CODE}")
    }
}

/// Everything the resolver needs for one installer
#[derive(Debug, Clone, Default)]
pub struct ResolveInput {
    pub installer_type_key: String,
    /// Installer filename, substituted literally
    pub filename: String,
    pub app_name: Option<String>,
    pub vendor: Option<String>,
    pub version: Option<String>,
    pub uninstall_string: Option<String>,
    pub product_code: Option<String>,
}

impl ResolveInput {
    pub fn new(installer_type_key: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            installer_type_key: installer_type_key.into(),
            filename: filename.into(),
            ..Default::default()
        }
    }

    /// Fill fields that are still unset from parsed metadata
    pub fn with_metadata(mut self, metadata: &ParsedMetadata) -> Self {
        fn fill(slot: &mut Option<String>, value: Option<&str>) {
            if slot.is_none() {
                *slot = value.map(String::from);
            }
        }
        fill(&mut self.app_name, metadata.app_name());
        fill(&mut self.vendor, metadata.publisher());
        fill(&mut self.version, metadata.version());
        fill(&mut self.uninstall_string, metadata.uninstall_string());
        fill(&mut self.product_code, metadata.product_code());
        self
    }

    pub fn with_uninstall_string(mut self, value: impl Into<String>) -> Self {
        self.uninstall_string = Some(value.into());
        self
    }

    pub fn with_product_code(mut self, value: impl Into<String>) -> Self {
        self.product_code = Some(value.into());
        self
    }

    fn uninstall_string(&self) -> Option<&str> {
        self.uninstall_string
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Explicit product code, or one found in an msiexec uninstall string
    ///
    /// GUIDs in other uninstall strings (a Burn bundle id under
    /// `Package Cache`, say) are not product codes.
    pub fn effective_product_code(&self) -> Option<String> {
        self.product_code
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(normalize_product_code)
            .or_else(|| {
                self.uninstall_string()
                    .filter(|s| is_msiexec(s))
                    .and_then(extract_product_code)
            })
    }

    fn template_vars(&self) -> TemplateVars {
        let mut vars = TemplateVars::new().with(template::FILENAME, self.filename.as_str());
        vars.set_opt(template::APP_NAME, self.app_name.as_deref());
        vars.set_opt(template::VENDOR, self.vendor.as_deref());
        vars.set_opt(template::VERSION, self.version.as_deref());
        vars.set_opt(template::PRODUCT_CODE, self.effective_product_code().as_deref());

        // msiexec strings never fill an executable-path placeholder; they are
        // reduced to a product-code command instead
        if let Some(raw) = self.uninstall_string().filter(|s| !is_msiexec(s)) {
            vars.set(template::UNINSTALL_STRING, strip_outer_quotes(raw));
        }
        vars
    }

    fn is_msi_package(&self) -> bool {
        self.installer_type_key == MSI
            || self.filename.to_ascii_lowercase().ends_with(".msi")
    }
}

/// Resolved commands for one installer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub installer_type_key: String,
    /// Rule display name
    pub installer_type: String,
    pub install_command: String,
    pub uninstall: UninstallCommand,
    pub detection_method: String,
    pub requires_restart: bool,
    pub product_code: Option<String>,
}

/// Resolve install/uninstall commands for an installer
///
/// Fails only on configuration problems: an unknown installer type or an
/// install template that cannot be filled.
pub fn resolve(table: &RuleTable, input: &ResolveInput) -> Result<Resolution> {
    let key = input.installer_type_key.as_str();
    let record = table.require(key)?;
    let vars = input.template_vars();

    let install_command =
        template::render(&record.install_command, &vars).map_err(|e| PackPilotError::Template {
            key: key.to_string(),
            message: e.to_string(),
        })?;

    let uninstall = resolve_uninstall(record.uninstall_command.as_deref(), input, &vars);
    log::debug!("resolved '{}': uninstall from {}", key, uninstall.source);

    Ok(Resolution {
        installer_type_key: key.to_string(),
        installer_type: record.installer_type.clone(),
        install_command,
        uninstall,
        detection_method: record.detection_method.clone(),
        requires_restart: record.requires_restart,
        product_code: input.effective_product_code(),
    })
}

fn resolve_uninstall(
    uninstall_template: Option<&str>,
    input: &ResolveInput,
    vars: &TemplateVars,
) -> UninstallCommand {
    if let Some(t) = uninstall_template.filter(|t| template::can_render(t, vars)) {
        if let Ok(command) = template::render(t, vars) {
            return UninstallCommand::new(command, UninstallSource::Template);
        }
    }

    if let Some(raw) = input.uninstall_string() {
        return normalize_uninstall_string(raw);
    }

    if input.is_msi_package() {
        return UninstallCommand::new(MSI_PLACEHOLDER_UNINSTALL, UninstallSource::MsiPlaceholder);
    }

    UninstallCommand::new(UNDETERMINED_UNINSTALL, UninstallSource::Undetermined)
}

/// Turn a registry UninstallString into a silent uninstall command
pub fn normalize_uninstall_string(raw: &str) -> UninstallCommand {
    let raw = raw.trim();

    if is_msiexec(raw) {
        let code = extract_product_code(raw).unwrap_or_else(|| "{PRODUCT_CODE}".to_string());
        return UninstallCommand::new(
            format!("msiexec /x {} /qn /norestart", code),
            UninstallSource::MsiNormalized,
        );
    }

    let (exe, args) = split_executable(raw);
    let file_name = exe
        .rsplit(['\\', '/'])
        .next()
        .unwrap_or(exe)
        .to_ascii_lowercase();

    let (flags, source) = if INNO_UNINSTALLER_REGEX.is_match(&file_name) {
        (INNO_SILENT_FLAGS, UninstallSource::InnoNormalized)
    } else if file_name.starts_with("uninst") && file_name.ends_with(".exe") {
        (NSIS_SILENT_FLAGS, UninstallSource::NsisNormalized)
    } else {
        return UninstallCommand::new(raw, UninstallSource::RawString);
    };

    let mut command = format!("\"{}\"", exe);
    if !args.is_empty() {
        command.push(' ');
        command.push_str(args);
    }
    for flag in flags {
        let present = args
            .split_whitespace()
            .any(|a| a.eq_ignore_ascii_case(flag));
        if !present {
            command.push(' ');
            command.push_str(flag);
        }
    }

    UninstallCommand::new(command, source)
}

/// First GUID in the text, upper-cased and wrapped in braces
pub fn extract_product_code(text: &str) -> Option<String> {
    GUID_REGEX
        .captures(text)
        .map(|caps| format!("{{{}}}", caps[1].to_ascii_uppercase()))
}

fn normalize_product_code(code: &str) -> String {
    extract_product_code(code).unwrap_or_else(|| code.to_string())
}

fn is_msiexec(text: &str) -> bool {
    MSIEXEC_REGEX.is_match(text)
}

/// `"C:\x y\a.exe" args` or `C:\x\a.exe args` -> (path, args)
fn split_executable(raw: &str) -> (&str, &str) {
    if let Some(rest) = raw.strip_prefix('"') {
        if let Some(end) = rest.find('"') {
            return (&rest[..end], rest[end + 1..].trim());
        }
        return (rest, "");
    }

    match raw.to_ascii_lowercase().find(".exe") {
        Some(idx) => (&raw[..idx + 4], raw[idx + 4..].trim()),
        None => (raw, ""),
    }
}

/// `"C:\path\uninst.exe"` -> `C:\path\uninst.exe`; anything else unchanged
fn strip_outer_quotes(value: &str) -> &str {
    match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) if !inner.contains('"') => inner,
        _ => value,
    }
}
