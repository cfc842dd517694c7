//! Installer rules table
//!
//! A JSON object mapping installer-type keys (`exe_nsis`, `msi`, ...) to
//! [`RuleRecord`]s. The table is loaded once and never modified afterwards.
//!
//! A missing or malformed rules file is a fatal configuration error. The
//! built-in table is only written to disk when asked for explicitly
//! ([`RuleTable::write_builtin`]).

use crate::template::{self, INSTALL_PLACEHOLDERS, UNINSTALL_PLACEHOLDERS};
use crate::{PackPilotError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Default rules file name, resolved against the working directory
pub const DEFAULT_RULES_FILE: &str = "rules.json";

pub const EXE_NSIS: &str = "exe_nsis";
pub const EXE_INNO: &str = "exe_inno";
pub const EXE_INSTALLSHIELD: &str = "exe_installshield";
pub const EXE_BURN: &str = "exe_burn";
pub const MSI: &str = "msi";
pub const INTERACTIVE: &str = "interactive";

/// How to build commands and detection guidance for one installer family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRecord {
    /// Display name, e.g. "EXE (NSIS)"
    pub installer_type: String,
    /// Install command template, uses `{filename}`
    pub install_command: String,
    /// Uninstall command template, uses `{uninstall_string}` / `{product_code}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uninstall_command: Option<String>,
    /// Recommended detection method label
    pub detection_method: String,
    #[serde(default)]
    pub requires_restart: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl RuleRecord {
    fn new(
        installer_type: &str,
        install_command: &str,
        uninstall_command: Option<&str>,
        detection_method: &str,
    ) -> Self {
        Self {
            installer_type: installer_type.to_string(),
            install_command: install_command.to_string(),
            uninstall_command: uninstall_command.map(String::from),
            detection_method: detection_method.to_string(),
            requires_restart: false,
            notes: None,
        }
    }

    /// ServiceUI wrapper used when a rules file has no `interactive` entry
    pub fn interactive_default() -> Self {
        Self::new(
            "Interactive Installer (ServiceUI)",
            "ServiceUI.exe -process:explorer.exe \"{filename}\"",
            Some("ServiceUI.exe -process:explorer.exe \"{uninstall_string}\""),
            "Registry Key Detection",
        )
    }
}

/// Record as it appears in the file, before validation
#[derive(Debug, Deserialize)]
struct RawRuleRecord {
    installer_type: Option<String>,
    install_command: Option<String>,
    uninstall_command: Option<String>,
    detection_method: Option<String>,
    #[serde(default)]
    requires_restart: bool,
    notes: Option<String>,
}

/// Immutable installer-type lookup table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleTable {
    rules: BTreeMap<String, RuleRecord>,
}

impl RuleTable {
    /// The table shipped with packpilot
    pub fn builtin() -> Self {
        let mut rules = BTreeMap::new();

        rules.insert(
            EXE_NSIS.to_string(),
            RuleRecord::new(
                "EXE (NSIS)",
                "\"{filename}\" /S",
                Some("\"{uninstall_string}\" /S"),
                "Registry Key Detection",
            ),
        );
        rules.insert(
            EXE_INNO.to_string(),
            RuleRecord::new(
                "EXE (Inno Setup)",
                "\"{filename}\" /VERYSILENT /SUPPRESSMSGBOXES /NORESTART /SP-",
                Some("\"{uninstall_string}\" /VERYSILENT /SUPPRESSMSGBOXES /NORESTART"),
                "Registry Key Detection",
            ),
        );

        let mut installshield = RuleRecord::new(
            "EXE (InstallShield)",
            "\"{filename}\" /s /v\"/qn /norestart\"",
            None,
            "Registry Key Detection",
        );
        installshield.notes = Some(
            "InstallShield uninstall strings differ between Basic MSI and InstallScript projects"
                .to_string(),
        );
        rules.insert(EXE_INSTALLSHIELD.to_string(), installshield);

        let mut burn = RuleRecord::new(
            "EXE (WiX Burn bundle)",
            "\"{filename}\" /quiet /norestart",
            None,
            "Registry Key Detection",
        );
        burn.notes = Some(
            "The bundle's UninstallString already contains /uninstall; add /quiet".to_string(),
        );
        rules.insert(EXE_BURN.to_string(), burn);

        rules.insert(
            MSI.to_string(),
            RuleRecord::new(
                "MSI Installer",
                "msiexec /i \"{filename}\" /qn /norestart",
                Some("msiexec /x {product_code} /qn /norestart"),
                "MSI Product Code Detection",
            ),
        );
        rules.insert(INTERACTIVE.to_string(), RuleRecord::interactive_default());

        Self { rules }
    }

    /// Load and validate a rules file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PackPilotError::RulesNotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;
        let table = Self::from_json_str(&content).map_err(|e| match e {
            PackPilotError::InvalidRules(msg) => {
                PackPilotError::InvalidRules(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;

        log::info!("loaded {} installer rule(s) from {}", table.len(), path.display());
        Ok(table)
    }

    /// Parse and validate a rules table from JSON text
    pub fn from_json_str(content: &str) -> Result<Self> {
        let raw: BTreeMap<String, RawRuleRecord> = serde_json::from_str(content)
            .map_err(|e| PackPilotError::InvalidRules(e.to_string()))?;

        if raw.is_empty() {
            return Err(PackPilotError::InvalidRules(
                "no installer types defined".to_string(),
            ));
        }

        let mut rules = BTreeMap::new();
        for (key, record) in raw {
            let record = validate_record(&key, record)?;
            rules.insert(key, record);
        }

        if !rules.contains_key(INTERACTIVE) {
            log::debug!("no '{}' rule defined, adding the ServiceUI default", INTERACTIVE);
            rules.insert(INTERACTIVE.to_string(), RuleRecord::interactive_default());
        }

        Ok(Self { rules })
    }

    /// Write the built-in table as pretty JSON. Refuses to overwrite unless `force`.
    pub fn write_builtin(path: &Path, force: bool) -> Result<()> {
        if path.exists() && !force {
            return Err(PackPilotError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists (use --force to overwrite)", path.display()),
            )));
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, Self::builtin().to_json_pretty()?)?;
        log::info!("wrote built-in rules to {}", path.display());
        Ok(())
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.rules)?)
    }

    pub fn get(&self, key: &str) -> Option<&RuleRecord> {
        self.rules.get(key)
    }

    /// Look up a record; an unknown key is a configuration error
    pub fn require(&self, key: &str) -> Result<&RuleRecord> {
        self.get(key)
            .ok_or_else(|| PackPilotError::UnknownInstallerType(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.rules.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RuleRecord)> {
        self.rules.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn required(key: &str, field: &'static str, value: Option<String>) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(PackPilotError::MissingField {
            key: key.to_string(),
            field,
        }),
    }
}

fn check_placeholders(key: &str, field: &str, template: &str, allowed: &[&str]) -> Result<()> {
    for name in template::placeholders(template) {
        if !allowed.contains(&name) {
            return Err(PackPilotError::Template {
                key: key.to_string(),
                message: format!("{} uses unknown placeholder {{{}}}", field, name),
            });
        }
    }
    Ok(())
}

fn validate_record(key: &str, raw: RawRuleRecord) -> Result<RuleRecord> {
    let installer_type = required(key, "installer_type", raw.installer_type)?;
    let install_command = required(key, "install_command", raw.install_command)?;
    let detection_method = required(key, "detection_method", raw.detection_method)?;

    check_placeholders(key, "install_command", &install_command, INSTALL_PLACEHOLDERS)?;

    let uninstall_command = raw.uninstall_command.filter(|u| !u.trim().is_empty());
    match &uninstall_command {
        Some(template) => {
            check_placeholders(key, "uninstall_command", template, UNINSTALL_PLACEHOLDERS)?
        }
        None => log::warn!(
            "rule '{}' has no uninstall_command, uninstall will be derived from metadata",
            key
        ),
    }

    Ok(RuleRecord {
        installer_type,
        install_command,
        uninstall_command,
        detection_method,
        requires_restart: raw.requires_restart,
        notes: raw.notes,
    })
}
