//! Export artifacts for a recipe
//!
//! Generates the files a packager hands to Intune or Patch My PC:
//! - `<App>_deployment.json` and `<App>_install.ps1`
//! - `README.md` recipe card
//! - package folder files `Install.ps1`, `Uninstall.ps1`, `Detection.ps1`,
//!   `Requirements.json`
//! - `intune-manifest.json` (win32LobApp)

use crate::detection::{self, DetectionRule};
use crate::recipe::{Architecture, InstallContext, Recipe};
use crate::{Result, PACKAGER_NAME, VERSION};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const INSTALL_SCRIPT: &str = "Install.ps1";
pub const UNINSTALL_SCRIPT: &str = "Uninstall.ps1";
pub const DETECTION_SCRIPT: &str = "Detection.ps1";
pub const REQUIREMENTS_FILE: &str = "Requirements.json";
pub const README_FILE: &str = "README.md";
pub const INTUNE_MANIFEST: &str = "intune-manifest.json";

pub const DEFAULT_ASSIGNMENT_GROUP: &str = "AAD_Intune_Software_test";

/// Installer exit codes and how Intune should treat them
const RETURN_CODES: &[(i32, &str)] = &[
    (0, "success"),
    (1707, "success"),
    (3010, "softReboot"),
    (1641, "hardReboot"),
    (1618, "retry"),
];

/// Minimum system requirements listed with every package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    #[serde(rename = "OS")]
    pub os: String,
    #[serde(rename = "Architecture")]
    pub architecture: Architecture,
    #[serde(rename = "MinDiskSpace")]
    pub min_disk_space: String,
    #[serde(rename = "MinMemory")]
    pub min_memory: String,
    #[serde(rename = ".NET Framework")]
    pub dotnet_framework: String,
}

impl Requirements {
    pub fn for_recipe(recipe: &Recipe) -> Self {
        Self {
            os: "Windows 10/11".to_string(),
            architecture: recipe.architecture,
            min_disk_space: "500 MB".to_string(),
            min_memory: "4 GB".to_string(),
            dotnet_framework: "4.7.2 or higher".to_string(),
        }
    }
}

/// Settings that affect generated text but not the recipe itself
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub assignment_group: String,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            assignment_group: DEFAULT_ASSIGNMENT_GROUP.to_string(),
        }
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Single-quoted PowerShell literal
fn ps_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `<App>_deployment.json` contents
pub fn deployment_package(recipe: &Recipe) -> serde_json::Value {
    serde_json::json!({
        "metadata": {
            "created": chrono::Local::now().to_rfc3339(),
            "version": VERSION,
            "packager": PACKAGER_NAME,
        },
        "application": recipe,
        "deployment": {
            "install_command": recipe.install_command,
            "uninstall_command": recipe.uninstall.command,
            "detection_rules": detection::detection_rules(recipe),
            "requirements": Requirements::for_recipe(recipe),
        }
    })
}

/// Standalone `<App>_install.ps1`: install then verify
pub fn install_script(recipe: &Recipe) -> String {
    let mut script = String::new();

    script.push_str(&format!("# {} Deployment Script\n", recipe.app_name));
    script.push_str(&format!("# Generated by {}\n", PACKAGER_NAME));
    script.push_str(&format!("# Date: {}\n\n", timestamp()));

    script.push_str(&format!(
        "$AppName = \"{}\"\n",
        detection::ps_escape(&recipe.app_name)
    ));
    script.push_str(&format!(
        "$Version = \"{}\"\n",
        detection::ps_escape(&recipe.version)
    ));
    script.push_str(&format!(
        "$Installer = \"{}\"\n\n",
        detection::ps_escape(&recipe.uploaded_filename)
    ));

    script.push_str("Write-Host \"Installing $AppName v$Version...\" -ForegroundColor Green\n\n");
    script.push_str("# Installation\n");
    script.push_str(&recipe.install_command);
    script.push_str("\n\n# Verification\n");
    script.push_str(&detection::detection_script(recipe));

    script
}

fn run_command_block(script: &mut String, command: &str) {
    script.push_str(&format!("    $Command = {}\n", ps_literal(command)));
    script.push_str(
        "    $process = Start-Process -FilePath $env:ComSpec -ArgumentList \"/c\", $Command -WorkingDirectory $PSScriptRoot -Wait -PassThru\n",
    );
    script.push_str("    Write-Log \"Exit code: $($process.ExitCode)\"\n");
}

/// Package folder `Install.ps1`
pub fn package_install_script(recipe: &Recipe) -> String {
    let mut script = String::new();

    script.push_str("# Intune Win32 App Install Script\n");
    script.push_str(&format!("# Application: {}\n", recipe.app_name));
    script.push_str(&format!("# Version: {}\n", recipe.version));
    script.push_str(&format!("# Publisher: {}\n\n", recipe.vendor));

    script.push_str("$ErrorActionPreference = \"Stop\"\n");
    script.push_str("$LogPath = \"$env:TEMP\\PackPilotInstall.log\"\n\n");

    script.push_str("function Write-Log {\n");
    script.push_str("    param([string]$Message)\n");
    script.push_str("    $timestamp = Get-Date -Format \"yyyy-MM-dd HH:mm:ss\"\n");
    script.push_str("    \"$timestamp - $Message\" | Out-File -FilePath $LogPath -Append\n");
    script.push_str("}\n\n");

    script.push_str("try {\n");
    script.push_str(&format!(
        "    Write-Log \"Installing {}\"\n",
        detection::ps_escape(&recipe.app_name)
    ));
    run_command_block(&mut script, &recipe.install_command);
    script.push_str("\n    switch ($process.ExitCode) {\n");
    script.push_str("        0       { Write-Log \"Installation successful\"; exit 0 }\n");
    script.push_str("        1707    { Write-Log \"Installation successful\"; exit 0 }\n");
    script.push_str("        3010    { Write-Log \"Reboot required\"; exit 3010 }\n");
    script.push_str("        1641    { Write-Log \"Reboot initiated\"; exit 1641 }\n");
    script.push_str("        default { Write-Log \"Installation failed\"; exit $process.ExitCode }\n");
    script.push_str("    }\n");
    script.push_str("}\n");
    script.push_str("catch {\n");
    script.push_str("    Write-Log \"Error: $_\"\n");
    script.push_str("    exit 1\n");
    script.push_str("}\n");

    script
}

/// Package folder `Uninstall.ps1`
///
/// When the uninstall command could not be determined the script fails
/// loudly instead of running placeholder text.
pub fn package_uninstall_script(recipe: &Recipe) -> String {
    let mut script = String::new();

    script.push_str("# Intune Win32 App Uninstall Script\n");
    script.push_str(&format!("# Application: {}\n", recipe.app_name));
    script.push_str(&format!("# Uninstall command source: {}\n\n", recipe.uninstall.source));

    if recipe.uninstall.is_placeholder() {
        script.push_str("# The uninstall command below must be completed before deployment:\n");
        for line in recipe.uninstall.command.lines() {
            script.push_str(&format!("#   {}\n", line));
        }
        script.push_str("\nWrite-Error \"Uninstall command not configured\"\n");
        script.push_str("exit 1\n");
        return script;
    }

    script.push_str("$ErrorActionPreference = \"Stop\"\n");
    script.push_str("$LogPath = \"$env:TEMP\\PackPilotUninstall.log\"\n\n");

    script.push_str("function Write-Log {\n");
    script.push_str("    param([string]$Message)\n");
    script.push_str("    \"$(Get-Date -Format 'yyyy-MM-dd HH:mm:ss') - $Message\" | Out-File -FilePath $LogPath -Append\n");
    script.push_str("}\n\n");

    script.push_str("try {\n");
    run_command_block(&mut script, &recipe.uninstall.command);
    script.push_str("    exit $process.ExitCode\n");
    script.push_str("}\n");
    script.push_str("catch {\n");
    script.push_str("    Write-Log \"Error: $_\"\n");
    script.push_str("    exit 1\n");
    script.push_str("}\n");

    script
}

fn detection_rule_json(rule: &DetectionRule) -> serde_json::Value {
    match rule {
        DetectionRule::ProductCode {
            product_code,
            product_version,
        } => serde_json::json!({
            "@odata.type": "#microsoft.graph.win32LobAppProductCodeDetection",
            "productCode": product_code,
            "productVersionOperator": "greaterThanOrEqual",
            "productVersion": product_version
        }),
        DetectionRule::Registry { key_paths, .. } => serde_json::json!({
            "@odata.type": "#microsoft.graph.win32LobAppRegistryDetection",
            "keyPath": key_paths.first(),
            "check32BitOn64System": key_paths.iter().any(|p| p.contains("WOW6432Node")),
            "detectionType": "exists"
        }),
        DetectionRule::Script { script_content } => serde_json::json!({
            "@odata.type": "#microsoft.graph.win32LobAppPowerShellScriptDetection",
            "scriptContent": script_content,
            "enforceSignatureCheck": false,
            "runAs32Bit": false
        }),
    }
}

/// `intune-manifest.json` in Graph win32LobApp shape
///
/// Only the most specific detection rule is used: the product code for MSI
/// packages, otherwise the detection script.
pub fn intune_manifest(recipe: &Recipe) -> serde_json::Value {
    let rules = detection::detection_rules(recipe);
    let detection_rules: Vec<serde_json::Value> = rules
        .iter()
        .find(|r| matches!(r, DetectionRule::ProductCode { .. }))
        .or_else(|| rules.iter().find(|r| matches!(r, DetectionRule::Script { .. })))
        .map(detection_rule_json)
        .into_iter()
        .collect();

    let applicable_architectures = match recipe.architecture {
        Architecture::X64 => "x64",
        Architecture::X86 => "x86,x64",
        Architecture::Any => "x86,x64,arm64",
    };

    serde_json::json!({
        "@odata.type": "#microsoft.graph.win32LobApp",
        "displayName": recipe.app_name,
        "description": recipe.description.clone().unwrap_or_default(),
        "publisher": recipe.vendor,
        "displayVersion": recipe.version,
        "fileName": recipe.uploaded_filename,
        "installCommandLine": recipe.install_command,
        "uninstallCommandLine": recipe.uninstall.command,
        "applicableArchitectures": applicable_architectures,
        "minimumSupportedWindowsRelease": "1607",
        "installExperience": {
            "runAsAccount": match recipe.install_context {
                InstallContext::System => "system",
                InstallContext::User => "user",
            },
            "deviceRestartBehavior": if recipe.requires_restart { "force" } else { "basedOnReturnCode" },
            "maxRunTimeInMinutes": recipe.timeout_minutes
        },
        "detectionRules": detection_rules,
        "returnCodes": RETURN_CODES.iter().map(|(code, kind)| {
            serde_json::json!({ "returnCode": code, "type": kind })
        }).collect::<Vec<_>>()
    })
}

/// Human-readable recipe card
pub fn readme(recipe: &Recipe, options: &ExportOptions) -> String {
    let mut md = String::new();

    md.push_str(&format!("# {} {}\n\n", recipe.app_name, recipe.version));
    if let Some(ref description) = recipe.description {
        md.push_str(&format!("{}\n\n", description));
    }

    md.push_str("## General Information\n\n");
    md.push_str("| Field | Value |\n");
    md.push_str("|-------|-------|\n");
    md.push_str(&format!("| Application Name | {} |\n", recipe.app_name));
    md.push_str(&format!("| Vendor | {} |\n", recipe.vendor));
    md.push_str(&format!("| Version | {} |\n", recipe.version));
    md.push_str(&format!("| Architecture | {} |\n", recipe.architecture));
    md.push_str(&format!("| Install Context | {} |\n", recipe.install_context));
    md.push_str(&format!("| Apps & Features Name | {} |\n", recipe.apps_features_name));
    md.push_str(&format!("| Installer | {} |\n", recipe.uploaded_filename));
    md.push_str(&format!("| Installer Type | {} |\n", recipe.installer_type));
    md.push_str(&format!("| Category | {} |\n", recipe.category));
    md.push_str(&format!("| Priority | {} |\n", recipe.priority));
    md.push_str(&format!("| Timeout | {} min |\n\n", recipe.timeout_minutes));

    md.push_str("## Commands\n\n");
    md.push_str("Install:\n\n```\n");
    md.push_str(&recipe.install_command);
    md.push_str("\n```\n\nUninstall:\n\n```\n");
    md.push_str(&recipe.uninstall.command);
    md.push_str("\n```\n\n");
    if recipe.uninstall.is_placeholder() {
        md.push_str("> **Note:** the uninstall command needs manual completion before deployment.\n\n");
    }

    let mut flags = Vec::new();
    if recipe.is_interactive {
        flags.push("- Interactive installation: ServiceUI.exe must be in the package");
    }
    if recipe.requires_restart {
        flags.push("- A restart is required after installation");
    }
    if recipe.create_shortcut {
        flags.push("- A desktop shortcut is created");
    }
    if !flags.is_empty() {
        md.push_str("## Installation Flags\n\n");
        md.push_str(&flags.join("\n"));
        md.push_str("\n\n");
    }

    md.push_str("## Detection\n\n");
    md.push_str(&format!("Method: **{}**\n\n", recipe.detection_method));
    md.push_str("Registry paths to check:\n\n");
    for path in detection::registry_paths(recipe.install_context) {
        md.push_str(&format!("- `{}`\n", path));
    }
    if let Some(ref code) = recipe.product_code {
        md.push_str(&format!("\nProduct code: `{}`\n", code));
    }
    md.push_str(&format!("\nSee `{}` for the detection script.\n\n", DETECTION_SCRIPT));

    md.push_str("## Assignment\n\n");
    md.push_str(&format!(
        "Assign the application to **{}** for testing before broad deployment.\n\n",
        options.assignment_group
    ));

    md.push_str(&format!("---\nGenerated by {} on {}\n", PACKAGER_NAME, timestamp()));

    md
}

/// One generated file: name relative to the output directory, and contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: String,
    pub contents: String,
}

/// Every export for a recipe, in the order they are written
pub fn artifacts(recipe: &Recipe, options: &ExportOptions) -> Result<Vec<Artifact>> {
    let slug = recipe.file_slug();
    let pretty = |value: &serde_json::Value| serde_json::to_string_pretty(value);

    Ok(vec![
        Artifact {
            file_name: format!("{}_deployment.json", slug),
            contents: pretty(&deployment_package(recipe))?,
        },
        Artifact {
            file_name: format!("{}_install.ps1", slug),
            contents: install_script(recipe),
        },
        Artifact {
            file_name: README_FILE.to_string(),
            contents: readme(recipe, options),
        },
        Artifact {
            file_name: INSTALL_SCRIPT.to_string(),
            contents: package_install_script(recipe),
        },
        Artifact {
            file_name: UNINSTALL_SCRIPT.to_string(),
            contents: package_uninstall_script(recipe),
        },
        Artifact {
            file_name: DETECTION_SCRIPT.to_string(),
            contents: detection::detection_script(recipe),
        },
        Artifact {
            file_name: REQUIREMENTS_FILE.to_string(),
            contents: serde_json::to_string_pretty(&Requirements::for_recipe(recipe))?,
        },
        Artifact {
            file_name: INTUNE_MANIFEST.to_string(),
            contents: pretty(&intune_manifest(recipe))?,
        },
    ])
}

/// Write all exports into `dir`, creating it if needed
pub fn write_all(recipe: &Recipe, dir: &Path, options: &ExportOptions) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;

    let mut written = Vec::new();
    for artifact in artifacts(recipe, options)? {
        let path = dir.join(&artifact.file_name);
        std::fs::write(&path, artifact.contents)?;
        log::info!("wrote {}", path.display());
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{parse, SAMPLE_OUTPUT};
    use crate::recipe::RecipeRequest;
    use crate::rules::RuleTable;
    use tempfile::tempdir;

    fn teams() -> Recipe {
        let request = RecipeRequest::new("Teams_windows_x64.msi", parse(SAMPLE_OUTPUT));
        Recipe::build(&request, &RuleTable::builtin()).unwrap()
    }

    fn undetermined() -> Recipe {
        let mut request = RecipeRequest::new("Setup.exe", Default::default());
        request.app_name = Some("Foo Tool".to_string());
        request.vendor = Some("Foo".to_string());
        request.version = Some("1.0".to_string());
        Recipe::build(&request, &RuleTable::builtin()).unwrap()
    }

    #[test]
    fn test_deployment_package_shape() {
        let package = deployment_package(&teams());
        assert_eq!(package["metadata"]["packager"], "PackPilot Pro");
        assert_eq!(package["application"]["app_name"], "Microsoft Teams");
        assert_eq!(
            package["deployment"]["uninstall_command"],
            "msiexec /x {731F6BAA-A986-45A4-8936-7C3AAAAA760B} /qn /norestart"
        );
        assert_eq!(package["deployment"]["requirements"]["OS"], "Windows 10/11");
        assert_eq!(package["deployment"]["requirements"]["Architecture"], "64-bit");
        assert_eq!(
            package["deployment"]["detection_rules"][0]["type"],
            "product_code"
        );
    }

    #[test]
    fn test_install_script() {
        let script = install_script(&teams());
        assert!(script.starts_with("# Microsoft Teams Deployment Script"));
        assert!(script.contains("$Installer = \"Teams_windows_x64.msi\""));
        assert!(script.contains("msiexec /i \"Teams_windows_x64.msi\" /qn /norestart"));
        assert!(script.contains("Write-Output \"Not Detected\""));
    }

    #[test]
    fn test_package_scripts_quote_commands() {
        let script = package_install_script(&teams());
        assert!(script.contains("$Command = 'msiexec /i \"Teams_windows_x64.msi\" /qn /norestart'"));
        assert!(script.contains("3010"));

        let uninstall = package_uninstall_script(&teams());
        assert!(uninstall.contains("{731F6BAA-A986-45A4-8936-7C3AAAAA760B}"));
        assert!(uninstall.contains("exit $process.ExitCode"));
    }

    #[test]
    fn test_placeholder_uninstall_script_fails() {
        let script = package_uninstall_script(&undetermined());
        assert!(script.contains("Uninstall command not configured"));
        assert!(!script.contains("Start-Process"));
    }

    #[test]
    fn test_ps_literal() {
        assert_eq!(ps_literal("it's"), "'it''s'");
    }

    #[test]
    fn test_intune_manifest() {
        let manifest = intune_manifest(&teams());
        assert_eq!(manifest["@odata.type"], "#microsoft.graph.win32LobApp");
        assert_eq!(manifest["installExperience"]["runAsAccount"], "system");
        assert_eq!(manifest["installExperience"]["maxRunTimeInMinutes"], 30);
        let rules = manifest["detectionRules"].as_array().unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(
            rules[0]["@odata.type"],
            "#microsoft.graph.win32LobAppProductCodeDetection"
        );

        let exe = intune_manifest(&undetermined());
        assert_eq!(
            exe["detectionRules"][0]["@odata.type"],
            "#microsoft.graph.win32LobAppPowerShellScriptDetection"
        );
    }

    #[test]
    fn test_readme() {
        let options = ExportOptions {
            assignment_group: "Pilot_Group".to_string(),
        };
        let md = readme(&teams(), &options);
        assert!(md.starts_with("# Microsoft Teams 1.6.00.1381"));
        assert!(md.contains("| Vendor | Microsoft Corporation |"));
        assert!(md.contains("**Pilot_Group**"));
        assert!(md.contains("WOW6432Node"));
        assert!(!md.contains("manual completion"));

        assert!(readme(&undetermined(), &options).contains("manual completion"));
    }

    #[test]
    fn test_write_all() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out");
        let written = write_all(&teams(), &out, &ExportOptions::default()).unwrap();

        assert_eq!(written.len(), 8);
        for name in [
            "Microsoft_Teams_deployment.json",
            "Microsoft_Teams_install.ps1",
            README_FILE,
            INSTALL_SCRIPT,
            UNINSTALL_SCRIPT,
            DETECTION_SCRIPT,
            REQUIREMENTS_FILE,
            INTUNE_MANIFEST,
        ] {
            assert!(out.join(name).is_file(), "missing {}", name);
        }

        let requirements: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(out.join(REQUIREMENTS_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(requirements[".NET Framework"], "4.7.2 or higher");
    }
}
