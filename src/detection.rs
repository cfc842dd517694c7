//! Detection rules for a recipe
//!
//! Registry uninstall keys to check, a PowerShell detection script and,
//! for MSI packages with a known product code, a product-code rule.

use crate::recipe::{InstallContext, Recipe};
use crate::rules::MSI;
use serde::{Deserialize, Serialize};

pub const HKLM_UNINSTALL: &str =
    "HKEY_LOCAL_MACHINE\\SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Uninstall";
/// 32-bit applications on a 64-bit OS
pub const HKLM_WOW64_UNINSTALL: &str =
    "HKEY_LOCAL_MACHINE\\SOFTWARE\\WOW6432Node\\Microsoft\\Windows\\CurrentVersion\\Uninstall";
pub const HKCU_UNINSTALL: &str =
    "HKEY_CURRENT_USER\\SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Uninstall";

/// One way Intune can tell the application is installed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DetectionRule {
    /// Uninstall entry with a matching DisplayName under one of the keys
    Registry {
        key_paths: Vec<String>,
        display_name: String,
        display_version: String,
    },
    /// Custom PowerShell script, exit 0 when detected
    Script { script_content: String },
    /// MSI product code at or above the packaged version
    ProductCode {
        product_code: String,
        product_version: String,
    },
}

/// Uninstall keys to search for the given install context
pub fn registry_paths(context: InstallContext) -> Vec<&'static str> {
    let mut paths = vec![HKLM_UNINSTALL, HKLM_WOW64_UNINSTALL];
    if context == InstallContext::User {
        paths.push(HKCU_UNINSTALL);
    }
    paths
}

/// Registry path in PowerShell provider form (`HKLM:\...`)
pub fn provider_path(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("HKEY_LOCAL_MACHINE\\") {
        format!("HKLM:\\{}", rest)
    } else if let Some(rest) = path.strip_prefix("HKEY_CURRENT_USER\\") {
        format!("HKCU:\\{}", rest)
    } else {
        path.to_string()
    }
}

/// Escape text for a double-quoted PowerShell string
pub fn ps_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '`' | '"' | '$') {
            out.push('`');
        }
        out.push(c);
    }
    out
}

/// Detection script matching DisplayName and DisplayVersion
pub fn detection_script(recipe: &Recipe) -> String {
    let mut script = String::new();

    script.push_str("# Intune Detection Script\n");
    script.push_str(&format!("# Application: {}\n\n", recipe.app_name));

    script.push_str(&format!(
        "$AppName = \"{}\"\n",
        ps_escape(&recipe.apps_features_name)
    ));
    script.push_str(&format!("$Version = \"{}\"\n\n", ps_escape(&recipe.version)));

    let paths: Vec<String> = registry_paths(recipe.install_context)
        .into_iter()
        .map(|p| format!("    \"{}\"", provider_path(p)))
        .collect();
    script.push_str("$Paths = @(\n");
    script.push_str(&paths.join(",\n"));
    script.push_str("\n)\n\n");

    script.push_str("foreach ($Path in $Paths) {\n");
    script.push_str("    $App = Get-ChildItem -Path $Path -ErrorAction SilentlyContinue |\n");
    script.push_str("           Get-ItemProperty |\n");
    script.push_str(
        "           Where-Object { $_.DisplayName -like \"*$AppName*\" -and $_.DisplayVersion -eq $Version }\n",
    );
    script.push_str("\n    if ($App) {\n");
    script.push_str("        Write-Output \"Detected: $($App.DisplayName) v$($App.DisplayVersion)\"\n");
    script.push_str("        exit 0\n");
    script.push_str("    }\n");
    script.push_str("}\n\n");

    script.push_str("Write-Output \"Not Detected\"\n");
    script.push_str("exit 1\n");

    script
}

fn uses_msi_detection(recipe: &Recipe) -> bool {
    recipe.installer_type_key == MSI || recipe.detection_method.to_lowercase().contains("msi")
}

/// All detection rules for a recipe, most specific first
pub fn detection_rules(recipe: &Recipe) -> Vec<DetectionRule> {
    let mut rules = Vec::new();

    if let Some(code) = recipe.product_code.as_ref().filter(|_| uses_msi_detection(recipe)) {
        rules.push(DetectionRule::ProductCode {
            product_code: code.clone(),
            product_version: recipe.version.clone(),
        });
    }

    rules.push(DetectionRule::Registry {
        key_paths: registry_paths(recipe.install_context)
            .into_iter()
            .map(String::from)
            .collect(),
        display_name: recipe.apps_features_name.clone(),
        display_version: recipe.version.clone(),
    });
    rules.push(DetectionRule::Script {
        script_content: detection_script(recipe),
    });

    rules
}
