//! Installer file validation and installer-type detection

use crate::rules::{EXE_INNO, EXE_NSIS, INTERACTIVE, MSI};
use crate::{PackPilotError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Installer extensions accepted as the primary package file
pub const INSTALLER_EXTENSIONS: &[&str] = &["exe", "msi", "msix", "appx"];

const CONFIG_EXTENSIONS: &[&str] = &["json", "xml", "txt"];
const SCRIPT_EXTENSIONS: &[&str] = &["ps1", "bat", "cmd"];

/// 2 GiB
pub const MAX_INSTALLER_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// A validated installer on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallerFile {
    pub path: PathBuf,
    pub file_name: String,
    /// Lower-case extension without the dot
    pub extension: String,
    pub size: u64,
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Check that a file name has an installer extension
pub fn validate_installer_name(file_name: &str) -> Result<String> {
    match extension_of(file_name) {
        Some(ext) if INSTALLER_EXTENSIONS.contains(&ext.as_str()) => Ok(ext),
        _ => Err(PackPilotError::InvalidInstaller(format!(
            "{}: unsupported file type, expected one of: .{}",
            file_name,
            INSTALLER_EXTENSIONS.join(", .")
        ))),
    }
}

/// Check an installer on disk: it must exist, have an installer extension
/// and be no larger than [`MAX_INSTALLER_SIZE`]
pub fn validate_installer(path: &Path) -> Result<InstallerFile> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            PackPilotError::InvalidInstaller(format!("{}: not a file path", path.display()))
        })?
        .to_string();

    let extension = validate_installer_name(&file_name)?;

    let meta = std::fs::metadata(path).map_err(|e| {
        PackPilotError::InvalidInstaller(format!("{}: {}", path.display(), e))
    })?;
    if !meta.is_file() {
        return Err(PackPilotError::InvalidInstaller(format!(
            "{}: not a regular file",
            path.display()
        )));
    }
    if meta.len() > MAX_INSTALLER_SIZE {
        return Err(PackPilotError::InvalidInstaller(format!(
            "{}: file too large ({} bytes, maximum 2 GB)",
            path.display(),
            meta.len()
        )));
    }

    Ok(InstallerFile {
        path: path.to_path_buf(),
        file_name,
        extension,
        size: meta.len(),
    })
}

/// Pick a rules key from the installer filename
///
/// Interactive installs always use the ServiceUI rule. EXE installers default
/// to NSIS unless the name says Inno.
pub fn detect_installer_type(file_name: &str, interactive: bool) -> &'static str {
    if interactive {
        return INTERACTIVE;
    }

    match extension_of(file_name).as_deref() {
        Some("msi") => MSI,
        _ if file_name.to_ascii_lowercase().contains("inno") => EXE_INNO,
        _ => EXE_NSIS,
    }
}

/// Application name guessed from an installer filename:
/// `google_chrome-setup.exe` -> `Google Chrome Setup`
pub fn default_app_name(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    stem.replace(['_', '-'], " ")
        .split(' ')
        .map(title_case)
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Role of a file in a package source folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileCategory {
    Installer,
    Config,
    Script,
    Other,
}

pub fn categorize(file_name: &str) -> FileCategory {
    match extension_of(file_name) {
        Some(ext) if INSTALLER_EXTENSIONS.contains(&ext.as_str()) => FileCategory::Installer,
        Some(ext) if CONFIG_EXTENSIONS.contains(&ext.as_str()) => FileCategory::Config,
        Some(ext) if SCRIPT_EXTENSIONS.contains(&ext.as_str()) => FileCategory::Script,
        _ => FileCategory::Other,
    }
}

/// Files of a package source folder, grouped by role
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageFiles {
    pub installers: Vec<PathBuf>,
    pub configs: Vec<PathBuf>,
    pub scripts: Vec<PathBuf>,
}

impl PackageFiles {
    /// Group the files directly inside `dir` (not recursive), sorted by name
    pub fn scan(dir: &Path) -> Result<Self> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        let mut files = Self::default();
        for path in paths {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            match categorize(name) {
                FileCategory::Installer => files.installers.push(path),
                FileCategory::Config => files.configs.push(path),
                FileCategory::Script => files.scripts.push(path),
                FileCategory::Other => {}
            }
        }
        Ok(files)
    }

    /// First installer found, used as the package's main file
    pub fn primary_installer(&self) -> Option<&Path> {
        self.installers.first().map(PathBuf::as_path)
    }
}
