//! CLI integration tests

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::tempdir;

fn fixtures_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn fixture(name: &str) -> String {
    fixtures_path().join(name).to_string_lossy().into_owned()
}

/// packpilot running in an empty directory with an empty home, so no
/// settings file is picked up by accident
fn packpilot(dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("packpilot").unwrap();
    cmd.current_dir(dir.path())
        .env("HOME", dir.path())
        .env_remove("RUST_LOG")
        .arg("--no-color");
    cmd
}

#[test]
fn test_sample() {
    let dir = tempdir().unwrap();
    packpilot(&dir)
        .arg("sample")
        .assert()
        .success()
        .stdout(predicate::str::contains("AppName : Microsoft Teams"))
        .stdout(predicate::str::contains("UninstallString : MsiExec.exe"));
}

#[test]
fn test_parse_file() {
    let dir = tempdir().unwrap();
    packpilot(&dir)
        .args(["parse", &fixture("teams_output.txt")])
        .assert()
        .success()
        .stdout(predicate::str::contains("Publisher : Microsoft Corporation"))
        .stdout(predicate::str::contains("Version : 1.6.00.1381"));
}

#[test]
fn test_parse_stdin_json() {
    let dir = tempdir().unwrap();
    packpilot(&dir)
        .args(["parse", "-", "--json"])
        .write_stdin("AppName: 7-Zip\nVersion = 23.01\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"AppName\": \"7-Zip\""))
        .stdout(predicate::str::contains("\"Version\": \"23.01\""));
}

#[test]
fn test_parse_nothing_found() {
    let dir = tempdir().unwrap();
    packpilot(&dir)
        .arg("parse")
        .write_stdin("----\n")
        .assert()
        .success()
        .stderr(predicate::str::contains("no metadata fields found"));
}

#[test]
fn test_parse_multiline() {
    let dir = tempdir().unwrap();
    packpilot(&dir)
        .args(["parse", &fixture("multiline_output.txt"), "--multiline", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "\"Description\": \"Endpoint agent for Contoso\\nmanagement services.\"",
        ));
}

#[test]
fn test_resolve_msi_from_uninstall_string() {
    let dir = tempdir().unwrap();
    packpilot(&dir)
        .args([
            "--rules",
            &fixture("rules.json"),
            "resolve",
            "--type",
            "msi",
            "--file",
            "Teams.msi",
            "--uninstall-string",
            "MsiExec.exe /X{731F6BAA-A986-45A4-8936-7C3AAAAA760B}",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("msiexec /i \"Teams.msi\" /qn /norestart"))
        .stdout(predicate::str::contains(
            "msiexec /x {731F6BAA-A986-45A4-8936-7C3AAAAA760B} /qn /norestart",
        ));
}

#[test]
fn test_resolve_nsis_with_metadata() {
    let dir = tempdir().unwrap();
    packpilot(&dir)
        .args([
            "--rules",
            &fixture("rules.json"),
            "resolve",
            "-t",
            "exe_nsis",
            "-f",
            "npp.8.6.2.Installer.x64.exe",
            "--metadata",
            &fixture("notepadpp_output.txt"),
            "--json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            r#""command": "\"C:\\Program Files\\Notepad++\\uninstall.exe\" /S""#,
        ))
        .stdout(predicate::str::contains("\"source\": \"template\""));
}

#[test]
fn test_resolve_undetermined_uninstall() {
    let dir = tempdir().unwrap();
    packpilot(&dir)
        .args([
            "--rules",
            &fixture("rules.json"),
            "resolve",
            "--type",
            "exe_nsis",
            "--file",
            "Setup.exe",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"Setup.exe\" /S"))
        .stdout(predicate::str::contains("Cannot determine uninstall command"));
}

#[test]
fn test_resolve_unknown_type() {
    let dir = tempdir().unwrap();
    packpilot(&dir)
        .args([
            "--rules",
            &fixture("rules.json"),
            "resolve",
            "--type",
            "exe_squirrel",
            "--file",
            "Setup.exe",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"))
        .stderr(predicate::str::contains("Unknown installer type: exe_squirrel"))
        .stderr(predicate::str::contains("packpilot rules validate"));
}

#[test]
fn test_missing_rules_file_is_fatal() {
    let dir = tempdir().unwrap();
    packpilot(&dir)
        .args(["resolve", "--type", "msi", "--file", "App.msi"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Rules file not found"))
        .stderr(predicate::str::contains("packpilot rules init"));
}

#[test]
fn test_broken_rules_file_is_fatal() {
    let dir = tempdir().unwrap();
    packpilot(&dir)
        .args([
            "--rules",
            &fixture("broken_rules.json"),
            "resolve",
            "--type",
            "exe_nsis",
            "--file",
            "Setup.exe",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "Rule 'exe_nsis' is missing required field 'install_command'",
        ));
}

#[test]
fn test_rules_without_uninstall_template() {
    let dir = tempdir().unwrap();
    packpilot(&dir)
        .args([
            "--rules",
            &fixture("minimal_rules.json"),
            "resolve",
            "--type",
            "exe_nsis",
            "--file",
            "Setup.exe",
            "--uninstall-string",
            "C:\\Program Files\\Foo\\uninst.exe",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "\"C:\\Program Files\\Foo\\uninst.exe\" /S",
        ))
        .stdout(predicate::str::contains("NSIS uninstall string"));
}

#[test]
fn test_rules_list_and_show() {
    let dir = tempdir().unwrap();
    packpilot(&dir)
        .args(["--rules", &fixture("rules.json"), "rules", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("exe_nsis"))
        .stdout(predicate::str::contains("MSI Installer"))
        .stdout(predicate::str::contains("no uninstall template"));

    packpilot(&dir)
        .args(["--rules", &fixture("rules.json"), "rules", "show", "msi"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"installer_type\": \"MSI Installer\""));
}

#[test]
fn test_rules_init_and_validate() {
    let dir = tempdir().unwrap();

    packpilot(&dir)
        .args(["rules", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created"));
    assert!(dir.path().join("rules.json").is_file());

    packpilot(&dir)
        .args(["rules", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    packpilot(&dir)
        .args(["rules", "init", "--force"])
        .assert()
        .success();

    packpilot(&dir)
        .args(["rules", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("6 installer type(s)"));
}

#[test]
fn test_rules_validate_broken() {
    let dir = tempdir().unwrap();
    packpilot(&dir)
        .args(["rules", "validate", &fixture("broken_rules.json")])
        .assert()
        .failure()
        .stderr(predicate::str::contains("install_command"));
}

#[test]
fn test_recipe_writes_exports() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("out");

    packpilot(&dir)
        .args([
            "--rules",
            &fixture("rules.json"),
            "recipe",
            "Teams_windows_x64.msi",
            "--metadata",
            &fixture("teams_output.txt"),
            "--output",
            out.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Microsoft Teams"))
        .stdout(predicate::str::contains(
            "msiexec /x {731F6BAA-A986-45A4-8936-7C3AAAAA760B} /qn /norestart",
        ))
        .stderr(predicate::str::contains("Wrote 8 file(s)"));

    for name in [
        "Microsoft_Teams_deployment.json",
        "Microsoft_Teams_install.ps1",
        "README.md",
        "Install.ps1",
        "Uninstall.ps1",
        "Detection.ps1",
        "Requirements.json",
        "intune-manifest.json",
    ] {
        assert!(out.join(name).is_file(), "missing {}", name);
    }

    let package: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(out.join("Microsoft_Teams_deployment.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(package["metadata"]["packager"], "PackPilot Pro");
    assert_eq!(package["application"]["vendor"], "Microsoft Corporation");
    assert_eq!(
        package["application"]["description"],
        "Microsoft Teams is a versatile application that provides essential functionality for business operations."
    );
}

#[test]
fn test_recipe_manual_entry() {
    let dir = tempdir().unwrap();
    packpilot(&dir)
        .args([
            "--rules",
            &fixture("rules.json"),
            "recipe",
            "contoso-inno-setup.exe",
            "--vendor",
            "Contoso",
            "--version",
            "2.1",
            "--context",
            "user",
            "--json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"app_name\": \"Contoso Inno Setup\""))
        .stdout(predicate::str::contains("\"installer_type_key\": \"exe_inno\""))
        .stdout(predicate::str::contains("\"install_context\": \"User\""));
}

#[test]
fn test_recipe_missing_fields() {
    let dir = tempdir().unwrap();
    packpilot(&dir)
        .args(["--rules", &fixture("rules.json"), "recipe", "Setup.exe"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing required field(s): vendor, version"))
        .stderr(predicate::str::contains("hint:").not());
}

#[test]
fn test_recipe_from_package_folder() {
    let dir = tempdir().unwrap();
    let package = dir.path().join("package");
    std::fs::create_dir(&package).unwrap();
    for name in ["b-setup.msi", "Contoso_Agent.exe", "settings.json", "prep.ps1"] {
        std::fs::write(package.join(name), b"MZ").unwrap();
    }

    packpilot(&dir)
        .args([
            "--rules",
            &fixture("rules.json"),
            "recipe",
            package.to_str().unwrap(),
            "--vendor",
            "Contoso",
            "--version",
            "3.0",
            "--json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"uploaded_filename\": \"Contoso_Agent.exe\""))
        .stdout(predicate::str::contains("\"app_name\": \"Contoso Agent\""))
        .stderr(predicate::str::contains("2 installers"));
}

#[test]
fn test_recipe_from_folder_without_installer() {
    let dir = tempdir().unwrap();
    let package = dir.path().join("package");
    std::fs::create_dir(&package).unwrap();
    std::fs::write(package.join("readme.txt"), b"").unwrap();

    packpilot(&dir)
        .args(["--rules", &fixture("rules.json"), "recipe", package.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no installer found"));
}

#[test]
fn test_recipe_app_name_cannot_leave_output_dir() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("a").join("out");

    packpilot(&dir)
        .args([
            "--rules",
            &fixture("rules.json"),
            "recipe",
            "Setup.exe",
            "--metadata",
            "-",
            "--output",
            out.to_str().unwrap(),
        ])
        .write_stdin("AppName : ../../escaped\nPublisher : Acme\nVersion : 1.0\n")
        .assert()
        .success();

    assert!(out.join("_.._escaped_deployment.json").is_file());
    assert!(!dir.path().join("escaped_deployment.json").exists());
    assert_eq!(std::fs::read_dir(&out).unwrap().count(), 8);
}

#[test]
fn test_recipe_interactive() {
    let dir = tempdir().unwrap();
    packpilot(&dir)
        .args([
            "--rules",
            &fixture("rules.json"),
            "recipe",
            "Setup.exe",
            "--metadata",
            &fixture("notepadpp_output.txt"),
            "--interactive",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "ServiceUI.exe -process:explorer.exe \"Setup.exe\"",
        ))
        .stdout(predicate::str::contains("ServiceUI.exe must be included"));
}

#[test]
fn test_recipe_rejects_bad_installer_name() {
    let dir = tempdir().unwrap();
    packpilot(&dir)
        .args([
            "--rules",
            &fixture("rules.json"),
            "recipe",
            "notes.txt",
            "--vendor",
            "A",
            "--version",
            "1",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported file type"));
}

#[test]
fn test_settings_file() {
    let dir = tempdir().unwrap();
    std::fs::copy(fixtures_path().join("rules.json"), dir.path().join("my-rules.json")).unwrap();
    std::fs::write(
        dir.path().join(".packpilot.yaml"),
        "rules_path: my-rules.json\noutput_dir: package\nassignment_group: Pilot_Users\n",
    )
    .unwrap();

    packpilot(&dir)
        .args([
            "recipe",
            "Teams_windows_x64.msi",
            "--metadata",
            &fixture("teams_output.txt"),
        ])
        .assert()
        .success();

    let readme = std::fs::read_to_string(dir.path().join("package/README.md")).unwrap();
    assert!(readme.contains("**Pilot_Users**"));
}

#[test]
fn test_invalid_settings_file() {
    let dir = tempdir().unwrap();
    let settings = dir.path().join("settings.yaml");
    std::fs::write(&settings, "describe:\n  timeout_seconds: 0\n").unwrap();

    packpilot(&dir)
        .args(["--config", settings.to_str().unwrap(), "sample"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("timeout_seconds"));
}
