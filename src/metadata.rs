//! Metadata parser for pasted PowerShell output
//!
//! Converts free-form `Key : Value` text into a map of trimmed keys to
//! trimmed values. Parsing never fails: input that yields nothing is an
//! empty map, which callers treat as "extraction failed, ask for manual entry".

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Acceptable key text (left of the separator)
static KEY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_ .()\-]*$").unwrap());

/// `Identifier   value` lines, only tried when no `:`/`=` line matched
static WHITESPACE_PAIR_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z][A-Za-z0-9_]*)\s+(\S.*)$").unwrap());

/// Well-known field names emitted by the metadata script
pub mod keys {
    pub const APP_NAME: &str = "AppName";
    pub const PUBLISHER: &str = "Publisher";
    pub const VERSION: &str = "Version";
    pub const ARCHITECTURE: &str = "Architecture";
    pub const INSTALL_CONTEXT: &str = "InstallContext";
    pub const APPS_AND_FEATURES_NAME: &str = "AppsAndFeaturesName";
    pub const UNINSTALL_STRING: &str = "UninstallString";
    pub const PRODUCT_CODE: &str = "ProductCode";
}

/// Output of the metadata script for Microsoft Teams, used by `packpilot sample`
pub const SAMPLE_OUTPUT: &str = "AppName : Microsoft Teams
Publisher : Microsoft Corporation
Version : 1.6.00.1381
Architecture : 64-bit
InstallContext : System
AppsAndFeaturesName : Microsoft Teams
UninstallString : MsiExec.exe /X{731F6BAA-A986-45A4-8936-7C3AAAAA760B}";

/// How lines that are not `Key: Value` pairs are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMode {
    /// One field per line; other lines are ignored
    #[default]
    Simple,
    /// Other lines continue the value of the most recent key
    Multiline,
}

/// Parsed `Key -> Value` fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParsedMetadata {
    fields: BTreeMap<String, String>,
}

impl ParsedMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Exact key lookup
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Case-insensitive key lookup, exact match preferred
    pub fn get_ci(&self, key: &str) -> Option<&str> {
        self.get(key).or_else(|| {
            self.fields
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.as_str())
        })
    }

    /// Set a field by hand (manual entry after a failed extraction)
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.fields
    }

    pub fn app_name(&self) -> Option<&str> {
        self.get_ci(keys::APP_NAME)
    }

    pub fn publisher(&self) -> Option<&str> {
        self.get_ci(keys::PUBLISHER)
    }

    pub fn version(&self) -> Option<&str> {
        self.get_ci(keys::VERSION)
    }

    pub fn architecture(&self) -> Option<&str> {
        self.get_ci(keys::ARCHITECTURE)
    }

    pub fn install_context(&self) -> Option<&str> {
        self.get_ci(keys::INSTALL_CONTEXT)
    }

    pub fn apps_and_features_name(&self) -> Option<&str> {
        self.get_ci(keys::APPS_AND_FEATURES_NAME)
    }

    pub fn uninstall_string(&self) -> Option<&str> {
        self.get_ci(keys::UNINSTALL_STRING)
    }

    pub fn product_code(&self) -> Option<&str> {
        self.get_ci(keys::PRODUCT_CODE)
    }
}

impl FromIterator<(String, String)> for ParsedMetadata {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Parse in [`ParseMode::Simple`]
pub fn parse(text: &str) -> ParsedMetadata {
    parse_with_mode(text, ParseMode::Simple)
}

/// Parse `Key: Value` (or `Key = Value`) lines
pub fn parse_with_mode(text: &str, mode: ParseMode) -> ParsedMetadata {
    let mut fields = BTreeMap::new();
    // Key being continued in multiline mode, with its value so far
    let mut current: Option<(String, String)> = None;
    let text = text.trim_start_matches('\u{feff}');

    for line in text.lines() {
        match split_key_value(line) {
            Some((key, value)) => {
                flush(&mut fields, current.take());
                match mode {
                    ParseMode::Simple => {
                        if !value.is_empty() {
                            fields.insert(key.to_string(), value.to_string());
                        }
                    }
                    ParseMode::Multiline => {
                        current = Some((key.to_string(), value.to_string()));
                    }
                }
            }
            None => {
                if let (ParseMode::Multiline, Some((_, value))) = (mode, current.as_mut()) {
                    if !value.is_empty() {
                        value.push('\n');
                    }
                    value.push_str(line.trim());
                }
            }
        }
    }
    flush(&mut fields, current.take());

    if fields.is_empty() {
        fields = parse_whitespace_pairs(text);
    }

    log::debug!("parsed {} metadata field(s)", fields.len());
    ParsedMetadata { fields }
}

fn flush(fields: &mut BTreeMap<String, String>, entry: Option<(String, String)>) {
    if let Some((key, value)) = entry {
        let value = value.trim();
        if !value.is_empty() {
            fields.insert(key, value.to_string());
        }
    }
}

/// Split a line at its separator: the first `:`, or the first `=` when the
/// `:` split gives no valid key. A `:` followed by `\` or `/` belongs to a drive
/// letter or URL and is not a separator.
fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let colon = line
        .find(':')
        .filter(|&idx| !matches!(line[idx + 1..].chars().next(), Some('\\') | Some('/')));

    colon
        .and_then(|idx| split_at_separator(line, idx))
        .or_else(|| split_at_separator(line, line.find('=')?))
}

fn split_at_separator(line: &str, idx: usize) -> Option<(&str, &str)> {
    let key = line[..idx].trim();
    if !KEY_REGEX.is_match(key) {
        return None;
    }
    Some((key, line[idx + 1..].trim()))
}

fn parse_whitespace_pairs(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let caps = WHITESPACE_PAIR_REGEX.captures(line.trim())?;
            Some((caps[1].to_string(), caps[2].trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sample_output() {
        let data = parse(SAMPLE_OUTPUT);
        assert_eq!(data.len(), 7);
        assert_eq!(data.app_name(), Some("Microsoft Teams"));
        assert_eq!(data.publisher(), Some("Microsoft Corporation"));
        assert_eq!(data.version(), Some("1.6.00.1381"));
        assert_eq!(
            data.uninstall_string(),
            Some("MsiExec.exe /X{731F6BAA-A986-45A4-8936-7C3AAAAA760B}")
        );
    }

    #[test]
    fn test_round_trip_synthetic_fixture() {
        let original: BTreeMap<String, String> = [
            ("AppName", "7-Zip"),
            ("Publisher", "Igor Pavlov"),
            ("Version", "23.01"),
            ("HelpLink", "https://www.7-zip.org/"),
            ("Install Location", "C:\\Program Files\\7-Zip\\"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let text: String = original
            .iter()
            .map(|(k, v)| format!("{} : {}\n", k, v))
            .collect();

        assert_eq!(parse(&text).into_inner(), original);
        assert_eq!(
            parse_with_mode(&text, ParseMode::Multiline).into_inner(),
            original
        );
    }

    #[test]
    fn test_empty_and_whitespace_input() {
        assert!(parse("").is_empty());
        assert!(parse("   \n\t\n  ").is_empty());
        assert!(parse_with_mode("\n\n", ParseMode::Multiline).is_empty());
    }

    #[test]
    fn test_last_write_wins() {
        let data = parse("Foo: 1\nFoo: 2");
        assert_eq!(data.get("Foo"), Some("2"));
        assert_eq!(data.len(), 1);
    }

    #[test]
    fn test_equals_fallback() {
        let data = parse("AppName = Notepad++\nVersion=8.6");
        assert_eq!(data.get("AppName"), Some("Notepad++"));
        assert_eq!(data.get("Version"), Some("8.6"));
    }

    #[test]
    fn test_colon_takes_precedence_over_equals() {
        let data = parse("Options: A=1");
        assert_eq!(data.get("Options"), Some("A=1"));
    }

    #[test]
    fn test_empty_key_or_value_rejected() {
        let data = parse(": value\nKey:\nKey2 :   \nGood: yes");
        assert_eq!(data.len(), 1);
        assert_eq!(data.get("Good"), Some("yes"));
    }

    #[test]
    fn test_drive_letter_is_not_a_separator() {
        let data = parse("C:\\Program Files\\App\\uninst.exe");
        assert!(data.is_empty());

        let data = parse("UninstallString=C:\\App\\uninst.exe /S");
        assert_eq!(data.uninstall_string(), Some("C:\\App\\uninst.exe /S"));
    }

    #[test]
    fn test_multiline_continuation() {
        let text = "AppName : Foo\nUninstallString : \"C:\\Program Files\\Foo\\\nuninstall.exe\" --silent\nVersion : 1.0";
        let data = parse_with_mode(text, ParseMode::Multiline);
        assert_eq!(
            data.uninstall_string(),
            Some("\"C:\\Program Files\\Foo\\\nuninstall.exe\" --silent")
        );
        assert_eq!(data.version(), Some("1.0"));
    }

    #[test]
    fn test_multiline_paragraphs() {
        let text = "Description: First paragraph.\n\nSecond paragraph.\n\nVersion: 2";
        let data = parse_with_mode(text, ParseMode::Multiline);
        assert_eq!(
            data.get("Description"),
            Some("First paragraph.\n\nSecond paragraph.")
        );
        assert_eq!(data.get("Version"), Some("2"));
    }

    #[test]
    fn test_multiline_empty_key_opened_by_continuation() {
        let text = "Notes:\n  line one\n  line two\nEmpty:\nVersion: 3";
        let data = parse_with_mode(text, ParseMode::Multiline);
        assert_eq!(data.get("Notes"), Some("line one\nline two"));
        assert_eq!(data.get("Empty"), None);
    }

    #[test]
    fn test_simple_mode_ignores_continuation_lines() {
        let text = "Description: First\nmore words here that wrap\nVersion: 2";
        let data = parse(text);
        assert_eq!(data.get("Description"), Some("First"));
    }

    #[test]
    fn test_leading_noise_before_first_key() {
        let text = "----\n\nAppName : Foo";
        let data = parse_with_mode(text, ParseMode::Multiline);
        assert_eq!(data.len(), 1);
        assert_eq!(data.app_name(), Some("Foo"));
    }

    #[test]
    fn test_byte_order_mark_is_ignored() {
        let data = parse("\u{feff}AppName: Foo");
        assert_eq!(data.app_name(), Some("Foo"));
    }

    #[test]
    fn test_whitespace_pairs_fallback() {
        let data = parse("AppName   Foo Bar\nVersion   1.2");
        assert_eq!(data.get("AppName"), Some("Foo Bar"));
        assert_eq!(data.get("Version"), Some("1.2"));
    }

    #[test]
    fn test_equals_line_with_colon_in_value() {
        let data = parse("DisplayName=Foo: The App\nVersion=1.0");
        assert_eq!(data.get("DisplayName"), Some("Foo: The App"));
        assert_eq!(data.get("Version"), Some("1.0"));

        let data = parse_with_mode("DisplayName=Foo: The App", ParseMode::Multiline);
        assert_eq!(data.get("DisplayName"), Some("Foo: The App"));
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let data = parse("appname: lower");
        assert_eq!(data.get("AppName"), None);
        assert_eq!(data.app_name(), Some("lower"));
    }

    #[test]
    fn test_malformed_input_never_panics() {
        let inputs = ["::::", "====", ":", "=", "🚀: rocket", "a\rb: c", "k:\u{0}"];
        for input in inputs {
            let _ = parse(input);
            let _ = parse_with_mode(input, ParseMode::Multiline);
        }
    }
}
