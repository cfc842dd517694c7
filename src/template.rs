//! `{placeholder}` substitution for command templates
//!
//! Placeholders are `{name}` where `name` is an identifier. `{{` and `}}`
//! produce literal braces. Brace groups that are not identifiers, such as a
//! GUID `{731F6BAA-...}`, are copied through untouched.

use std::collections::BTreeMap;
use thiserror::Error;

pub const FILENAME: &str = "filename";
pub const APP_NAME: &str = "app_name";
pub const VENDOR: &str = "vendor";
pub const VERSION: &str = "version";
pub const UNINSTALL_STRING: &str = "uninstall_string";
pub const PRODUCT_CODE: &str = "product_code";

/// Placeholders an install template may use; all are known before resolution
pub const INSTALL_PLACEHOLDERS: &[&str] = &[FILENAME, APP_NAME, VENDOR, VERSION];

/// Placeholders an uninstall template may use
pub const UNINSTALL_PLACEHOLDERS: &[&str] = &[
    FILENAME,
    APP_NAME,
    VENDOR,
    VERSION,
    UNINSTALL_STRING,
    PRODUCT_CODE,
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("no value for placeholder {{{0}}}")]
    Unfilled(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Placeholder(&'a str),
}

/// Values available for substitution
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    values: BTreeMap<String, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.values.insert(name.to_string(), value.into());
    }

    /// Set only when a non-blank value is present
    pub fn set_opt(&mut self, name: &str, value: Option<&str>) {
        if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
            self.set(name, v);
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

/// Names of all placeholders in a template, in order of appearance
pub fn placeholders(template: &str) -> Vec<&str> {
    segments(template)
        .into_iter()
        .filter_map(|s| match s {
            Segment::Placeholder(name) => Some(name),
            Segment::Literal(_) => None,
        })
        .collect()
}

/// Whether every placeholder in the template has a value
pub fn can_render(template: &str, vars: &TemplateVars) -> bool {
    placeholders(template).iter().all(|p| vars.get(p).is_some())
}

/// Substitute placeholders; fails on the first placeholder without a value
pub fn render(template: &str, vars: &TemplateVars) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());

    for segment in segments(template) {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Placeholder(name) => {
                let value = vars
                    .get(name)
                    .ok_or_else(|| TemplateError::Unfilled(name.to_string()))?;
                out.push_str(value);
            }
        }
    }

    Ok(out)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn segments(template: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let bytes = template.as_bytes();
    let mut literal_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'{' | b'}' if bytes.get(i + 1) == Some(&bytes[i]) => {
                // Escaped brace: keep one, drop the other
                segments.push(Segment::Literal(&template[literal_start..=i]));
                i += 2;
                literal_start = i;
            }
            b'{' => {
                let close = template[i + 1..].find('}').map(|c| i + 1 + c);
                match close {
                    Some(end) if is_identifier(&template[i + 1..end]) => {
                        if literal_start < i {
                            segments.push(Segment::Literal(&template[literal_start..i]));
                        }
                        segments.push(Segment::Placeholder(&template[i + 1..end]));
                        i = end + 1;
                        literal_start = i;
                    }
                    _ => i += 1,
                }
            }
            _ => i += 1,
        }
    }

    if literal_start < template.len() {
        segments.push(Segment::Literal(&template[literal_start..]));
    }

    segments
}
