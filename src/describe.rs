//! Best-effort application descriptions
//!
//! [`WingetDescriber`] looks the application up in the `microsoft/winget-pkgs`
//! repository through the GitHub code search API. Any failure yields a
//! generic sentence instead of an error; a description is never required to
//! produce a recipe.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

pub const DEFAULT_USER_AGENT: &str = "PackPilot-Pro/1.0";
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 5;
/// Upper bound for a configured per-request timeout
pub const MAX_TIMEOUT_SECONDS: u64 = 30;

const SEARCH_URL: &str = "https://api.github.com/search/code";
const MANIFESTS_TRIED: usize = 3;
const MIN_DESCRIPTION_LEN: usize = 20;
const MIN_CALL_INTERVAL: Duration = Duration::from_secs(1);

/// Manifest fields checked for a description, in order
const DESCRIPTION_FIELDS: &[&str] = &[
    "Description",
    "ShortDescription",
    "LongDescription",
    "PackageDescription",
];

static PARENTHESIZED_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\([^)]*\)").unwrap());
static NON_WORD_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").unwrap());

/// Anything that can describe an application by name
pub trait DescriptionSource {
    /// Always returns some description, falling back to a generic one
    fn describe(&self, app_name: &str) -> String;
}

/// Why a lookup produced no real description
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("GitHub API rate limit reached")]
    RateLimited,

    #[error("no winget manifests found")]
    NoResults,

    #[error("no usable description in the matching manifests")]
    NoDescription,

    #[error("network error: {0}")]
    Network(String),
}

/// Generic description used when a lookup fails
pub fn fallback_description(app_name: &str, reason: Option<&LookupError>) -> String {
    match reason {
        Some(LookupError::RateLimited) => format!(
            "{} is an enterprise-grade application designed for professional use.",
            app_name
        ),
        Some(LookupError::NoResults) => format!(
            "{} is a specialized utility that enhances productivity and workflow efficiency.",
            app_name
        ),
        Some(LookupError::NoDescription) => format!(
            "{} is a professional software solution optimized for enterprise deployment.",
            app_name
        ),
        Some(LookupError::Network(_)) | None => format!(
            "{} is a versatile application that provides essential functionality for business operations.",
            app_name
        ),
    }
}

/// Search term for an application name: parenthesized text and punctuation removed
pub fn search_term(app_name: &str) -> String {
    let term = PARENTHESIZED_REGEX.replace_all(app_name, "");
    NON_WORD_REGEX.replace_all(term.trim(), "").into_owned()
}

/// Raw-content URL for a GitHub `html_url`
pub fn raw_manifest_url(html_url: &str) -> String {
    html_url
        .replace("github.com", "raw.githubusercontent.com")
        .replace("/blob/", "/")
}

/// First meaningful description in a winget YAML manifest
pub fn description_from_manifest(yaml: &str) -> Option<String> {
    let manifest: serde_yaml::Value = serde_yaml::from_str(yaml).ok()?;
    DESCRIPTION_FIELDS.iter().find_map(|field| {
        manifest
            .get(*field)
            .and_then(serde_yaml::Value::as_str)
            .map(str::trim)
            .filter(|d| d.len() > MIN_DESCRIPTION_LEN)
            .map(String::from)
    })
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    html_url: String,
}

/// Looks descriptions up in winget-pkgs
pub struct WingetDescriber {
    user_agent: String,
    timeout: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl WingetDescriber {
    pub fn new(timeout_seconds: u64, user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            timeout: Duration::from_secs(timeout_seconds),
            last_call: Mutex::new(None),
        }
    }

    /// Keep at least a second between API calls
    fn throttle(&self) {
        if let Ok(mut last) = self.last_call.lock() {
            if let Some(elapsed) = (*last).map(|t| t.elapsed()) {
                if elapsed < MIN_CALL_INTERVAL {
                    std::thread::sleep(MIN_CALL_INTERVAL - elapsed);
                }
            }
            *last = Some(Instant::now());
        }
    }

    fn get(&self, client: &reqwest::blocking::Client, url: &str) -> Result<String, LookupError> {
        let response = client
            .get(url)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .map_err(|e| LookupError::Network(e.to_string()))?;

        if response.status() == reqwest::StatusCode::FORBIDDEN {
            return Err(LookupError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(LookupError::Network(format!(
                "HTTP {}: {}",
                response.status(),
                url
            )));
        }

        response
            .text()
            .map_err(|e| LookupError::Network(e.to_string()))
    }

    /// Look up a description without falling back
    pub fn lookup(&self, app_name: &str) -> Result<String, LookupError> {
        self.throttle();

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| LookupError::Network(e.to_string()))?;

        let url = format!(
            "{}?q={}+in:path+repo:microsoft/winget-pkgs&per_page=5",
            SEARCH_URL,
            search_term(app_name)
        );
        let body = self.get(&client, &url)?;
        let search: SearchResponse =
            serde_json::from_str(&body).map_err(|e| LookupError::Network(e.to_string()))?;

        if search.items.is_empty() {
            return Err(LookupError::NoResults);
        }

        for item in search.items.iter().take(MANIFESTS_TRIED) {
            let manifest_url = raw_manifest_url(&item.html_url);
            match self.get(&client, &manifest_url) {
                Ok(yaml) => {
                    if let Some(description) = description_from_manifest(&yaml) {
                        return Ok(description);
                    }
                }
                Err(e) => log::debug!("skipping manifest {}: {}", manifest_url, e),
            }
        }

        Err(LookupError::NoDescription)
    }
}

impl Default for WingetDescriber {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_SECONDS, DEFAULT_USER_AGENT)
    }
}

impl DescriptionSource for WingetDescriber {
    fn describe(&self, app_name: &str) -> String {
        match self.lookup(app_name) {
            Ok(description) => description,
            Err(e) => {
                log::warn!("description lookup for '{}' failed: {}", app_name, e);
                fallback_description(app_name, Some(&e))
            }
        }
    }
}

/// Never touches the network
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineDescriber;

impl DescriptionSource for OfflineDescriber {
    fn describe(&self, app_name: &str) -> String {
        fallback_description(app_name, None)
    }
}
