//! Media resolution
//!
//! Turns a play request's source (page URL, direct file URL, or search
//! terms) into a playable media descriptor by shelling out to an extractor
//! binary with `--dump-json`. Blocking; the scheduler runs resolution on a
//! worker thread so a slow extractor never stalls scheduling ticks.

use crate::request::RequestSource;
use roomcast_common::config::ResolverConfig;
use serde::Deserialize;
use std::process::Command;
use thiserror::Error;
use tracing::{debug, warn};

/// Page-ish extensions that are never playable media. A direct URL ending
/// in one of these means the extractor handed back the page itself.
const BLOCKED_EXTENSIONS: &[&str] = &[
    "asp", "aspx", "htm", "html", "js", "jsp", "php", "xml", "xhtml",
];

/// Resolution failures, surfaced verbatim to the requester
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unsupported scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("no playable media found; check that the link is public and spelled correctly")]
    NoPlayableMedia,

    #[error("extractor produced unreadable output: {0}")]
    MalformedOutput(String),

    #[error("file type '{0}' is not playable media")]
    BlockedExtension(String),

    #[error("empty request; nothing to do")]
    EmptyRequest,

    #[error("failed to run extractor: {0}")]
    Extractor(String),
}

/// A resolved, playable media descriptor
#[derive(Debug, Clone)]
pub struct MediaInfo {
    /// Directly playable media URL
    pub media_url: String,
    /// Display title
    pub title: String,
    /// Duration in seconds, 0 when unknown
    pub duration_secs: u64,
    /// Whether the source is live
    pub is_live: bool,
    /// Label of the hosting site
    pub source_site: String,
}

/// Resolution collaborator consumed by [`crate::request::PlayRequest`].
///
/// Implementations block; callers wrap them in `spawn_blocking`.
pub trait MediaResolver: Send + Sync {
    fn resolve(&self, source: &RequestSource) -> Result<MediaInfo, ResolveError>;
}

/// Shape of the extractor's `--dump-json` output, reduced to what we use
#[derive(Debug, Deserialize)]
struct ExtractorOutput {
    url: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    is_live: Option<bool>,
    ext: Option<String>,
    extractor_key: Option<String>,
}

/// Resolver backed by an external extractor binary (yt-dlp or compatible)
pub struct ExtractorResolver {
    config: ResolverConfig,
}

impl ExtractorResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    fn extract(&self, target: &str) -> Result<MediaInfo, ResolveError> {
        debug!("running extractor for '{}'", target);

        let output = Command::new(&self.config.extractor_bin)
            .arg("--dump-json")
            .arg("--format")
            .arg(&self.config.format)
            .arg(target)
            .output()
            .map_err(|e| ResolveError::Extractor(e.to_string()))?;

        if !output.status.success() {
            warn!("extractor exited with {} for '{}'", output.status, target);
            return Err(ResolveError::NoPlayableMedia);
        }

        let raw: ExtractorOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| ResolveError::MalformedOutput(e.to_string()))?;

        interpret_output(raw)
    }
}

impl MediaResolver for ExtractorResolver {
    fn resolve(&self, source: &RequestSource) -> Result<MediaInfo, ResolveError> {
        match source {
            RequestSource::Search(terms) => {
                let terms = terms.trim();
                if terms.is_empty() {
                    return Err(ResolveError::EmptyRequest);
                }
                self.extract(&format!("{}{}", self.config.search_prefix, terms))
            }
            RequestSource::Page(url) => {
                check_scheme(url)?;
                self.extract(url)
            }
            RequestSource::Direct(url) => {
                check_scheme(url)?;
                Ok(direct_info(url))
            }
        }
    }
}

/// Map raw extractor output to a [`MediaInfo`], applying the extension
/// blacklist and deriving a site label when the generic extractor ran.
fn interpret_output(raw: ExtractorOutput) -> Result<MediaInfo, ResolveError> {
    let media_url = raw.url.ok_or(ResolveError::NoPlayableMedia)?;

    if let Some(ext) = raw.ext.as_deref() {
        if BLOCKED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
            return Err(ResolveError::BlockedExtension(ext.to_string()));
        }
    }

    let source_site = match raw.extractor_key.as_deref() {
        None | Some("Generic") => domain_label(&media_url)?,
        Some(key) => key.to_string(),
    };

    Ok(MediaInfo {
        title: raw.title.unwrap_or_default(),
        duration_secs: raw.duration.map(|d| d.max(0.0) as u64).unwrap_or(0),
        is_live: raw.is_live.unwrap_or(false),
        source_site,
        media_url,
    })
}

/// Build the descriptor for a direct-play URL without consulting the
/// extractor; the raw URL is assumed to be the media itself.
fn direct_info(url: &str) -> MediaInfo {
    let file_name = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(url)
        .to_string();

    MediaInfo {
        media_url: url.to_string(),
        title: format!("[direct-play] file: {}", file_name),
        duration_secs: 0,
        is_live: false,
        source_site: domain_label(url).unwrap_or_else(|_| "direct".to_string()),
    }
}

fn check_scheme(url: &str) -> Result<(), ResolveError> {
    let scheme = url.split("://").next().unwrap_or("");
    match scheme {
        "http" | "https" => Ok(()),
        other if url.contains("://") => Err(ResolveError::UnsupportedScheme(other.to_string())),
        _ => Err(ResolveError::UnsupportedScheme("none".to_string())),
    }
}

/// Derive a site label (e.g. `site.com`) from a URL's host.
fn domain_label(url: &str) -> Result<String, ResolveError> {
    let after_scheme = url.split("://").nth(1).unwrap_or(url);
    let host = after_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or("")
        .split('@')
        .last()
        .unwrap_or("")
        .split(':')
        .next()
        .unwrap_or("");

    if host.is_empty() {
        return Err(ResolveError::MalformedOutput(format!(
            "no host in URL '{}'",
            url
        )));
    }

    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() < 2 {
        return Err(ResolveError::MalformedOutput(format!(
            "malformed domain '{}'",
            host
        )));
    }

    Ok(labels[labels.len() - 2..].join("."))
}
