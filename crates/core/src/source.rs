// Media source resolution

use crate::error::{PlayerError, Result};
use std::fmt;
use std::path::PathBuf;

/// Playable reference handed to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// Local file (plain path or `file://` URL)
    File(PathBuf),
    /// Remote `http`/`https` URL
    Remote(String),
}

impl MediaSource {
    /// Resolve caller input into a playable reference.
    ///
    /// Accepts plain filesystem paths, `file://` URLs and `http(s)://` URLs.
    /// Fails with `InvalidSource` for empty input, control characters,
    /// unknown schemes or a `file://` URL without a path.
    pub fn parse(input: Option<&str>) -> Result<Self> {
        let raw = match input {
            Some(s) if !s.trim().is_empty() => s,
            _ => return Err(PlayerError::empty_source()),
        };

        if raw.chars().any(char::is_control) {
            return Err(PlayerError::unparsable_source());
        }

        let Some((scheme, rest)) = raw.split_once("://") else {
            return Ok(MediaSource::File(PathBuf::from(raw)));
        };

        if !is_valid_scheme(scheme) {
            return Err(PlayerError::unparsable_source());
        }

        match scheme.to_ascii_lowercase().as_str() {
            "file" => {
                // file:///abs/path and file://localhost/abs/path
                let path = rest.strip_prefix("localhost").unwrap_or(rest);
                if path.is_empty() || path.contains(char::is_whitespace) {
                    return Err(PlayerError::unparsable_source());
                }
                Ok(MediaSource::File(PathBuf::from(path)))
            }
            "http" | "https" => {
                let host = rest.split(['/', '?', '#']).next().unwrap_or("");
                if host.is_empty() || rest.contains(char::is_whitespace) {
                    return Err(PlayerError::unparsable_source());
                }
                Ok(MediaSource::Remote(raw.to_string()))
            }
            _ => Err(PlayerError::unparsable_source()),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, MediaSource::Remote(_))
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MediaSource::File(path) => write!(f, "{}", path.display()),
            MediaSource::Remote(url) => write!(f, "{}", url),
        }
    }
}

fn is_valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        _ => false,
    }
}
