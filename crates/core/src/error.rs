// Error handling for the playback controller

use serde::Serialize;
use thiserror::Error;

/// Domain code attached to every error report handed to the host.
pub const ERROR_DOMAIN: &str = "AudioWaveforms";

/// Hint attached to source parse failures.
pub const FILE_SCHEME_HINT: &str = "If path contains `file://` try removing it";

/// Player error types
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlayerError {
    /// Source was empty, null or could not be turned into a playable reference
    #[error("Invalid source: {message}")]
    InvalidSource { message: String, details: String },

    /// Operation attempted before `prepare` or after `release`
    #[error("Player not prepared: {0}")]
    NotPrepared(String),

    /// Required argument missing or malformed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Engine failed (file not found, decode failure, ...)
    #[error("Engine error: {0}")]
    Engine(String),

    /// Engine refused a parameter (e.g. unsupported playback rate)
    #[error("Engine rejected request: {0}")]
    EngineRejected(String),

    /// Runtime thread gone or did not answer in time
    #[error("Player runtime unavailable: {0}")]
    Disconnected(String),
}

impl PlayerError {
    pub fn empty_source() -> Self {
        PlayerError::InvalidSource {
            message: "Audio file path can't be empty or null".to_string(),
            details: String::new(),
        }
    }

    pub fn unparsable_source() -> Self {
        PlayerError::InvalidSource {
            message: "Failed to initialise Url from provided audio file".to_string(),
            details: FILE_SCHEME_HINT.to_string(),
        }
    }

    /// Short machine-readable kind, stable across releases.
    pub fn kind(&self) -> &'static str {
        match self {
            PlayerError::InvalidSource { .. } => "InvalidSource",
            PlayerError::NotPrepared(_) => "NotPrepared",
            PlayerError::InvalidArgument(_) => "InvalidArgument",
            PlayerError::Engine(_) => "EngineError",
            PlayerError::EngineRejected(_) => "EngineRejected",
            PlayerError::Disconnected(_) => "Disconnected",
        }
    }

    /// Structured form handed across the host boundary.
    pub fn report(&self) -> ErrorReport {
        let (message, details) = match self {
            PlayerError::InvalidSource { message, details } => (message.clone(), details.clone()),
            other => (other.to_string(), String::new()),
        };
        ErrorReport {
            code: ERROR_DOMAIN.to_string(),
            kind: self.kind().to_string(),
            message,
            details,
        }
    }
}

/// Error payload as seen by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub code: String,
    pub kind: String,
    pub message: String,
    pub details: String,
}

impl ErrorReport {
    pub fn to_json(&self) -> String {
        // A struct of plain strings always serializes.
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Result type alias for player operations
pub type Result<T> = std::result::Result<T, PlayerError>;
