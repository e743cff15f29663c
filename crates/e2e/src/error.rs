//! Error types for the E2E harness

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Launch failed: {0}")]
    Launch(String),

    #[error("Timed out after {}ms waiting for {waiting_for}", .elapsed.as_millis())]
    Timeout {
        waiting_for: String,
        elapsed: Duration,
    },

    #[error("Webview panel '{view_type}' not found after {}ms", .elapsed.as_millis())]
    PanelNotFound {
        view_type: String,
        elapsed: Duration,
    },

    #[error("Webview panel '{view_type}' is attached but its frame is unavailable: {reason}")]
    FrameUnavailable { view_type: String, reason: String },

    #[error("Webview frame for '{0}' is stale; resolve it again after the panel is recreated")]
    StaleFrame(String),

    #[error("Extension '{extension_id}' failed to activate: {reason}")]
    ActivationFailed {
        extension_id: String,
        reason: String,
    },

    #[error("Command palette is not open")]
    PaletteNotOpen,

    #[error("Command palette result {index} is out of range ({available} available)")]
    ResultOutOfRange { index: usize, available: usize },

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Scenario parse error: {0}")]
    SpecParse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("ReporterWriteError: cannot write {}: {reason}", .path.display())]
    ReporterWrite { path: PathBuf, reason: String },

    #[error("DevTools error: {0}")]
    DevTools(#[from] ppds_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),
}

impl E2eError {
    /// Bounded waits that ran out of time, panel lookups included
    pub fn is_timeout(&self) -> bool {
        matches!(self, E2eError::Timeout { .. } | E2eError::PanelNotFound { .. })
    }

    /// Failures a polling loop may retry
    pub fn is_transient(&self) -> bool {
        match self {
            E2eError::DevTools(e) => e.is_transient(),
            _ => false,
        }
    }
}

pub type E2eResult<T> = Result<T, E2eError>;
