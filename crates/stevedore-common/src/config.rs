//! Stevedore configuration.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{StevedoreError, StevedoreResult};

/// Default Docker Hub token endpoint.
pub const DEFAULT_AUTH_URL: &str = "https://auth.docker.io/token";
/// Default Docker Hub registry endpoint.
pub const DEFAULT_REGISTRY_URL: &str = "https://registry-1.docker.io";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Configuration options for a labeling run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StevedoreConfig {
    /// Author written into labels when none is given on the command line.
    pub default_author: Option<String>,
    /// Destination directory for updated Dockerfiles; `None` rewrites in place.
    pub output: Option<PathBuf>,
    /// Tracing level directive.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
    /// Timeout for each registry request (seconds).
    pub http_timeout_secs: u64,
    /// Maximum number of Dockerfiles labeled at once.
    pub concurrency: usize,
    /// Token endpoint.
    pub auth_url: String,
    /// Registry endpoint.
    pub registry_url: String,
}

impl Default for StevedoreConfig {
    fn default() -> Self {
        Self {
            default_author: None,
            output: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            http_timeout_secs: 30,
            concurrency: 4,
            auth_url: DEFAULT_AUTH_URL.to_string(),
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
        }
    }
}

impl StevedoreConfig {
    /// Default configuration file location (`<config dir>/stevedore/config.toml`).
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("stevedore").join("config.toml"))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn from_file(path: &Path) -> StevedoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Load configuration from an explicit path, or the default location if it exists.
    ///
    /// Falls back to defaults when no file is found.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit path is missing or any file is malformed.
    pub fn load(explicit: Option<&Path>) -> StevedoreResult<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        match Self::default_path() {
            Some(path) if path.is_file() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for a traversing output path, a zero timeout or zero concurrency.
    pub fn validate(&self) -> StevedoreResult<()> {
        if let Some(output) = &self.output {
            validate_path(output)?;
        }

        if self.http_timeout_secs == 0 {
            return Err(StevedoreError::Config {
                message: "http_timeout_secs must be greater than zero".to_string(),
            });
        }

        if self.concurrency == 0 {
            return Err(StevedoreError::Config {
                message: "concurrency must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// Registry request timeout.
    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Set the default author.
    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.default_author = Some(author.into());
        self
    }

    /// Set the output directory.
    #[must_use]
    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }
}

/// Reject paths that climb out of the working tree.
///
/// # Errors
///
/// Returns [`StevedoreError::InvalidPath`] if the path has a `..` component.
pub fn validate_path(path: &Path) -> StevedoreResult<()> {
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(StevedoreError::InvalidPath {
            path: path.to_path_buf(),
            reason: "path traversal detected".to_string(),
        });
    }
    Ok(())
}

/// Validate a Dockerfile or directory path supplied by the user.
///
/// # Errors
///
/// Returns [`StevedoreError::InvalidPath`] for empty or traversing paths.
pub fn validate_dockerfile_path(path: &Path) -> StevedoreResult<()> {
    if path.as_os_str().is_empty() {
        return Err(StevedoreError::InvalidPath {
            path: path.to_path_buf(),
            reason: "dockerfile path cannot be empty".to_string(),
        });
    }
    validate_path(path)
}
