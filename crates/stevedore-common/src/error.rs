//! Common error types for Stevedore.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`StevedoreError`].
pub type StevedoreResult<T> = Result<T, StevedoreError>;

/// Errors raised while labeling Dockerfiles.
#[derive(Error, Diagnostic, Debug)]
pub enum StevedoreError {
    /// The Dockerfile could not be read or split into instructions.
    #[error("Failed to parse {}: {message}", path.display())]
    #[diagnostic(code(stevedore::dockerfile::parse))]
    Parse {
        /// The offending file.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// The registry token exchange failed.
    #[error("Registry authentication failed for {repository}: {message}")]
    #[diagnostic(
        code(stevedore::registry::auth),
        help("Check that the image exists on Docker Hub and is publicly pullable")
    )]
    RegistryAuth {
        /// The repository namespace the token was requested for.
        repository: String,
        /// The error message.
        message: String,
    },

    /// The registry answered with an error status or an unreadable manifest.
    #[error("Registry error: {message}")]
    #[diagnostic(code(stevedore::registry))]
    Registry {
        /// The error message.
        message: String,
    },

    /// Transport-level failure talking to the registry, including timeouts.
    #[error("Network error: {message}")]
    #[diagnostic(code(stevedore::network))]
    Network {
        /// The error message.
        message: String,
    },

    /// Git metadata could not be resolved.
    #[error("Git error: {message}")]
    #[diagnostic(code(stevedore::git))]
    Git {
        /// The error message.
        message: String,
    },

    /// The labeled Dockerfile could not be written.
    #[error("Failed to write {}: {source}", path.display())]
    #[diagnostic(code(stevedore::write))]
    Write {
        /// Destination path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A user supplied path was rejected.
    #[error("Invalid path {}: {reason}", path.display())]
    #[diagnostic(
        code(stevedore::path::invalid),
        help("Paths must not be empty or contain '..' components")
    )]
    InvalidPath {
        /// The rejected path.
        path: PathBuf,
        /// Why it was rejected.
        reason: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(stevedore::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(stevedore::io))]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for StevedoreError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config {
            message: err.to_string(),
        }
    }
}
