//! # stevedore-common
//!
//! Shared utilities and types for Stevedore.
//!
//! This crate provides common functionality used across all Stevedore crates:
//! - Common error types
//! - Configuration loading and validation
//! - User supplied path checks

#![warn(missing_docs)]

pub mod config;
pub mod error;

pub use config::{LogFormat, StevedoreConfig, validate_dockerfile_path, validate_path};
pub use error::{StevedoreError, StevedoreResult};
