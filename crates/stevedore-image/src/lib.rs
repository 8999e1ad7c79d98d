//! # stevedore-image
//!
//! Parent image handling for Stevedore.
//!
//! This crate provides:
//! - Parsing of `FROM` image references
//! - Registry token exchange and manifest retrieval
//! - Lineage (layer counter) extraction from manifest history
//! - A per-batch lineage cache

#![warn(missing_docs)]

pub mod cache;
pub mod reference;
pub mod registry;

pub use cache::CachedLineage;
pub use reference::ImageReference;
pub use registry::{LineageInfo, LineageSource, RegistryClient};
