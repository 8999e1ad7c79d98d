//! Image reference parsing.

use std::fmt;
use std::str::FromStr;

/// A parent image reference taken from a `FROM` instruction.
///
/// Only Docker Hub is supported: anything before the first `/` is treated as
/// part of the repository namespace, never as a registry host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Repository namespace (e.g. `library/alpine`).
    pub namespace: String,
    /// Tag or digest.
    pub tag: String,
}

impl ImageReference {
    /// Registry the namespace lives on.
    pub const DEFAULT_REGISTRY: &'static str = "docker.io";
    /// Namespace prefix for official images.
    pub const OFFICIAL_NAMESPACE: &'static str = "library";
    /// Default tag.
    pub const DEFAULT_TAG: &'static str = "latest";

    /// Parse an image reference string.
    ///
    /// Examples:
    /// - `alpine` -> library/alpine:latest
    /// - `alpine:3.19` -> library/alpine:3.19
    /// - `myuser/myapp` -> myuser/myapp:latest
    /// - `org/app@sha256:abc` -> org/app, digest `sha256:abc`
    #[must_use]
    pub fn parse(reference: &str) -> Self {
        let reference = reference.trim();

        let name = if reference.contains('/') {
            reference.to_string()
        } else {
            format!("{}/{}", Self::OFFICIAL_NAMESPACE, reference)
        };

        // Digests carry their own colon, so split on '@' before ':'
        if let Some((namespace, digest)) = name.split_once('@') {
            return Self {
                namespace: namespace.to_string(),
                tag: digest.to_string(),
            };
        }

        match name.split_once(':') {
            Some((namespace, tag)) => Self {
                namespace: namespace.to_string(),
                tag: tag.to_string(),
            },
            None => Self {
                namespace: name,
                tag: Self::DEFAULT_TAG.to_string(),
            },
        }
    }

    /// Whether the tag is a content digest rather than a named tag.
    #[must_use]
    pub fn is_digest(&self) -> bool {
        self.tag.contains(':')
    }

    /// Get the full reference string.
    #[must_use]
    pub fn full_reference(&self) -> String {
        let sep = if self.is_digest() { '@' } else { ':' };
        format!("{}/{}{}{}", Self::DEFAULT_REGISTRY, self.namespace, sep, self.tag)
    }
}

impl FromStr for ImageReference {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}
