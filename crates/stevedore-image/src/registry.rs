//! Registry lineage resolution.
//!
//! A parent image's lineage is read from the labels of the most recent entry
//! in its manifest history. Keys of the form `layer.<N>.*` record the layer
//! counter of that image; the child image is layer `N + 1`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde_json::{Map, Value};
use stevedore_common::config::{DEFAULT_AUTH_URL, DEFAULT_REGISTRY_URL};
use stevedore_common::{StevedoreError, StevedoreResult};

use crate::reference::ImageReference;

/// Manifest media types, in order of preference.
pub const MANIFEST_MEDIA_TYPES: [&str; 5] = [
    "application/vnd.oci.image.index.v1+json",
    "application/vnd.oci.image.manifest.v1+json",
    "application/vnd.docker.distribution.manifest.v2+json",
    "application/vnd.docker.distribution.manifest.list.v2+json",
    "application/json",
];

/// Service name sent to the token endpoint.
const TOKEN_SERVICE: &str = "registry.docker.io";

/// Lineage recovered from a parent image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineageInfo {
    /// Layer number the child image should use, if the parent carried one.
    pub next_layer: Option<i64>,
}

impl LineageInfo {
    /// No lineage discoverable.
    #[must_use]
    pub const fn none() -> Self {
        Self { next_layer: None }
    }

    /// Lineage continuing from a parent at `layer`.
    ///
    /// A parent already at `i64::MAX` has no representable successor and
    /// yields no lineage.
    #[must_use]
    pub const fn after(layer: i64) -> Self {
        Self {
            next_layer: layer.checked_add(1),
        }
    }

    /// Layer number to use, defaulting to 0.
    #[must_use]
    pub fn layer(&self) -> i64 {
        self.next_layer.unwrap_or(0)
    }
}

/// Something that can resolve the lineage of a parent image.
#[async_trait]
pub trait LineageSource: Send + Sync {
    /// Resolve lineage for an image.
    ///
    /// A parent without lineage labels yields [`LineageInfo::none`], not an error.
    async fn resolve(&self, reference: &ImageReference) -> StevedoreResult<LineageInfo>;
}

#[derive(Debug)]
enum Traversal {
    Labels(Map<String, Value>),
    Missing(&'static str),
}

/// Registry client resolving lineage from Docker Hub manifests.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    client: Client,
    auth_url: String,
    registry_url: String,
}

impl RegistryClient {
    /// Create a new registry client with a fixed per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        auth_url: impl Into<String>,
        registry_url: impl Into<String>,
        timeout: Duration,
    ) -> StevedoreResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StevedoreError::Network {
                message: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            auth_url: auth_url.into(),
            registry_url: registry_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Create a client for Docker Hub.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn docker_hub(timeout: Duration) -> StevedoreResult<Self> {
        Self::new(DEFAULT_AUTH_URL, DEFAULT_REGISTRY_URL, timeout)
    }

    /// Obtain a pull-scoped bearer token for a repository namespace.
    ///
    /// # Errors
    ///
    /// Returns [`StevedoreError::RegistryAuth`] on a non-success status, a
    /// malformed body or a missing/empty token, and [`StevedoreError::Network`]
    /// if the request itself fails.
    pub async fn token(&self, namespace: &str) -> StevedoreResult<String> {
        let url = format!(
            "{}?service={}&scope=repository:{}:pull",
            self.auth_url, TOKEN_SERVICE, namespace
        );
        tracing::debug!(url = %url, "Requesting token");

        let auth_err = |message: String| StevedoreError::RegistryAuth {
            repository: namespace.to_string(),
            message,
        };

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| network_error("request token", &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(auth_err(format!("unexpected status code: {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| network_error("read token body", &e))?;

        let json: Map<String, Value> = serde_json::from_str(&body)
            .map_err(|e| auth_err(format!("failed to parse token response: {e}")))?;

        match json.get("token") {
            Some(Value::String(token)) if !token.is_empty() => Ok(token.clone()),
            Some(Value::String(_)) => Err(auth_err("empty token received".to_string())),
            _ => Err(auth_err(
                "token not found in response or invalid type".to_string(),
            )),
        }
    }

    /// Fetch the raw manifest body for an image.
    ///
    /// # Errors
    ///
    /// Returns [`StevedoreError::Registry`] on a non-success status and
    /// [`StevedoreError::Network`] if the request fails.
    pub async fn manifest(&self, reference: &ImageReference, token: &str) -> StevedoreResult<String> {
        let url = format!(
            "{}/v2/{}/manifests/{}",
            self.registry_url, reference.namespace, reference.tag
        );
        tracing::debug!(url = %url, "Getting manifest");

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, MANIFEST_MEDIA_TYPES.join(", "))
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .send()
            .await
            .map_err(|e| network_error("request manifest", &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StevedoreError::Registry {
                message: format!("manifest request for {reference} returned {status}"),
            });
        }

        response
            .text()
            .await
            .map_err(|e| network_error("read manifest body", &e))
    }
}

#[async_trait]
impl LineageSource for RegistryClient {
    async fn resolve(&self, reference: &ImageReference) -> StevedoreResult<LineageInfo> {
        let token = self.token(&reference.namespace).await?;
        let manifest = self.manifest(reference, &token).await?;
        let lineage = match parent_labels(&manifest)? {
            Some(labels) => lineage_from_labels(&labels),
            None => LineageInfo::none(),
        };

        tracing::debug!(image = %reference, next_layer = ?lineage.next_layer, "Resolved lineage");
        Ok(lineage)
    }
}

fn network_error(action: &str, err: &reqwest::Error) -> StevedoreError {
    let message = if err.is_timeout() {
        format!("Failed to {action}: timed out")
    } else {
        format!("Failed to {action}: {err}")
    };
    StevedoreError::Network { message }
}

/// Extract the labels of the most recent history entry of a manifest.
///
/// Follows `history[0].v1Compatibility` (a JSON document in a string) down to
/// `container_config.Labels`. Any missing step yields `Ok(None)`.
///
/// # Errors
///
/// Returns [`StevedoreError::Registry`] if the manifest or the embedded
/// `v1Compatibility` document is not valid JSON, or the history entry is not
/// an object.
pub fn parent_labels(manifest: &str) -> StevedoreResult<Option<Map<String, Value>>> {
    let manifest: Map<String, Value> = serde_json::from_str(manifest).map_err(|e| {
        StevedoreError::Registry {
            message: format!("failed to parse manifest: {e}"),
        }
    })?;

    match traverse(&manifest)? {
        Traversal::Labels(labels) => Ok(Some(labels)),
        Traversal::Missing(step) => {
            tracing::debug!(missing = step, "No lineage in parent manifest");
            Ok(None)
        }
    }
}

fn traverse(manifest: &Map<String, Value>) -> StevedoreResult<Traversal> {
    let Some(Value::Array(history)) = manifest.get("history") else {
        return Ok(Traversal::Missing("history"));
    };

    let Some(entry) = history.first() else {
        return Ok(Traversal::Missing("history[0]"));
    };

    let Value::Object(entry) = entry else {
        return Err(StevedoreError::Registry {
            message: "history entry is not an object".to_string(),
        });
    };

    let Some(Value::String(v1)) = entry.get("v1Compatibility") else {
        return Ok(Traversal::Missing("v1Compatibility"));
    };

    let parent: Map<String, Value> =
        serde_json::from_str(v1).map_err(|e| StevedoreError::Registry {
            message: format!("failed to parse v1Compatibility: {e}"),
        })?;

    let Some(Value::Object(config)) = parent.get("container_config") else {
        return Ok(Traversal::Missing("container_config"));
    };

    match config.get("Labels") {
        Some(Value::Object(labels)) => Ok(Traversal::Labels(labels.clone())),
        _ => Ok(Traversal::Missing("Labels")),
    }
}

/// Derive lineage from a parent's label keys.
///
/// The first key containing `layer` decides the result and later keys are
/// not consulted. Its second dot-separated segment is the parent's layer; a
/// missing or non-numeric segment counts as 0.
#[must_use]
pub fn lineage_from_labels(labels: &Map<String, Value>) -> LineageInfo {
    let Some(key) = labels.keys().find(|key| key.contains("layer")) else {
        return LineageInfo::none();
    };

    let layer = key
        .split('.')
        .nth(1)
        .and_then(|segment| segment.parse::<i64>().ok())
        .unwrap_or(0);

    let lineage = LineageInfo::after(layer);
    if lineage.next_layer.is_none() {
        tracing::warn!(key = %key, "Parent layer out of range, ignoring lineage");
    }
    lineage
}
