//! Per-batch lineage memoisation.

use async_trait::async_trait;
use dashmap::DashMap;
use stevedore_common::StevedoreResult;

use crate::reference::ImageReference;
use crate::registry::{LineageInfo, LineageSource};

/// Wraps a [`LineageSource`] and remembers successful resolutions.
///
/// Meant to live for one batch run. Errors are never cached, so a failed
/// lookup is retried by the next file that names the same image.
pub struct CachedLineage<S> {
    inner: S,
    entries: DashMap<ImageReference, LineageInfo>,
}

impl<S: LineageSource> CachedLineage<S> {
    /// Create an empty cache in front of `inner`.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            entries: DashMap::new(),
        }
    }

    /// Number of cached references.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been cached yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl<S: LineageSource> LineageSource for CachedLineage<S> {
    async fn resolve(&self, reference: &ImageReference) -> StevedoreResult<LineageInfo> {
        if let Some(hit) = self.entries.get(reference) {
            tracing::debug!(image = %reference, "Lineage cache hit");
            return Ok(*hit);
        }

        // Concurrent misses for the same image may both go to the network.
        let lineage = self.inner.resolve(reference).await?;
        self.entries.insert(reference.clone(), lineage);
        Ok(lineage)
    }
}
