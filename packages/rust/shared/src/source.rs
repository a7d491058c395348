//! The collection-source seam between the catalog and the pipeline.
//!
//! [`CollectionSource`] is what the fetch coordinator consumes. The TAXII
//! client implements it against a live catalog; [`BundleSource`] serves a
//! STIX bundle file from memory for offline runs and tests.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Result, StixFeedError};
use crate::types::{ObjectKind, ObjectsByKind, RawObject};

/// A catalog of typed object collections.
#[async_trait]
pub trait CollectionSource: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Every object of `kind`, following pagination. Transport errors surface
    /// as errors; results are never silently truncated.
    async fn fetch_collection(&self, kind: ObjectKind, page_size: usize) -> Result<Vec<RawObject>>;

    /// Only the first page of `kind`. Used for reachability checks.
    async fn fetch_first_page(&self, kind: ObjectKind, page_size: usize) -> Result<Vec<RawObject>>;
}

// ---------------------------------------------------------------------------
// BundleSource
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct Bundle {
    #[serde(default)]
    objects: Vec<Value>,
}

/// In-memory source loaded from a STIX bundle document.
#[derive(Debug, Clone)]
pub struct BundleSource {
    name: String,
    objects: ObjectsByKind,
}

impl BundleSource {
    /// Build from already-decoded objects.
    pub fn new(name: impl Into<String>, objects: Vec<RawObject>) -> Self {
        Self {
            name: name.into(),
            objects: ObjectsByKind::from_objects(objects),
        }
    }

    /// Parse a `{"type": "bundle", "objects": [...]}` document.
    ///
    /// Objects of kinds outside the feed (identities, marking definitions, ...)
    /// are skipped.
    pub fn from_json(name: impl Into<String>, json: &str) -> Result<Self> {
        let bundle: Bundle = serde_json::from_str(json)
            .map_err(|e| StixFeedError::parse(format!("invalid STIX bundle: {e}")))?;

        let mut objects = Vec::with_capacity(bundle.objects.len());
        let mut skipped = 0usize;
        for doc in bundle.objects {
            let type_name = doc.get("type").and_then(Value::as_str);
            if type_name.is_some_and(|t| ObjectKind::from_type_name(t).is_none()) {
                skipped += 1;
                continue;
            }
            objects.push(RawObject::try_from(doc)?);
        }

        let source = Self::new(name, objects);
        debug!(
            name = %source.name,
            objects = source.objects.total(),
            skipped,
            "loaded STIX bundle"
        );
        Ok(source)
    }

    /// Read and parse a bundle file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| StixFeedError::io(path, e))?;
        let source = Self::from_json(path.display().to_string(), &content)?;
        info!(path = %path.display(), objects = source.objects.total(), "bundle source ready");
        Ok(source)
    }

    fn objects_of(&self, kind: ObjectKind) -> Result<&[RawObject]> {
        self.objects
            .get(kind)
            .map_err(|e| StixFeedError::fetch(kind, e.to_string()))
    }
}

#[async_trait]
impl CollectionSource for BundleSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_collection(&self, kind: ObjectKind, _page_size: usize) -> Result<Vec<RawObject>> {
        Ok(self.objects_of(kind)?.to_vec())
    }

    async fn fetch_first_page(&self, kind: ObjectKind, page_size: usize) -> Result<Vec<RawObject>> {
        let objects = self.objects_of(kind)?;
        Ok(objects.iter().take(page_size.max(1)).cloned().collect())
    }
}
