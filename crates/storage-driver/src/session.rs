//! The driver contract consumed by the upload pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::{Destination, StorageResult};

/// Properties attached to a written object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileProperties {
    pub cache_control: Option<String>,
    pub content_type: Option<String>,
    /// Arbitrary user metadata, e.g. `Object-Expires` for delayed deletion.
    pub metadata: BTreeMap<String, String>,
}

impl FileProperties {
    pub fn with_cache_control(mut self, value: impl Into<String>) -> Self {
        self.cache_control = Some(value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.cache_control.is_none() && self.content_type.is_none() && self.metadata.is_empty()
    }
}

/// Outcome of a successful save.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveOutput {
    /// Where the object was written, with credentials masked.
    pub uri: String,
    /// Response metadata reported by the backend (`etag`, `version`).
    pub metadata: BTreeMap<String, String>,
}

/// An object read back from storage.
#[derive(Debug, Clone)]
pub struct ObjectData {
    pub body: Bytes,
    pub size: u64,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub etag: Option<String>,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

/// One page of a listing. Backends page internally, so a page is complete.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub files: Vec<FileInfo>,
    pub directories: Vec<String>,
}

/// A session bound to one destination.
///
/// `name` arguments are resolved relative to the session destination: the
/// empty name is the destination itself, `"../latest.jpg"` is a sibling one
/// directory up.
#[async_trait]
pub trait StorageSession: Send + Sync {
    fn destination(&self) -> &Destination;

    /// Write `data` as a whole object. Readers see either nothing or the full
    /// object, never a partial write.
    async fn save(
        &self,
        name: &str,
        data: Bytes,
        properties: &FileProperties,
        timeout: Duration,
    ) -> StorageResult<SaveOutput>;

    async fn read(&self, name: &str) -> StorageResult<ObjectData>;

    async fn list(&self, prefix: &str, delimiter: Option<&str>) -> StorageResult<ListPage>;
}

/// Turns a destination into a session. Injected into the pipeline.
pub trait StorageResolver: Send + Sync {
    fn resolve(&self, destination: &Destination) -> StorageResult<Arc<dyn StorageSession>>;
}
