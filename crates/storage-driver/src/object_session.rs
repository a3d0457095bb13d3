//! [`StorageSession`] over any `object_store` backend.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{
    Attribute, Attributes, ObjectMeta, ObjectStore, ObjectStoreExt, PutOptions, PutPayload,
};
use tracing::debug;

use crate::location::object_key;
use crate::session::{FileInfo, FileProperties, ListPage, ObjectData, SaveOutput, StorageSession};
use crate::{Backend, Destination, StorageError, StorageResult};

pub struct ObjectStoreSession {
    destination: Destination,
    store: Arc<dyn ObjectStore>,
    /// Local filesystems cannot persist attributes and reject them.
    supports_attributes: bool,
}

impl ObjectStoreSession {
    pub(crate) fn new(
        destination: Destination,
        store: Arc<dyn ObjectStore>,
        supports_attributes: bool,
    ) -> Self {
        Self {
            destination,
            store,
            supports_attributes,
        }
    }

    fn resolve_name(&self, name: &str) -> StorageResult<(Destination, Path)> {
        let destination = if name.is_empty() {
            self.destination.clone()
        } else {
            self.destination.join(name)?
        };
        let key = object_key(&destination)?;
        if key.as_ref().is_empty() {
            return Err(StorageError::invalid_uri(
                destination.redacted(),
                "object key is empty",
            ));
        }
        Ok((destination, key))
    }

    fn attributes(&self, properties: &FileProperties) -> Attributes {
        let mut attributes = Attributes::new();
        if !self.supports_attributes {
            if !properties.is_empty() {
                debug!(
                    destination = %self.destination,
                    "Backend does not store object properties, ignoring them"
                );
            }
            return attributes;
        }

        if let Some(cache_control) = &properties.cache_control {
            attributes.insert(Attribute::CacheControl, cache_control.clone().into());
        }
        if let Some(content_type) = &properties.content_type {
            attributes.insert(Attribute::ContentType, content_type.clone().into());
        }
        for (key, value) in &properties.metadata {
            attributes.insert(Attribute::Metadata(key.clone().into()), value.clone().into());
        }
        attributes
    }

    /// Directory containing the session destination.
    fn parent_key(&self) -> StorageResult<Path> {
        let key = object_key(&self.destination)?;
        let parts: Vec<_> = key.parts().collect();
        let parent_len = parts.len().saturating_sub(1);
        Ok(parts.into_iter().take(parent_len).collect())
    }
}

/// URI reported back to callers: plain path for the filesystem, masked URI otherwise.
fn reported_uri(destination: &Destination) -> String {
    match destination.backend() {
        Backend::Filesystem => destination
            .local_path()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| destination.redacted()),
        _ => destination.redacted(),
    }
}

fn file_info(meta: ObjectMeta) -> FileInfo {
    FileInfo {
        name: meta.location.to_string(),
        etag: meta.e_tag,
        last_modified: meta.last_modified,
        size: meta.size,
    }
}

#[async_trait]
impl StorageSession for ObjectStoreSession {
    fn destination(&self) -> &Destination {
        &self.destination
    }

    async fn save(
        &self,
        name: &str,
        data: Bytes,
        properties: &FileProperties,
        timeout: Duration,
    ) -> StorageResult<SaveOutput> {
        let (destination, key) = self.resolve_name(name)?;
        let uri = destination.redacted();
        let size = data.len();
        let options = PutOptions {
            attributes: self.attributes(properties),
            ..Default::default()
        };

        let start = Instant::now();
        let put = self.store.put_opts(&key, PutPayload::from(data), options);
        let result = if timeout.is_zero() {
            put.await
        } else {
            tokio::time::timeout(timeout, put)
                .await
                .map_err(|_| StorageError::Timeout {
                    operation: "save",
                    uri: uri.clone(),
                    timeout,
                })?
        }
        .map_err(|e| StorageError::from_object_store(e, &uri))?;

        debug!(
            uri = %uri,
            size_bytes = size,
            duration_ms = start.elapsed().as_millis() as u64,
            "Object saved"
        );

        let mut metadata = BTreeMap::new();
        if let Some(etag) = result.e_tag {
            metadata.insert("etag".to_string(), etag);
        }
        if let Some(version) = result.version {
            metadata.insert("version".to_string(), version);
        }

        Ok(SaveOutput {
            uri: reported_uri(&destination),
            metadata,
        })
    }

    async fn read(&self, name: &str) -> StorageResult<ObjectData> {
        let (destination, key) = self.resolve_name(name)?;
        let uri = destination.redacted();
        let result = self
            .store
            .get(&key)
            .await
            .map_err(|e| StorageError::from_object_store(e, &uri))?;

        let size = result.meta.size;
        let mut metadata = BTreeMap::new();
        for (attribute, value) in result.attributes.iter() {
            let name = match attribute {
                Attribute::CacheControl => "cache-control".to_string(),
                Attribute::ContentType => "content-type".to_string(),
                Attribute::Metadata(key) => key.to_string(),
                _ => continue,
            };
            let value: &str = value.as_ref();
            metadata.insert(name, value.to_string());
        }

        let body = result
            .bytes()
            .await
            .map_err(|e| StorageError::from_object_store(e, &uri))?;

        Ok(ObjectData {
            body,
            size,
            metadata,
        })
    }

    /// Lists objects under `prefix`, resolved against the destination's directory.
    ///
    /// Prefixes match whole path segments. With a `/` delimiter only the
    /// immediate level is returned and sub-directories are reported separately.
    async fn list(&self, prefix: &str, delimiter: Option<&str>) -> StorageResult<ListPage> {
        let base = self.parent_key()?;
        let prefix: Path = base.parts().chain(Path::from(prefix).parts()).collect();
        let uri = self.destination.redacted();

        match delimiter {
            None => {
                let files: Vec<FileInfo> = self
                    .store
                    .list(Some(&prefix))
                    .map_ok(file_info)
                    .try_collect()
                    .await
                    .map_err(|e| StorageError::from_object_store(e, &uri))?;
                Ok(ListPage {
                    files,
                    directories: Vec::new(),
                })
            }
            Some("/") => {
                let result = self
                    .store
                    .list_with_delimiter(Some(&prefix))
                    .await
                    .map_err(|e| StorageError::from_object_store(e, &uri))?;
                Ok(ListPage {
                    files: result.objects.into_iter().map(file_info).collect(),
                    directories: result
                        .common_prefixes
                        .iter()
                        .map(ToString::to_string)
                        .collect(),
                })
            }
            Some(other) => Err(StorageError::configuration(
                "object store",
                format!("unsupported list delimiter `{other}`"),
            )),
        }
    }
}
