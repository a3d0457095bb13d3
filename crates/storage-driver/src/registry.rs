//! Driver registry: builds and caches one `object_store` client per store.

use std::collections::HashMap;
use std::sync::Arc;

use object_store::ObjectStore;
use object_store::aws::AmazonS3Builder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::location::{query_value, split_bucket, store_identity};
use crate::object_session::ObjectStoreSession;
use crate::session::{StorageResolver, StorageSession};
use crate::{Backend, Destination, StorageError, StorageResult};

const DEFAULT_S3_REGION: &str = "us-east-1";

/// One entry of the driver listing printed by `--describe`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DriverDescription {
    #[serde(rename = "scheme")]
    pub schemes: Vec<&'static str>,
    #[serde(rename = "desc")]
    pub description: &'static str,
}

#[derive(Clone)]
struct StoreHandle {
    store: Arc<dyn ObjectStore>,
    supports_attributes: bool,
}

#[derive(Default)]
pub struct DriverRegistry {
    memory_enabled: bool,
    stores: Mutex<HashMap<String, StoreHandle>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that also resolves `memory://STORE/KEY`. Each distinct
    /// `STORE` host is a separate store living as long as the registry.
    pub fn with_memory() -> Self {
        Self {
            memory_enabled: true,
            ..Self::default()
        }
    }

    pub fn describe(&self) -> Vec<DriverDescription> {
        Backend::ALL
            .into_iter()
            .filter(|backend| *backend != Backend::InMemory || self.memory_enabled)
            .map(|backend| DriverDescription {
                schemes: backend
                    .schemes()
                    .iter()
                    .copied()
                    .filter(|scheme| !scheme.is_empty())
                    .collect(),
                description: backend.description(),
            })
            .collect()
    }

    fn store_for(&self, destination: &Destination) -> StorageResult<StoreHandle> {
        let identity = store_identity(destination)?;
        if let Some(handle) = self.stores.lock().get(&identity) {
            return Ok(handle.clone());
        }

        // Built outside the lock; a concurrent build for the same identity loses.
        let handle = self.build_store(destination)?;
        debug!(destination = %destination, backend = %destination.backend(), "Storage client created");
        Ok(self
            .stores
            .lock()
            .entry(identity)
            .or_insert(handle)
            .clone())
    }

    fn build_store(&self, destination: &Destination) -> StorageResult<StoreHandle> {
        let handle = match destination.backend() {
            Backend::Filesystem => StoreHandle {
                store: Arc::new(LocalFileSystem::new()),
                supports_attributes: false,
            },
            Backend::InMemory if !self.memory_enabled => {
                return Err(StorageError::UnsupportedScheme {
                    scheme: destination.url().scheme().to_string(),
                });
            }
            Backend::InMemory => StoreHandle {
                store: Arc::new(InMemory::new()),
                supports_attributes: true,
            },
            Backend::S3Compatible => StoreHandle {
                store: build_s3(destination)?,
                supports_attributes: true,
            },
            Backend::Gcs => StoreHandle {
                store: build_gcs(destination)?,
                supports_attributes: true,
            },
        };
        Ok(handle)
    }
}

impl StorageResolver for DriverRegistry {
    fn resolve(&self, destination: &Destination) -> StorageResult<Arc<dyn StorageSession>> {
        let handle = self.store_for(destination)?;
        Ok(Arc::new(ObjectStoreSession::new(
            destination.clone(),
            handle.store,
            handle.supports_attributes,
        )))
    }
}

fn decode(destination: &Destination, value: &str) -> StorageResult<String> {
    urlencoding::decode(value)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| StorageError::invalid_uri(destination.redacted(), e.to_string()))
}

fn build_s3(destination: &Destination) -> StorageResult<Arc<dyn ObjectStore>> {
    let url = destination.url();
    let redacted = destination.redacted();
    if url.username().is_empty() {
        return Err(StorageError::missing_credentials(
            &redacted,
            "access key id is required as the URI user",
        ));
    }
    let secret = url.password().ok_or_else(|| {
        StorageError::missing_credentials(&redacted, "secret key is required as the URI password")
    })?;
    let (bucket, _) = split_bucket(destination)?;
    let host = url.host_str().unwrap_or_default();

    let mut builder = AmazonS3Builder::new()
        .with_bucket_name(bucket)
        .with_access_key_id(decode(destination, url.username())?)
        .with_secret_access_key(decode(destination, secret)?);

    builder = match url.scheme() {
        "s3" => builder.with_region(host),
        scheme => {
            let allow_http = scheme == "s3+http";
            let endpoint = match url.port() {
                Some(port) => format!("{}://{host}:{port}", if allow_http { "http" } else { "https" }),
                None => format!("{}://{host}", if allow_http { "http" } else { "https" }),
            };
            let region = query_value(destination, "region")
                .unwrap_or_else(|| DEFAULT_S3_REGION.to_string());
            builder
                .with_endpoint(endpoint)
                .with_allow_http(allow_http)
                .with_region(region)
                .with_virtual_hosted_style_request(false)
        }
    };

    let store = builder
        .build()
        .map_err(|e| StorageError::configuration("s3", e.to_string()))?;
    Ok(Arc::new(store))
}

fn build_gcs(destination: &Destination) -> StorageResult<Arc<dyn ObjectStore>> {
    let url = destination.url();
    let bucket = url.host_str().unwrap_or_default();

    let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(bucket);
    let keyfile = if url.username().is_empty() {
        query_value(destination, "keyfile")
    } else {
        Some(decode(destination, url.username())?)
    };
    if let Some(path) = keyfile {
        builder = builder.with_service_account_path(path);
    }

    let store = builder
        .build()
        .map_err(|e| StorageError::configuration("gcs", e.to_string()))?;
    Ok(Arc::new(store))
}
