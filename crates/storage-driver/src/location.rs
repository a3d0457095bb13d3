//! Mapping destinations onto object keys and store identities.

use object_store::path::Path;

use crate::{Backend, Destination, StorageError, StorageResult};

/// Object key addressed by `destination` inside its store.
pub(crate) fn object_key(destination: &Destination) -> StorageResult<Path> {
    match destination.backend() {
        Backend::Filesystem => {
            let path = destination.local_path().ok_or_else(|| {
                StorageError::invalid_uri(destination.redacted(), "not a usable filesystem path")
            })?;
            Path::from_absolute_path(&path)
                .map_err(|e| StorageError::invalid_uri(destination.redacted(), e.to_string()))
        }
        Backend::S3Compatible => {
            let (_, key) = split_bucket(destination)?;
            url_key(destination, key)
        }
        Backend::Gcs | Backend::InMemory => {
            url_key(destination, destination.url().path().trim_start_matches('/'))
        }
    }
}

/// Split an S3 path into bucket and (still percent-encoded) key.
pub(crate) fn split_bucket(destination: &Destination) -> StorageResult<(&str, &str)> {
    let path = destination.url().path().trim_start_matches('/');
    let (bucket, key) = path.split_once('/').unwrap_or((path, ""));
    if bucket.is_empty() {
        return Err(StorageError::invalid_uri(
            destination.redacted(),
            "bucket not found in URL path",
        ));
    }
    Ok((bucket, key))
}

/// Identity of the store serving `destination`. Destinations with equal
/// identities share one client.
pub(crate) fn store_identity(destination: &Destination) -> StorageResult<String> {
    let url = destination.url();
    let host = url.host_str().unwrap_or_default();
    let identity = match destination.backend() {
        Backend::Filesystem => "file".to_string(),
        Backend::S3Compatible => {
            let (bucket, _) = split_bucket(destination)?;
            format!(
                "{}|{host}:{}|{bucket}|{}|{}|{}",
                url.scheme(),
                url.port().unwrap_or_default(),
                url.username(),
                url.password().unwrap_or_default(),
                query_value(destination, "region").unwrap_or_default(),
            )
        }
        Backend::Gcs => format!(
            "gs|{host}|{}|{}",
            url.username(),
            query_value(destination, "keyfile").unwrap_or_default()
        ),
        Backend::InMemory => format!("memory|{host}"),
    };
    Ok(identity)
}

pub(crate) fn query_value(destination: &Destination, name: &str) -> Option<String> {
    destination
        .url()
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

fn url_key(destination: &Destination, encoded: &str) -> StorageResult<Path> {
    Path::from_url_path(encoded)
        .map_err(|e| StorageError::invalid_uri(destination.redacted(), e.to_string()))
}
