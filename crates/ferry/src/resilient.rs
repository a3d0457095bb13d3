//! Retry and failover composed into one write.
//!
//! Each attempt of the outer schedule walks a small state machine:
//! `TryPrimary -> TryBackup -> Exhausted`. The backup sub-attempt runs on its
//! own short schedule; there is no other nesting.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use storage_driver::{Destination, FileProperties, StorageResolver};
use tracing::{debug, info, warn};

use crate::failover::PrefixMap;
use crate::retry::{RetryAction, RetryPolicy, retry_with_backoff};
use crate::{Result, UploadError};

/// Bytes for one write, loaded afresh for every attempt.
#[derive(Debug, Clone)]
pub enum PayloadSource {
    Memory(Bytes),
    /// Spooled to local disk; re-read per attempt.
    File(PathBuf),
}

impl PayloadSource {
    async fn load(&self) -> Result<Bytes> {
        match self {
            Self::Memory(bytes) => Ok(bytes.clone()),
            Self::File(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
        }
    }
}

/// Outcome of a successful top-level write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadResult {
    /// Where the object landed, credentials masked.
    pub uri: String,
    pub metadata: BTreeMap<String, String>,
    #[serde(rename = "bytes")]
    pub bytes_written: u64,
}

enum AttemptState {
    TryPrimary,
    TryBackup { primary: UploadError },
    Exhausted { primary: UploadError, backup: UploadError },
}

/// Writes whole objects through a [`StorageResolver`], with retry and failover.
#[derive(Clone)]
pub struct ResilientWriter {
    resolver: Arc<dyn StorageResolver>,
    failover: Arc<PrefixMap>,
    backup_policy: RetryPolicy,
}

impl ResilientWriter {
    pub fn new(
        resolver: Arc<dyn StorageResolver>,
        failover: PrefixMap,
        backup_policy: RetryPolicy,
    ) -> Self {
        Self {
            resolver,
            failover: Arc::new(failover),
            backup_policy,
        }
    }

    /// Write `payload` to `destination` under `policy`.
    ///
    /// On failure the error carries the size of the last attempted payload.
    pub async fn write(
        &self,
        destination: &Destination,
        payload: &PayloadSource,
        properties: &FileProperties,
        timeout: Duration,
        policy: &RetryPolicy,
    ) -> Result<UploadResult> {
        let last_bytes = AtomicU64::new(0);
        retry_with_backoff(policy, |attempt| {
            self.attempt(destination, payload, properties, timeout, &last_bytes, attempt)
        })
        .await
        .map_err(|source| UploadError::WriteFailed {
            uri: destination.redacted(),
            bytes_attempted: last_bytes.load(Ordering::Relaxed),
            source: Box::new(source),
        })
    }

    async fn attempt(
        &self,
        destination: &Destination,
        payload: &PayloadSource,
        properties: &FileProperties,
        timeout: Duration,
        last_bytes: &AtomicU64,
        attempt: u32,
    ) -> RetryAction<UploadResult, UploadError> {
        let mut state = AttemptState::TryPrimary;
        loop {
            state = match state {
                AttemptState::TryPrimary => {
                    match self
                        .save_once(destination, payload, properties, timeout, last_bytes)
                        .await
                    {
                        Ok(result) => return RetryAction::Success(result),
                        Err(primary) => {
                            warn!(
                                uri = %destination,
                                attempt = attempt + 1,
                                error = %primary,
                                "Primary write failed"
                            );
                            if self.failover.is_empty() {
                                // Nothing to fail over to; the primary cause is the whole story.
                                return RetryAction::from_result(Err(primary), UploadError::is_retryable);
                            }
                            AttemptState::TryBackup { primary }
                        }
                    }
                }
                AttemptState::TryBackup { primary } => {
                    match self
                        .try_backup(destination, payload, properties, timeout, last_bytes)
                        .await
                    {
                        Ok(result) => {
                            info!(
                                primary = %destination,
                                uri = %result.uri,
                                "Wrote to backup storage"
                            );
                            return RetryAction::Success(result);
                        }
                        Err(backup) => AttemptState::Exhausted { primary, backup },
                    }
                }
                AttemptState::Exhausted { primary, backup } => {
                    let retryable = primary.is_retryable();
                    let err = UploadError::FailoverExhausted {
                        primary: Box::new(primary),
                        backup: Box::new(backup),
                    };
                    return if retryable {
                        RetryAction::Retry(err)
                    } else {
                        RetryAction::Fail(err)
                    };
                }
            };
        }
    }

    async fn try_backup(
        &self,
        destination: &Destination,
        payload: &PayloadSource,
        properties: &FileProperties,
        timeout: Duration,
        last_bytes: &AtomicU64,
    ) -> Result<UploadResult> {
        let backup = self.failover.backup_for(destination)?;
        debug!(primary = %destination, backup = %backup, "Trying backup storage");
        let backup = &backup;
        retry_with_backoff(&self.backup_policy, |_| async move {
            RetryAction::from_result(
                self.save_once(backup, payload, properties, timeout, last_bytes)
                    .await,
                UploadError::is_retryable,
            )
        })
        .await
    }

    async fn save_once(
        &self,
        destination: &Destination,
        payload: &PayloadSource,
        properties: &FileProperties,
        timeout: Duration,
        last_bytes: &AtomicU64,
    ) -> Result<UploadResult> {
        let data = payload.load().await?;
        let size = data.len() as u64;
        last_bytes.store(size, Ordering::Relaxed);

        let session = self
            .resolver
            .resolve(destination)
            .map_err(|source| UploadError::storage(destination.redacted(), source))?;
        let output = session
            .save("", data, properties, timeout)
            .await
            .map_err(|source| UploadError::storage(destination.redacted(), source))?;

        Ok(UploadResult {
            uri: output.uri,
            metadata: output.metadata,
            bytes_written: size,
        })
    }
}
