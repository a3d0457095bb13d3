//! Upload orchestration: one invocation moves one artifact from the input
//! stream into storage.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use storage_driver::{Destination, FileProperties, StorageResolver};
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactClass, PendingPayload};
use crate::coalesce::{CoalescingWriter, Flush};
use crate::config::{ManifestStrategy, OBJECT_EXPIRES_KEY, UploadConfig};
use crate::resilient::{PayloadSource, ResilientWriter, UploadResult};
use crate::retry::RetryPolicy;
use crate::thumbnail::{FfmpegThumbnailer, ThumbnailGenerator, ThumbnailPipeline};
use crate::{Result, UploadError};

/// Buffer for one read from the input. Each read is one manifest record.
const READ_BUFFER_SIZE: usize = 64 * 1024;

pub struct Uploader {
    config: Arc<UploadConfig>,
    writer: ResilientWriter,
    thumbnails: Option<Arc<ThumbnailPipeline>>,
    background: TaskTracker,
}

impl Uploader {
    /// Thumbnails, when enabled, are extracted with ffmpeg.
    pub fn new(resolver: Arc<dyn StorageResolver>, config: UploadConfig) -> Self {
        let generator = FfmpegThumbnailer::new()
            .with_ffmpeg_path(config.thumbnails.ffmpeg_path.clone())
            .with_timeout(config.thumbnails.generate_timeout);
        Self::with_thumbnail_generator(resolver, config, Arc::new(generator))
    }

    pub fn with_thumbnail_generator(
        resolver: Arc<dyn StorageResolver>,
        config: UploadConfig,
        generator: Arc<dyn ThumbnailGenerator>,
    ) -> Self {
        let writer = ResilientWriter::new(
            resolver,
            config.failover.clone(),
            config.profiles.short.clone(),
        );
        let thumbnails = config.thumbnails.enabled.then(|| {
            Arc::new(ThumbnailPipeline::new(
                generator,
                writer.clone(),
                config.profiles.persistent.clone(),
                config.thumbnails.clone(),
            ))
        });
        Self {
            config: Arc::new(config),
            writer,
            thumbnails,
            background: TaskTracker::new(),
        }
    }

    /// Consume `input` and store it at `destination`.
    pub async fn upload<R>(&self, input: R, destination: &Destination) -> Result<UploadResult>
    where
        R: AsyncRead + Unpin,
    {
        let class = ArtifactClass::classify(destination);
        let properties = self.properties_for(destination);
        debug!(uri = %destination, ?class, "Starting upload");

        match (class, self.config.manifest_strategy) {
            (ArtifactClass::Segment, _) => self.upload_segment(input, destination, &properties).await,
            (ArtifactClass::Manifest, ManifestStrategy::Inline) => {
                self.upload_manifest_inline(input, destination, &properties)
                    .await
            }
            (ArtifactClass::Manifest, ManifestStrategy::Background) => {
                self.upload_manifest_background(input, destination, &properties)
                    .await
            }
        }
    }

    /// Wait for background thumbnail work. Returns false on timeout.
    pub async fn wait_for_background(&self, timeout: Duration) -> bool {
        self.background.close();
        if self.background.is_empty() {
            return true;
        }
        debug!(tasks = self.background.len(), "Waiting for background tasks");
        tokio::time::timeout(timeout, self.background.wait())
            .await
            .is_ok()
    }

    fn properties_for(&self, destination: &Destination) -> FileProperties {
        let mut properties = FileProperties::default();
        if let Some(rule) = self
            .config
            .expiry_rules
            .iter()
            .find(|rule| destination.as_str().contains(rule.pattern.as_str()))
        {
            properties = properties.with_metadata(OBJECT_EXPIRES_KEY, rule.expires.clone());
        }
        properties
    }

    async fn upload_segment<R>(
        &self,
        mut input: R,
        destination: &Destination,
        properties: &FileProperties,
    ) -> Result<UploadResult>
    where
        R: AsyncRead + Unpin,
    {
        let spool = tempfile::Builder::new().prefix("ferry-segment-").tempfile()?;
        let mut file = tokio::fs::File::from_std(spool.reopen()?);
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        let mut total = 0u64;
        loop {
            let n = input
                .read(&mut buffer)
                .await
                .map_err(|source| UploadError::Input { source })?;
            if n == 0 {
                break;
            }
            file.write_all(&buffer[..n]).await?;
            total += n as u64;
        }
        file.flush().await?;
        drop(file);
        debug!(uri = %destination, bytes = total, "Segment spooled");

        let start = Instant::now();
        let result = self
            .writer
            .write(
                destination,
                &PayloadSource::File(spool.path().to_path_buf()),
                properties,
                self.config.segment_timeout,
                &self.config.profiles.persistent,
            )
            .await?;
        info!(
            uri = %result.uri,
            bytes = result.bytes_written,
            duration_ms = start.elapsed().as_millis() as u64,
            "Segment uploaded"
        );

        self.spawn_thumbnail(spool, destination);
        Ok(result)
    }

    /// Thumbnail work outlives the call; the spool file lives until it is done.
    fn spawn_thumbnail(&self, spool: NamedTempFile, destination: &Destination) {
        let Some(pipeline) = self.thumbnails.clone() else {
            return;
        };
        let destination = destination.clone();
        self.background.spawn(async move {
            if let Err(err) = pipeline.extract_and_upload(spool.path(), &destination).await {
                warn!(uri = %destination, error = %err, "Thumbnail pipeline failed");
            }
            drop(spool);
        });
    }

    async fn upload_manifest_inline<R>(
        &self,
        mut input: R,
        destination: &Destination,
        properties: &FileProperties,
    ) -> Result<UploadResult>
    where
        R: AsyncRead + Unpin,
    {
        let mut pending = PendingPayload::default();
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        let mut last_flush = Instant::now();

        loop {
            let n = input
                .read(&mut buffer)
                .await
                .map_err(|source| UploadError::Input { source })?;
            if n == 0 {
                break;
            }
            pending.append(&buffer[..n]);
            debug!(uri = %destination, bytes = n, "Received manifest record");

            if last_flush.elapsed() > self.config.min_write_interval {
                let written = self
                    .writer
                    .write(
                        destination,
                        &PayloadSource::Memory(pending.snapshot()),
                        properties,
                        self.config.write_timeout,
                        &self.config.profiles.best_effort,
                    )
                    .await;
                match written {
                    Ok(result) => debug!(uri = %result.uri, bytes = result.bytes_written, "Manifest flushed"),
                    // The next flush carries a superset and acts as the retry.
                    Err(err) => warn!(uri = %destination, error = %err, "Failed to write manifest"),
                }
                last_flush = Instant::now();
            }
        }

        self.final_manifest_write(destination, pending.snapshot(), properties)
            .await
    }

    async fn upload_manifest_background<R>(
        &self,
        mut input: R,
        destination: &Destination,
        properties: &FileProperties,
    ) -> Result<UploadResult>
    where
        R: AsyncRead + Unpin,
    {
        let flusher = Arc::new(ManifestFlusher {
            writer: self.writer.clone(),
            destination: destination.clone(),
            properties: properties.clone(),
            timeout: self.config.write_timeout,
            policy: self.config.profiles.best_effort.clone(),
        });
        let coalescer = CoalescingWriter::spawn(flusher, self.config.coalescing.clone());

        let mut pending = PendingPayload::default();
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        let mut last_enqueue = Instant::now();
        loop {
            let n = match input.read(&mut buffer).await {
                Ok(n) => n,
                Err(source) => {
                    coalescer.abort();
                    return Err(UploadError::Input { source });
                }
            };
            if n == 0 {
                break;
            }
            pending.append(&buffer[..n]);
            if last_enqueue.elapsed() > self.config.min_write_interval {
                coalescer.enqueue(pending.snapshot());
                last_enqueue = Instant::now();
            }
        }

        let payload = pending.snapshot();
        coalescer.enqueue(payload.clone());
        match coalescer.stop().await {
            Ok(Some(result)) => Ok(result),
            Ok(None) => self.final_manifest_write(destination, payload, properties).await,
            Err(err) => {
                warn!(uri = %destination, error = %err, "Background writer could not persist final manifest");
                self.final_manifest_write(destination, payload, properties)
                    .await
            }
        }
    }

    /// No later attempt follows, so this one uses the persistent profile.
    async fn final_manifest_write(
        &self,
        destination: &Destination,
        payload: Bytes,
        properties: &FileProperties,
    ) -> Result<UploadResult> {
        let result = self
            .writer
            .write(
                destination,
                &PayloadSource::Memory(payload),
                properties,
                self.config.write_timeout,
                &self.config.profiles.persistent,
            )
            .await
            .map_err(|source| UploadError::FinalFlush {
                source: Box::new(source),
            })?;
        info!(uri = %result.uri, bytes = result.bytes_written, "Manifest uploaded");
        Ok(result)
    }
}

struct ManifestFlusher {
    writer: ResilientWriter,
    destination: Destination,
    properties: FileProperties,
    timeout: Duration,
    policy: RetryPolicy,
}

#[async_trait]
impl Flush for ManifestFlusher {
    type Output = UploadResult;

    async fn flush(&self, payload: Bytes) -> Result<UploadResult> {
        self.writer
            .write(
                &self.destination,
                &PayloadSource::Memory(payload),
                &self.properties,
                self.timeout,
                &self.policy,
            )
            .await
    }
}
