//! Thumbnail extraction for uploaded segments and fan-out to the latest-image targets.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use storage_driver::{Destination, FileProperties};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::ThumbnailConfig;
use crate::resilient::{PayloadSource, ResilientWriter};
use crate::retry::RetryPolicy;
use crate::{Result, UploadError};

/// Bound on collecting tool output once the process is gone.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Produces a still image from a media file.
#[async_trait]
pub trait ThumbnailGenerator: Send + Sync {
    /// Write an image for `input` to `output`. No image may be left behind on error.
    async fn generate(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Extracts the first frame with ffmpeg.
pub struct FfmpegThumbnailer {
    ffmpeg_path: String,
    timeout: Duration,
}

impl FfmpegThumbnailer {
    pub fn new() -> Self {
        let defaults = ThumbnailConfig::default();
        Self {
            ffmpeg_path: defaults.ffmpeg_path,
            timeout: defaults.generate_timeout,
        }
    }

    pub fn with_ffmpeg_path(mut self, path: impl Into<String>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn args(input: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-i".into(), input.into()];
        args.extend(
            [
                "-ss",
                "00:00:00",
                "-vframes",
                "1",
                "-vf",
                "scale=320:240:force_original_aspect_ratio=decrease",
                "-y",
            ]
            .map(OsString::from),
        );
        args.push(output.into());
        args
    }
}

impl Default for FfmpegThumbnailer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ThumbnailGenerator for FfmpegThumbnailer {
    async fn generate(&self, input: &Path, output: &Path) -> Result<()> {
        let start = Instant::now();

        let mut child = Command::new(&self.ffmpeg_path)
            .args(Self::args(input, output))
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| UploadError::external_tool("ffmpeg", format!("failed to spawn: {e}"), ""))?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(format!("exited with {status}")),
            Ok(Err(e)) => Err(format!("failed to wait: {e}")),
            Err(_) => {
                let _ = child.kill().await;
                Err(format!("timed out after {:?}", self.timeout))
            }
        };

        // Pipes may outlive the process when it forked; keep what arrived in time.
        let mut captured = String::new();
        let _ = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, async {
            while let Some(line) = rx.recv().await {
                captured.push_str(&line);
                captured.push('\n');
            }
        })
        .await;

        if let Err(reason) = status {
            // A killed or failed run may leave a truncated image.
            let _ = tokio::fs::remove_file(output).await;
            return Err(UploadError::external_tool("ffmpeg", reason, captured));
        }

        if tokio::fs::metadata(output).await.is_err() {
            return Err(UploadError::external_tool(
                "ffmpeg",
                "exited successfully but produced no image",
                captured,
            ));
        }

        debug!(
            input = %input.display(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Thumbnail extracted"
        );
        Ok(())
    }
}

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("ffmpeg: {line}");
        if tx.send(line).is_err() {
            break;
        }
    }
}

/// Extracts a thumbnail from a finished segment and uploads it to every target.
pub struct ThumbnailPipeline {
    generator: Arc<dyn ThumbnailGenerator>,
    writer: ResilientWriter,
    policy: RetryPolicy,
    config: ThumbnailConfig,
}

impl ThumbnailPipeline {
    pub fn new(
        generator: Arc<dyn ThumbnailGenerator>,
        writer: ResilientWriter,
        policy: RetryPolicy,
        config: ThumbnailConfig,
    ) -> Self {
        Self {
            generator,
            writer,
            policy,
            config,
        }
    }

    fn is_disabled(&self, destination: &Destination) -> bool {
        self.config
            .disable_list
            .iter()
            .filter(|id| !id.is_empty())
            .any(|id| destination.as_str().contains(id.as_str()))
    }

    /// Returns the first upload error. Callers only log it.
    pub async fn extract_and_upload(&self, segment: &Path, destination: &Destination) -> Result<()> {
        if self.is_disabled(destination) {
            debug!(uri = %destination, "Thumbnails disabled for stream");
            return Ok(());
        }

        let base = match self.config.rewrite.substitute(destination.as_str()) {
            Some(rewritten) => Destination::parse(&rewritten)
                .map_err(|source| UploadError::storage(&rewritten, source))?,
            None => destination.clone(),
        };
        let targets = self
            .config
            .targets
            .iter()
            .map(|target| {
                base.join(target)
                    .map_err(|source| UploadError::storage(base.redacted(), source))
            })
            .collect::<Result<Vec<_>>>()?;
        if targets.is_empty() {
            return Ok(());
        }

        let scratch = tempfile::Builder::new().prefix("thumb-").tempdir()?;
        let image = scratch.path().join("out.jpg");
        self.generator.generate(segment, &image).await?;
        let payload = PayloadSource::Memory(Bytes::from(tokio::fs::read(&image).await?));
        drop(scratch);

        let properties = FileProperties::default().with_cache_control(&self.config.cache_control);
        let mut uploads = JoinSet::new();
        for target in targets {
            let writer = self.writer.clone();
            let payload = payload.clone();
            let properties = properties.clone();
            let policy = self.policy.clone();
            let timeout = self.config.upload_timeout;
            uploads.spawn(async move {
                writer
                    .write(&target, &payload, &properties, timeout, &policy)
                    .await
            });
        }

        let mut first_error = None;
        while let Some(joined) = uploads.join_next().await {
            match joined.map_err(UploadError::from).and_then(|written| written) {
                Ok(result) => info!(uri = %result.uri, bytes = result.bytes_written, "Thumbnail uploaded"),
                Err(err) => {
                    warn!(error = %err, "Thumbnail upload failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}
