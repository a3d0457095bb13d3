//! # Ferry Engine
//!
//! Moves a live stream's artifacts from a local producer into object storage.
//!
//! Segments (`.ts`, `.mp4`) are read to completion and written once under a
//! persistent retry profile, then a thumbnail is extracted in the background.
//! Everything else is treated as a manifest: records are accumulated and
//! periodically flushed, with one final write once the input ends.
//!
//! Every write goes through [`ResilientWriter`], which retries and falls back
//! to a backup location chosen by prefix substitution.

mod artifact;
mod coalesce;
mod config;
mod error;
mod failover;
mod resilient;
mod retry;
mod thumbnail;
mod uploader;

pub use artifact::{ArtifactClass, PendingPayload};
pub use coalesce::{CoalescingWriter, Flush};
pub use config::{
    CoalescingConfig, DEFAULT_MIN_WRITE_INTERVAL, DEFAULT_SEGMENT_TIMEOUT, DEFAULT_WRITE_TIMEOUT,
    ExpiryRule, ManifestStrategy, OBJECT_EXPIRES_KEY, ResilienceProfiles, ThumbnailConfig,
    UploadConfig,
};
pub use error::{Result, UploadError};
pub use failover::PrefixMap;
pub use resilient::{PayloadSource, ResilientWriter, UploadResult};
pub use retry::{RetryAction, RetryPolicy, retry_with_backoff};
pub use thumbnail::{FfmpegThumbnailer, ThumbnailGenerator, ThumbnailPipeline};
pub use uploader::Uploader;

pub use storage_driver;
