use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::failover::PrefixMap;
use crate::retry::RetryPolicy;
use crate::UploadError;

/// Minimum time between intermediate manifest flushes.
pub const DEFAULT_MIN_WRITE_INTERVAL: Duration = Duration::from_secs(5);
/// Per-attempt timeout for manifest writes.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);
/// Per-attempt timeout for segment writes.
pub const DEFAULT_SEGMENT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Metadata key honoured by stores that support delayed deletion.
pub const OBJECT_EXPIRES_KEY: &str = "Object-Expires";

/// Configuration for one upload invocation.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub min_write_interval: Duration,
    pub write_timeout: Duration,
    pub segment_timeout: Duration,
    /// Primary prefix to backup prefix.
    pub failover: PrefixMap,
    pub expiry_rules: Vec<ExpiryRule>,
    pub manifest_strategy: ManifestStrategy,
    pub coalescing: CoalescingConfig,
    pub thumbnails: ThumbnailConfig,
    pub profiles: ResilienceProfiles,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            min_write_interval: DEFAULT_MIN_WRITE_INTERVAL,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            segment_timeout: DEFAULT_SEGMENT_TIMEOUT,
            failover: PrefixMap::default(),
            expiry_rules: vec![ExpiryRule::new(
                "gateway.storjshare.io/catalyst-recordings-com",
                "+168h",
            )],
            manifest_strategy: ManifestStrategy::default(),
            coalescing: CoalescingConfig::default(),
            thumbnails: ThumbnailConfig::default(),
            profiles: ResilienceProfiles::default(),
        }
    }
}

/// Named retry profiles.
#[derive(Debug, Clone, PartialEq)]
pub struct ResilienceProfiles {
    /// Segments, the final manifest write and thumbnail fan-out.
    pub persistent: RetryPolicy,
    /// Backup sub-attempt inside a failed primary attempt.
    pub short: RetryPolicy,
    /// Intermediate manifest flushes.
    pub best_effort: RetryPolicy,
}

impl Default for ResilienceProfiles {
    fn default() -> Self {
        Self {
            persistent: RetryPolicy::persistent(),
            short: RetryPolicy::short(),
            best_effort: RetryPolicy::best_effort(),
        }
    }
}

/// Marks objects for delayed deletion when the destination contains `pattern`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryRule {
    pub pattern: String,
    /// Value written as `Object-Expires`, e.g. `+168h`.
    pub expires: String,
}

impl ExpiryRule {
    pub fn new(pattern: impl Into<String>, expires: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            expires: expires.into(),
        }
    }
}

/// How manifests are flushed while the input is still open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestStrategy {
    /// Flush on the reader's task right after a record arrives.
    #[default]
    Inline,
    /// Hand snapshots to a background coalescing writer.
    Background,
}

impl FromStr for ManifestStrategy {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(Self::Inline),
            "background" => Ok(Self::Background),
            other => Err(UploadError::configuration(format!(
                "unknown manifest strategy `{other}`, expected `inline` or `background`"
            ))),
        }
    }
}

/// Backoff of the background coalescing writer.
#[derive(Debug, Clone, PartialEq)]
pub struct CoalescingConfig {
    /// Wait after the first failed flush.
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Attempts spent on one payload before waiting for a newer one.
    pub max_attempts: u32,
}

impl Default for CoalescingConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 1.5,
            max_attempts: 3,
        }
    }
}

impl CoalescingConfig {
    pub(crate) fn next_backoff(&self, current: Duration) -> Duration {
        let next_ms = (current.as_millis() as f64 * self.multiplier.max(1.0)).round() as u64;
        Duration::from_millis(next_ms).min(self.max_backoff)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailConfig {
    pub enabled: bool,
    pub ffmpeg_path: String,
    /// Bound on one frame extraction.
    pub generate_timeout: Duration,
    /// Per-attempt timeout for each thumbnail upload.
    pub upload_timeout: Duration,
    pub cache_control: String,
    /// Stream identifiers for which thumbnails are skipped.
    pub disable_list: Vec<String>,
    /// Applied to the segment destination before targets are resolved.
    pub rewrite: PrefixMap,
    /// Upload targets relative to the (rewritten) segment destination.
    pub targets: Vec<String>,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ffmpeg_path: "ffmpeg".to_string(),
            generate_timeout: Duration::from_secs(5),
            upload_timeout: Duration::from_secs(10),
            cache_control: "max-age=5".to_string(),
            disable_list: Vec::new(),
            rewrite: PrefixMap::default(),
            targets: vec!["latest.jpg".to_string(), "../latest.jpg".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_manifest_strategy() {
        assert_eq!("inline".parse::<ManifestStrategy>().unwrap(), ManifestStrategy::Inline);
        assert_eq!(
            " Background ".parse::<ManifestStrategy>().unwrap(),
            ManifestStrategy::Background
        );
        assert!("eager".parse::<ManifestStrategy>().is_err());
    }

    #[test]
    fn coalescing_backoff_grows_to_cap() {
        let config = CoalescingConfig {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(200),
            multiplier: 1.5,
            max_attempts: 3,
        };
        let second = config.next_backoff(config.initial_backoff);
        assert_eq!(second, Duration::from_millis(150));
        assert_eq!(config.next_backoff(second), Duration::from_millis(200));
    }

    #[test]
    fn defaults_match_uploader_profiles() {
        let config = UploadConfig::default();
        assert_eq!(config.write_timeout, Duration::from_secs(30));
        assert_eq!(config.segment_timeout, Duration::from_secs(300));
        assert_eq!(config.profiles.persistent.max_retries, 2);
        assert_eq!(config.profiles.best_effort.max_retries, 0);
        assert_eq!(config.thumbnails.targets, vec!["latest.jpg", "../latest.jpg"]);
    }
}
