//! TOML configuration file and its merge with command-line flags.
//!
//! Precedence: flags and `FERRY_*` variables, then the file, then defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use ferry_engine::{ExpiryRule, ManifestStrategy, PrefixMap, RetryPolicy, UploadConfig};
use serde::Deserialize;

use crate::cli::Args;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/ferry/ferry.toml";
pub const DEFAULT_BACKGROUND_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub write_timeout: Option<String>,
    pub segment_timeout: Option<String>,
    pub min_write_interval: Option<String>,
    pub storage_fallback_urls: Option<String>,
    pub manifest_strategy: Option<ManifestStrategy>,
    pub background_wait: Option<String>,
    pub expiry_rules: Option<Vec<ExpiryRule>>,
    pub thumbnails: ThumbnailSection,
    pub retry: RetrySection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThumbnailSection {
    pub enabled: Option<bool>,
    pub ffmpeg_path: Option<String>,
    pub timeout: Option<String>,
    pub upload_timeout: Option<String>,
    pub disable_list: Option<Vec<String>>,
    pub url_rewrite: Option<String>,
    pub targets: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub persistent: Option<ProfileSection>,
    pub short: Option<ProfileSection>,
    pub best_effort: Option<ProfileSection>,
}

/// Overrides for one retry profile; unset fields keep the profile's defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfileSection {
    pub max_retries: Option<u32>,
    pub initial_interval: Option<String>,
    pub max_interval: Option<String>,
    pub max_elapsed: Option<String>,
    pub multiplier: Option<f64>,
    pub jitter: Option<bool>,
}

impl FileConfig {
    /// Load `path`, or the default location when it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_PATH);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

impl ProfileSection {
    fn apply(&self, name: &str, mut policy: RetryPolicy) -> Result<RetryPolicy> {
        if let Some(max_retries) = self.max_retries {
            policy.max_retries = max_retries;
        }
        if let Some(value) = &self.initial_interval {
            policy.initial_interval = duration(&format!("retry.{name}.initial_interval"), value)?;
        }
        if let Some(value) = &self.max_interval {
            policy.max_interval = duration(&format!("retry.{name}.max_interval"), value)?;
        }
        if let Some(value) = &self.max_elapsed {
            policy.max_elapsed = Some(duration(&format!("retry.{name}.max_elapsed"), value)?);
        }
        if let Some(multiplier) = self.multiplier {
            policy.multiplier = multiplier;
        }
        if let Some(jitter) = self.jitter {
            policy.jitter = jitter;
        }
        Ok(policy)
    }
}

/// Everything the upload command needs.
#[derive(Debug)]
pub struct Settings {
    pub upload: UploadConfig,
    pub background_wait: Duration,
}

fn duration(field: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value).with_context(|| format!("invalid duration for `{field}`: {value}"))
}

fn pick_duration(flag: Option<Duration>, file: Option<&String>, field: &str) -> Result<Option<Duration>> {
    match (flag, file) {
        (Some(value), _) => Ok(Some(value)),
        (None, Some(value)) => duration(field, value).map(Some),
        (None, None) => Ok(None),
    }
}

/// Merge flags over the file over defaults.
pub fn resolve(args: &Args, file: FileConfig) -> Result<Settings> {
    let mut upload = UploadConfig::default();

    if let Some(value) = pick_duration(args.write_timeout, file.write_timeout.as_ref(), "write_timeout")? {
        upload.write_timeout = value;
    }
    if let Some(value) =
        pick_duration(args.segment_timeout, file.segment_timeout.as_ref(), "segment_timeout")?
    {
        upload.segment_timeout = value;
    }
    if let Some(value) = pick_duration(
        args.min_write_interval,
        file.min_write_interval.as_ref(),
        "min_write_interval",
    )? {
        upload.min_write_interval = value;
    }

    upload.failover = match (&args.storage_fallback_urls, &file.storage_fallback_urls) {
        (Some(map), _) => map.clone(),
        (None, Some(raw)) => {
            PrefixMap::parse(raw).context("invalid `storage_fallback_urls` in config file")?
        }
        (None, None) => PrefixMap::default(),
    };

    if let Some(strategy) = args.manifest_strategy.or(file.manifest_strategy) {
        upload.manifest_strategy = strategy;
    }
    if let Some(rules) = file.expiry_rules {
        upload.expiry_rules = rules;
    }

    let thumbnails = &mut upload.thumbnails;
    if let Some(enabled) = file.thumbnails.enabled {
        thumbnails.enabled = enabled;
    }
    if args.no_thumbnails {
        thumbnails.enabled = false;
    }
    if let Some(path) = args.ffmpeg_path.clone().or(file.thumbnails.ffmpeg_path) {
        thumbnails.ffmpeg_path = path;
    }
    if let Some(value) = &file.thumbnails.timeout {
        thumbnails.generate_timeout = duration("thumbnails.timeout", value)?;
    }
    if let Some(value) = &file.thumbnails.upload_timeout {
        thumbnails.upload_timeout = duration("thumbnails.upload_timeout", value)?;
    }
    if !args.thumbnail_disable_list.is_empty() {
        thumbnails.disable_list = args.thumbnail_disable_list.clone();
    } else if let Some(list) = file.thumbnails.disable_list {
        thumbnails.disable_list = list;
    }
    thumbnails.rewrite = match (&args.thumbnail_url_rewrite, &file.thumbnails.url_rewrite) {
        (Some(map), _) => map.clone(),
        (None, Some(raw)) => {
            PrefixMap::parse(raw).context("invalid `thumbnails.url_rewrite` in config file")?
        }
        (None, None) => PrefixMap::default(),
    };
    if let Some(targets) = file.thumbnails.targets {
        thumbnails.targets = targets;
    }

    let profiles = &mut upload.profiles;
    if let Some(section) = &file.retry.persistent {
        profiles.persistent = section.apply("persistent", profiles.persistent.clone())?;
    }
    if let Some(section) = &file.retry.short {
        profiles.short = section.apply("short", profiles.short.clone())?;
    }
    if let Some(section) = &file.retry.best_effort {
        profiles.best_effort = section.apply("best_effort", profiles.best_effort.clone())?;
    }

    let background_wait = pick_duration(
        args.background_wait,
        file.background_wait.as_ref(),
        "background_wait",
    )?
    .unwrap_or(DEFAULT_BACKGROUND_WAIT);

    Ok(Settings {
        upload,
        background_wait,
    })
}
