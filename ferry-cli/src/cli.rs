use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use ferry_engine::{ManifestStrategy, PrefixMap};

#[derive(Parser, Debug)]
#[command(
    name = "ferry",
    version,
    about = "Uploads data from standard input to the specified storage URI",
    long_about = "Uploads data from standard input to the specified storage URI.\n\n\
        Destinations ending in .ts or .mp4 are uploaded in one go once the input ends.\n\
        Anything else is treated as a manifest and rewritten periodically while input arrives.\n\n\
        Example:\n  ferry s3://AWS_KEY:AWS_SECRET@eu-west-1/bucket-name/stream/index.m3u8"
)]
pub struct Args {
    /// Storage URI with credentials
    #[arg(value_name = "DESTINATION", required_unless_present = "describe")]
    pub destination: Option<String>,

    /// Describe supported storage services in JSON format and exit
    #[arg(short = 'j', long)]
    pub describe: bool,

    /// Configuration file (TOML)
    #[arg(short, long, env = "FERRY_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Per-attempt write timeout for manifests
    #[arg(short = 't', long = "timeout", env = "FERRY_TIMEOUT", value_parser = humantime::parse_duration)]
    pub write_timeout: Option<Duration>,

    /// Per-attempt write timeout for segments
    #[arg(long, env = "FERRY_SEGMENT_TIMEOUT", value_parser = humantime::parse_duration)]
    pub segment_timeout: Option<Duration>,

    /// Minimum time between intermediate manifest writes
    #[arg(long, env = "FERRY_MIN_WRITE_INTERVAL", value_parser = humantime::parse_duration)]
    pub min_write_interval: Option<Duration>,

    /// Comma-separated map of primary to backup storage URL prefixes (k1=v1,k2=v2)
    #[arg(long, env = "FERRY_STORAGE_FALLBACK_URLS", value_parser = parse_prefix_map)]
    pub storage_fallback_urls: Option<PrefixMap>,

    /// Manifest flushing strategy: inline or background
    #[arg(long, env = "FERRY_MANIFEST_STRATEGY")]
    pub manifest_strategy: Option<ManifestStrategy>,

    /// Do not extract thumbnails from segments
    #[arg(long, env = "FERRY_NO_THUMBNAILS")]
    pub no_thumbnails: bool,

    /// Comma-separated stream identifiers to skip thumbnails for
    #[arg(long, env = "FERRY_THUMBNAIL_DISABLE_LIST", value_delimiter = ',')]
    pub thumbnail_disable_list: Vec<String>,

    /// Comma-separated prefix rewrites applied to thumbnail destinations (k1=v1,k2=v2)
    #[arg(long, env = "FERRY_THUMBNAIL_URL_REWRITE", value_parser = parse_prefix_map)]
    pub thumbnail_url_rewrite: Option<PrefixMap>,

    /// Path to the ffmpeg binary
    #[arg(long, env = "FFMPEG_PATH")]
    pub ffmpeg_path: Option<String>,

    /// How long to wait for thumbnail uploads before exiting
    #[arg(long, env = "FERRY_BACKGROUND_WAIT", value_parser = humantime::parse_duration)]
    pub background_wait: Option<Duration>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log line format on stderr
    #[arg(long, value_enum, env = "FERRY_LOG_FORMAT", default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Also write logs to this file, rotated daily
    #[arg(short = 'l', long, env = "FERRY_LOG_FILE", value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

fn parse_prefix_map(s: &str) -> Result<PrefixMap, String> {
    PrefixMap::parse(s).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_upload_flags() {
        let args = Args::try_parse_from([
            "ferry",
            "-t",
            "45s",
            "--segment-timeout",
            "2m",
            "--storage-fallback-urls",
            "s3://a/=s3://b/",
            "--manifest-strategy",
            "background",
            "s3://k:s@eu-west-1/bucket/seg.ts",
        ])
        .unwrap();

        assert_eq!(args.destination.as_deref(), Some("s3://k:s@eu-west-1/bucket/seg.ts"));
        assert_eq!(args.write_timeout, Some(Duration::from_secs(45)));
        assert_eq!(args.segment_timeout, Some(Duration::from_secs(120)));
        assert_eq!(args.storage_fallback_urls.map(|m| m.len()), Some(1));
        assert_eq!(args.manifest_strategy, Some(ManifestStrategy::Background));
    }

    #[test]
    fn describe_needs_no_destination() {
        let args = Args::try_parse_from(["ferry", "-j"]).unwrap();
        assert!(args.describe);
        assert!(Args::try_parse_from(["ferry"]).is_err());
    }

    #[test]
    fn rejects_malformed_fallback_map() {
        assert!(
            Args::try_parse_from(["ferry", "--storage-fallback-urls", "nonsense", "/tmp/a.ts"])
                .is_err()
        );
    }
}
