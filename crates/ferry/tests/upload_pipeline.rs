//! Integration tests for the upload pipeline.
//!
//! Storage is the in-memory driver, wrapped where a test needs a destination
//! that always fails. Retry profiles are shrunk to milliseconds.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ferry_engine::storage_driver::{
    Destination, DriverRegistry, FileProperties, ListPage, ObjectData, SaveOutput, StorageError,
    StorageResolver, StorageResult, StorageSession,
};
use ferry_engine::{
    ArtifactClass, CoalescingConfig, CoalescingWriter, Flush, ManifestStrategy, PayloadSource,
    PrefixMap, ResilienceProfiles, ResilientWriter, Result, RetryPolicy, ThumbnailGenerator,
    UploadConfig, UploadError, UploadResult, Uploader,
};
use tokio::io::AsyncWriteExt;

fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_interval: Duration::from_millis(2),
        max_interval: Duration::from_millis(10),
        max_elapsed: Some(Duration::from_secs(5)),
        multiplier: 1.5,
        jitter: false,
    }
}

fn test_config() -> UploadConfig {
    UploadConfig {
        min_write_interval: Duration::from_millis(100),
        write_timeout: Duration::from_secs(2),
        segment_timeout: Duration::from_secs(2),
        profiles: ResilienceProfiles {
            persistent: fast_policy(2),
            short: fast_policy(1),
            best_effort: RetryPolicy::best_effort(),
        },
        coalescing: CoalescingConfig {
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            multiplier: 1.5,
            max_attempts: 2,
        },
        ..UploadConfig::default()
    }
}

/// In-memory storage where destinations containing any `broken` marker fail
/// every save; `flaky` destinations fail every other save.
struct TestStorage {
    registry: DriverRegistry,
    broken: Vec<&'static str>,
    flaky: Vec<&'static str>,
    saves: Arc<AtomicU32>,
}

impl TestStorage {
    fn new() -> Self {
        Self {
            registry: DriverRegistry::with_memory(),
            broken: Vec::new(),
            flaky: Vec::new(),
            saves: Arc::new(AtomicU32::new(0)),
        }
    }

    fn broken(mut self, marker: &'static str) -> Self {
        self.broken.push(marker);
        self
    }

    fn flaky(mut self, marker: &'static str) -> Self {
        self.flaky.push(marker);
        self
    }

    async fn read(&self, uri: &str) -> StorageResult<ObjectData> {
        self.registry
            .resolve(&Destination::parse(uri).unwrap())?
            .read("")
            .await
    }
}

struct TestSession {
    inner: Arc<dyn StorageSession>,
    broken: bool,
    flaky: bool,
    saves: Arc<AtomicU32>,
}

impl StorageResolver for TestStorage {
    fn resolve(&self, destination: &Destination) -> StorageResult<Arc<dyn StorageSession>> {
        let uri = destination.as_str();
        Ok(Arc::new(TestSession {
            inner: self.registry.resolve(destination)?,
            broken: self.broken.iter().any(|m| uri.contains(m)),
            flaky: self.flaky.iter().any(|m| uri.contains(m)),
            saves: self.saves.clone(),
        }))
    }
}

#[async_trait]
impl StorageSession for TestSession {
    fn destination(&self) -> &Destination {
        self.inner.destination()
    }

    async fn save(
        &self,
        name: &str,
        data: Bytes,
        properties: &FileProperties,
        timeout: Duration,
    ) -> StorageResult<SaveOutput> {
        let call = self.saves.fetch_add(1, Ordering::SeqCst);
        if self.broken || (self.flaky && call % 2 == 0) {
            return Err(StorageError::Io {
                source: std::io::Error::other(format!("{} unavailable", self.destination())),
            });
        }
        self.inner.save(name, data, properties, timeout).await
    }

    async fn read(&self, name: &str) -> StorageResult<ObjectData> {
        self.inner.read(name).await
    }

    async fn list(&self, prefix: &str, delimiter: Option<&str>) -> StorageResult<ListPage> {
        self.inner.list(prefix, delimiter).await
    }
}

/// Writes a fixed image, counting calls.
#[derive(Default)]
struct FakeThumbnailer {
    calls: AtomicU32,
}

#[async_trait]
impl ThumbnailGenerator for FakeThumbnailer {
    async fn generate(&self, _input: &Path, output: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(output, b"\xff\xd8jpeg").await?;
        Ok(())
    }
}

/// Behaves like ffmpeg on an unreadable segment.
#[derive(Default)]
struct CorruptInputThumbnailer {
    calls: AtomicU32,
}

#[async_trait]
impl ThumbnailGenerator for CorruptInputThumbnailer {
    async fn generate(&self, input: &Path, _output: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(UploadError::external_tool(
            "ffmpeg",
            "exited with exit status: 1",
            format!("{}: Invalid data found when processing input", input.display()),
        ))
    }
}

fn uploader(
    storage: Arc<TestStorage>,
    config: UploadConfig,
    generator: Arc<dyn ThumbnailGenerator>,
) -> Uploader {
    Uploader::with_thumbnail_generator(storage, config, generator)
}

/// Feeds `records` into a pipe, pausing `gap` before each one.
fn timed_records(records: &'static [&'static str], gap: Duration) -> tokio::io::DuplexStream {
    let (reader, mut writer) = tokio::io::duplex(64 * 1024);
    tokio::spawn(async move {
        for record in records {
            tokio::time::sleep(gap).await;
            writer.write_all(record.as_bytes()).await.unwrap();
            writer.flush().await.unwrap();
        }
        writer.shutdown().await.unwrap();
    });
    reader
}

mod segment_tests {
    use super::*;

    #[tokio::test]
    async fn segment_round_trips_exactly() {
        let storage = Arc::new(TestStorage::new());
        let uploader = uploader(storage.clone(), test_config(), Arc::new(FakeThumbnailer::default()));
        let destination = Destination::parse("memory://primary/stream/720p/seg1.ts").unwrap();
        let input: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();

        let result = uploader.upload(&input[..], &destination).await.unwrap();

        assert_eq!(result.uri, "memory://primary/stream/720p/seg1.ts");
        assert_eq!(result.bytes_written, input.len() as u64);
        let stored = storage.read(&result.uri).await.unwrap();
        assert_eq!(stored.body, Bytes::from(input));
    }

    #[tokio::test]
    async fn failover_success_is_call_success() {
        let storage = Arc::new(TestStorage::new().broken("memory://primary"));
        let config = UploadConfig {
            failover: PrefixMap::parse("memory://primary/=memory://backup/").unwrap(),
            ..test_config()
        };
        let uploader = uploader(storage.clone(), config, Arc::new(FakeThumbnailer::default()));
        let destination = Destination::parse("memory://primary/stream/seg2.ts").unwrap();

        let result = uploader.upload(&b"segment-bytes"[..], &destination).await.unwrap();

        assert_eq!(result.uri, "memory://backup/stream/seg2.ts");
        let stored = storage.read("memory://backup/stream/seg2.ts").await.unwrap();
        assert_eq!(stored.body, Bytes::from_static(b"segment-bytes"));
        assert!(storage.read("memory://primary/stream/seg2.ts").await.is_err());
    }

    #[tokio::test]
    async fn double_failure_reports_both_causes() {
        let storage = Arc::new(
            TestStorage::new()
                .broken("memory://primary")
                .broken("memory://backup"),
        );
        let config = UploadConfig {
            failover: PrefixMap::parse("memory://primary/=memory://backup/").unwrap(),
            ..test_config()
        };
        let uploader = uploader(storage.clone(), config, Arc::new(FakeThumbnailer::default()));
        let destination = Destination::parse("memory://primary/stream/seg3.ts").unwrap();

        let err = uploader
            .upload(&b"0123456789"[..], &destination)
            .await
            .unwrap_err();

        let text = err.to_string();
        assert!(text.contains("memory://primary/stream/seg3.ts unavailable"), "{text}");
        assert!(text.contains("memory://backup/stream/seg3.ts unavailable"), "{text}");
        assert!(matches!(err, UploadError::WriteFailed { bytes_attempted: 10, .. }));
    }

    #[tokio::test]
    async fn missing_failover_mapping_is_reported() {
        let storage = Arc::new(TestStorage::new().broken("memory://primary"));
        let config = UploadConfig {
            failover: PrefixMap::parse("memory://other/=memory://backup/").unwrap(),
            ..test_config()
        };
        let uploader = uploader(storage, config, Arc::new(FakeThumbnailer::default()));
        let destination = Destination::parse("memory://primary/stream/seg4.ts").unwrap();

        let err = uploader.upload(&b"x"[..], &destination).await.unwrap_err();
        assert!(err.to_string().contains("no backup URL"));
    }

    #[tokio::test]
    async fn unconfigured_failover_reports_primary_only() {
        let storage = Arc::new(TestStorage::new().broken("memory://primary"));
        let uploader = uploader(storage, test_config(), Arc::new(FakeThumbnailer::default()));
        let destination = Destination::parse("memory://primary/stream/seg5.ts").unwrap();

        let err = uploader.upload(&b"x"[..], &destination).await.unwrap_err();
        let text = err.to_string();
        assert!(text.contains("memory://primary/stream/seg5.ts unavailable"), "{text}");
        assert!(!text.contains("backup"), "{text}");
    }
}

mod manifest_tests {
    use super::*;

    const RECORDS: &[&str] = &["#EXTM3U\n", "#EXTINF:1,\n", "seg1.ts\n"];

    async fn assert_final_manifest(strategy: ManifestStrategy, storage: TestStorage) {
        let storage = Arc::new(storage);
        let config = UploadConfig {
            manifest_strategy: strategy,
            ..test_config()
        };
        let uploader = uploader(storage.clone(), config, Arc::new(FakeThumbnailer::default()));
        let destination = Destination::parse("memory://live/stream/index.m3u8").unwrap();

        // Three records spread across roughly two seconds.
        let input = timed_records(RECORDS, Duration::from_millis(650));
        let result = uploader.upload(input, &destination).await.unwrap();

        let expected = RECORDS.concat();
        assert_eq!(result.bytes_written, expected.len() as u64);
        let stored = storage.read("memory://live/stream/index.m3u8").await.unwrap();
        assert_eq!(stored.body, Bytes::from(expected));
    }

    #[tokio::test]
    async fn inline_final_object_is_full_concatenation() {
        assert_final_manifest(ManifestStrategy::Inline, TestStorage::new()).await;
    }

    #[tokio::test]
    async fn inline_survives_failing_intermediate_flushes() {
        assert_final_manifest(ManifestStrategy::Inline, TestStorage::new().flaky("memory://live"))
            .await;
    }

    #[tokio::test]
    async fn background_final_object_is_full_concatenation() {
        assert_final_manifest(
            ManifestStrategy::Background,
            TestStorage::new().flaky("memory://live"),
        )
        .await;
    }

    #[tokio::test]
    async fn final_flush_failure_is_returned() {
        let storage = Arc::new(TestStorage::new().broken("memory://live"));
        let uploader = uploader(storage, test_config(), Arc::new(FakeThumbnailer::default()));
        let destination = Destination::parse("memory://live/stream/index.m3u8").unwrap();

        let err = uploader
            .upload(&b"#EXTM3U\n"[..], &destination)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::FinalFlush { .. }));
        assert!(err.to_string().contains("failed to write final save"));
    }
}

mod coalescing_tests {
    use super::*;

    struct StoreFlusher {
        writer: ResilientWriter,
        destination: Destination,
    }

    #[async_trait]
    impl Flush for StoreFlusher {
        type Output = UploadResult;

        async fn flush(&self, payload: Bytes) -> Result<UploadResult> {
            // Slow enough that enqueues outpace flushes.
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.writer
                .write(
                    &self.destination,
                    &PayloadSource::Memory(payload),
                    &FileProperties::default(),
                    Duration::from_secs(1),
                    &RetryPolicy::best_effort(),
                )
                .await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn newest_payload_is_persisted() {
        let storage = Arc::new(TestStorage::new());
        let destination = Destination::parse("memory://live/stream/index.m3u8").unwrap();
        let flusher = Arc::new(StoreFlusher {
            writer: ResilientWriter::new(storage.clone(), PrefixMap::new(), fast_policy(0)),
            destination: destination.clone(),
        });
        let writer = CoalescingWriter::spawn(flusher, test_config().coalescing);

        writer.enqueue(Bytes::from_static(b"P1"));
        tokio::time::sleep(Duration::from_millis(5)).await;
        writer.enqueue(Bytes::from_static(b"P1P2"));
        writer.enqueue(Bytes::from_static(b"P1P2P3"));

        let result = writer.stop().await.unwrap().unwrap();
        assert_eq!(result.bytes_written, 6);
        let stored = storage.read("memory://live/stream/index.m3u8").await.unwrap();
        assert_eq!(stored.body, Bytes::from_static(b"P1P2P3"));
    }
}

mod thumbnail_tests {
    use super::*;

    #[tokio::test]
    async fn thumbnail_failure_does_not_fail_segment() {
        let storage = Arc::new(TestStorage::new());
        let generator = Arc::new(CorruptInputThumbnailer::default());
        let uploader = uploader(storage.clone(), test_config(), generator.clone());
        let destination = Destination::parse("memory://live/stream/720p/seg1.ts").unwrap();

        let result = uploader.upload(&b"not really video"[..], &destination).await;
        assert!(result.is_ok());
        assert!(uploader.wait_for_background(Duration::from_secs(5)).await);

        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert!(storage.read("memory://live/stream/720p/latest.jpg").await.is_err());
        assert!(storage.read("memory://live/stream/latest.jpg").await.is_err());
    }

    #[tokio::test]
    async fn thumbnail_upload_failure_does_not_fail_segment() {
        let storage = Arc::new(TestStorage::new().broken("latest.jpg"));
        let uploader = uploader(storage.clone(), test_config(), Arc::new(FakeThumbnailer::default()));
        let destination = Destination::parse("memory://live/stream/720p/seg1.ts").unwrap();

        assert!(uploader.upload(&b"video"[..], &destination).await.is_ok());
        assert!(uploader.wait_for_background(Duration::from_secs(5)).await);
        assert!(storage.read("memory://live/stream/720p/seg1.ts").await.is_ok());
    }

    #[tokio::test]
    async fn thumbnails_fan_out_after_segment() {
        let storage = Arc::new(TestStorage::new());
        let uploader = uploader(storage.clone(), test_config(), Arc::new(FakeThumbnailer::default()));
        let destination = Destination::parse("memory://live/stream/720p/seg1.ts").unwrap();

        uploader.upload(&b"video"[..], &destination).await.unwrap();
        assert!(uploader.wait_for_background(Duration::from_secs(5)).await);

        for uri in ["memory://live/stream/720p/latest.jpg", "memory://live/stream/latest.jpg"] {
            let image = storage.read(uri).await.unwrap();
            assert_eq!(image.body, Bytes::from_static(b"\xff\xd8jpeg"));
        }
    }
}

mod classification_tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("memory://live/stream/seg1.ts", ArtifactClass::Segment)]
    #[case("memory://live/stream/source.mp4", ArtifactClass::Segment)]
    #[case("memory://live/stream/index.m3u8", ArtifactClass::Manifest)]
    #[case("memory://live/stream/720p/index.m3u8", ArtifactClass::Manifest)]
    #[tokio::test]
    async fn routing_follows_extension(#[case] uri: &str, #[case] expected: ArtifactClass) {
        let destination = Destination::parse(uri).unwrap();
        assert_eq!(ArtifactClass::classify(&destination), expected);

        // Only the segment path extracts thumbnails.
        let storage = Arc::new(TestStorage::new());
        let generator = Arc::new(FakeThumbnailer::default());
        let uploader = uploader(storage.clone(), test_config(), generator.clone());
        uploader.upload(&b"payload"[..], &destination).await.unwrap();
        assert!(uploader.wait_for_background(Duration::from_secs(5)).await);

        let thumbnails = generator.calls.load(Ordering::SeqCst);
        match expected {
            ArtifactClass::Segment => assert_eq!(thumbnails, 1),
            ArtifactClass::Manifest => assert_eq!(thumbnails, 0),
        }
        assert_eq!(storage.read(uri).await.unwrap().body, Bytes::from_static(b"payload"));
    }
}
