//! End-to-end checks of the registry against the local filesystem backend.

use std::time::Duration;

use bytes::Bytes;
use storage_driver::{Backend, Destination, DriverRegistry, FileProperties, StorageResolver};

fn destination(dir: &tempfile::TempDir, relative: &str) -> Destination {
    let path = dir.path().join(relative);
    Destination::parse(path.to_str().unwrap()).unwrap()
}

#[tokio::test]
async fn bare_path_round_trips_through_registry() {
    let dir = tempfile::tempdir().unwrap();
    let target = destination(&dir, "stream/720p/index.m3u8");
    assert_eq!(target.backend(), Backend::Filesystem);

    let session = DriverRegistry::new().resolve(&target).unwrap();
    let output = session
        .save(
            "",
            Bytes::from_static(b"#EXTM3U\n"),
            &FileProperties::default().with_cache_control("max-age=5"),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

    assert_eq!(output.uri, dir.path().join("stream/720p/index.m3u8").display().to_string());
    let on_disk = std::fs::read(dir.path().join("stream/720p/index.m3u8")).unwrap();
    assert_eq!(on_disk, b"#EXTM3U\n");
}

#[tokio::test]
async fn overwrite_replaces_whole_object() {
    let dir = tempfile::tempdir().unwrap();
    let target = destination(&dir, "index.m3u8");
    let session = DriverRegistry::new().resolve(&target).unwrap();

    for body in [&b"#EXTM3U\n#EXTINF:2,\nseg1.ts\n"[..], &b"#EXTM3U\n"[..]] {
        session
            .save("", Bytes::copy_from_slice(body), &FileProperties::default(), Duration::ZERO)
            .await
            .unwrap();
    }

    let object = session.read("").await.unwrap();
    assert_eq!(object.body, Bytes::from_static(b"#EXTM3U\n"));
    assert_eq!(object.size, 8);
}

#[tokio::test]
async fn lists_siblings_of_the_destination() {
    let dir = tempfile::tempdir().unwrap();
    let target = destination(&dir, "stream/seg1.ts");
    let session = DriverRegistry::new().resolve(&target).unwrap();
    for name in ["", "seg2.ts", "720p/seg1.ts"] {
        session
            .save(name, Bytes::from_static(b"ts"), &FileProperties::default(), Duration::ZERO)
            .await
            .unwrap();
    }

    let page = session.list("", Some("/")).await.unwrap();
    assert_eq!(page.files.len(), 2);
    assert_eq!(page.directories.len(), 1);
    assert!(page.directories[0].ends_with("stream/720p"));

    assert_eq!(session.list("", None).await.unwrap().files.len(), 3);
}

#[tokio::test]
async fn file_scheme_uses_filesystem_backend() {
    let dir = tempfile::tempdir().unwrap();
    let uri = format!("file://{}/seg.ts", dir.path().display());
    let target = Destination::parse(&uri).unwrap();

    let session = DriverRegistry::new().resolve(&target).unwrap();
    session
        .save("", Bytes::from_static(b"ts"), &FileProperties::default(), Duration::ZERO)
        .await
        .unwrap();
    assert!(dir.path().join("seg.ts").exists());
}
