//! The full pipeline against an HTTP file host.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use scatter_codec::encode_share;
use scatter_engine::{DownloadError, TaskKind, TransferEngine, TransferError, resolve};
use scatter_integration_tests::{BlobHost, settings, test_data};
use scatter_uploader::{HttpMethod, HttpUploader, HttpUploaderConfig};

const CHUNK: u32 = 16 * 1024;

fn http_engine(host: &BlobHost, retries: u32) -> TransferEngine {
    let uploader = HttpUploader::new(HttpUploaderConfig {
        upload_url: format!("{}/upload", host.base_url),
        method: HttpMethod::Post,
        locator_pointer: "/data/url".into(),
        referer: "https://host.example/".into(),
        chunk_size: CHUNK,
        max_blob_size: None,
        timeout: Duration::from_secs(5),
    })
    .unwrap();
    TransferEngine::new(Arc::new(uploader), settings(4, 3, retries))
}

#[tokio::test]
async fn test_roundtrip_through_http_host() {
    let host = BlobHost::start().await;
    let engine = http_engine(&host, 2);
    let data = test_data(10 * CHUNK as usize + 99);

    let task = engine
        .tasks()
        .create(TaskKind::Upload, "album.zip", data.len() as u64);
    let descriptor = engine
        .uploads()
        .upload_bytes(Bytes::from(data.clone()), "album.zip", &task)
        .await
        .unwrap();

    // 11 chunks plus the manifest.
    assert_eq!(host.blob_count(), 12);
    assert!(descriptor.url.starts_with(&host.base_url));
    assert_eq!(descriptor.referer, "https://host.example/");

    let code = encode_share(&descriptor, false);
    let reader = http_engine(&host, 2);
    let descriptor = resolve(&code).unwrap();
    let task = reader
        .tasks()
        .create(TaskKind::Download, "album.zip", descriptor.file_size);
    let got = reader.downloads().read_all(&descriptor, task).await.unwrap();
    assert_eq!(&got[..], &data[..]);
}

#[tokio::test]
async fn test_host_hiccups_are_retried() {
    let host = BlobHost::start().await;
    host.fail_every(3);
    let engine = http_engine(&host, 3);
    let data = test_data(8 * CHUNK as usize);

    let task = engine
        .tasks()
        .create(TaskKind::Upload, "retry.bin", data.len() as u64);
    let descriptor = engine
        .uploads()
        .upload_bytes(Bytes::from(data.clone()), "retry.bin", &task)
        .await
        .unwrap();

    assert_eq!(host.blob_count(), 9);
    assert!(host.upload_requests() > 9, "some uploads were refused");

    let task = engine
        .tasks()
        .create(TaskKind::Download, "retry.bin", descriptor.file_size);
    let got = engine.downloads().read_all(&descriptor, task).await.unwrap();
    assert_eq!(&got[..], &data[..]);
}

#[tokio::test]
async fn test_expired_manifest_fails_download() {
    let host = BlobHost::start().await;
    let engine = http_engine(&host, 1);

    let task = engine.tasks().create(TaskKind::Upload, "gone", 100);
    let descriptor = engine
        .uploads()
        .upload_bytes(Bytes::from(test_data(100)), "gone", &task)
        .await
        .unwrap();
    assert!(host.expire(&descriptor.url));

    let task = engine.tasks().create(TaskKind::Download, "gone", 100);
    let err = engine
        .downloads()
        .read_all(&descriptor, task.clone())
        .await
        .unwrap_err();
    assert!(
        matches!(err, TransferError::Download(DownloadError::ManifestFailed(_))),
        "{err}"
    );
    assert!(task.is_finished());
}
